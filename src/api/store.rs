use crate::api::types::{UrlCheck, UrlCheckStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store is the registry interface the controller reconciles against.
///
/// `update_url_check_status` must only touch the status block; the spec is
/// owned by whoever declared the resource. The controller is the sole writer
/// of status for a given name, so implementations do not need to merge
/// concurrent status writes.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetch a UrlCheck by name. `Ok(None)` means the resource was deleted.
    async fn get_url_check(&self, name: &str) -> Result<Option<UrlCheck>>;

    /// Insert or replace a UrlCheck definition.
    async fn insert_url_check(&self, check: &UrlCheck) -> Result<()>;

    /// List all UrlChecks in the registry.
    async fn list_url_checks(&self) -> Result<Vec<UrlCheck>>;

    /// Delete a UrlCheck by name.
    async fn delete_url_check(&self, name: &str) -> Result<()>;

    /// Replace only the status block of an existing UrlCheck.
    async fn update_url_check_status(&self, name: &str, status: &UrlCheckStatus) -> Result<()>;
}

/// In-memory Store used by tests and local experiments.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, UrlCheck>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_url_check(&self, name: &str) -> Result<Option<UrlCheck>> {
        Ok(self.items.read().await.get(name).cloned())
    }

    async fn insert_url_check(&self, check: &UrlCheck) -> Result<()> {
        self.items
            .write()
            .await
            .insert(check.metadata.name.clone(), check.clone());
        Ok(())
    }

    async fn list_url_checks(&self) -> Result<Vec<UrlCheck>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn delete_url_check(&self, name: &str) -> Result<()> {
        self.items.write().await.remove(name);
        Ok(())
    }

    async fn update_url_check_status(&self, name: &str, status: &UrlCheckStatus) -> Result<()> {
        let mut items = self.items.write().await;
        match items.get_mut(name) {
            Some(check) => {
                check.status = status.clone();
                Ok(())
            }
            None => anyhow::bail!("urlcheck {name} vanished before status update"),
        }
    }
}
