use crate::api::store::Store;
use crate::api::types::{UrlCheck, UrlCheckStatus};
use crate::config::EtcdConfig;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp, WatchOptions, WatchStream,
    Watcher,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry prefix for UrlCheck objects. Values are YAML serialized
/// definitions, one key per resource name.
pub const REGISTRY_PREFIX: &str = "/registry/urlchecks/";

/// EtcdStore provides an etcd-backed registry for UrlCheck objects.
/// Keys are stored under `/registry/urlchecks/`, values are YAML.
#[derive(Clone)]
pub struct EtcdStore {
    client: Arc<RwLock<Client>>,
}

impl EtcdStore {
    /// Connect to the configured etcd endpoints.
    pub async fn new(cfg: &EtcdConfig) -> Result<Self> {
        let mut options = ConnectOptions::new();
        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            options = options.with_user(user, password);
        }
        let client = Client::connect(&cfg.endpoints, Some(options)).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }

    fn key_for(name: &str) -> String {
        format!("{REGISTRY_PREFIX}{name}")
    }

    /// Snapshot all UrlChecks as (name, yaml) pairs together with the store
    /// revision the snapshot was taken at, so a watch can resume from it.
    pub async fn url_checks_snapshot_with_rev(&self) -> Result<(Vec<(String, String)>, i64)> {
        let mut client = self.client.write().await;
        let resp = client
            .get(REGISTRY_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or(0);
        let items = resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).replace(REGISTRY_PREFIX, ""),
                    String::from_utf8_lossy(kv.value()).to_string(),
                )
            })
            .collect();
        Ok((items, rev))
    }

    /// Watch UrlCheck keys starting just after the given revision.
    /// Previous values are requested so consumers can compare specs.
    pub async fn watch_url_checks(&self, rev: i64) -> Result<(Watcher, WatchStream)> {
        let mut client = self.client.write().await;
        let options = WatchOptions::new()
            .with_prefix()
            .with_prev_key()
            .with_start_revision(rev + 1);
        let (watcher, stream) = client.watch(REGISTRY_PREFIX, Some(options)).await?;
        Ok((watcher, stream))
    }
}

#[async_trait]
impl Store for EtcdStore {
    async fn get_url_check(&self, name: &str) -> Result<Option<UrlCheck>> {
        let mut client = self.client.write().await;
        let resp = client.get(Self::key_for(name), None).await?;
        match resp.kvs().first() {
            Some(kv) => {
                let yaml = String::from_utf8_lossy(kv.value());
                Ok(Some(serde_yaml::from_str(&yaml)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_url_check(&self, check: &UrlCheck) -> Result<()> {
        let yaml = serde_yaml::to_string(check)?;
        let mut client = self.client.write().await;
        client.put(Self::key_for(&check.metadata.name), yaml, None).await?;
        Ok(())
    }

    async fn list_url_checks(&self) -> Result<Vec<UrlCheck>> {
        let mut client = self.client.write().await;
        let resp = client
            .get(REGISTRY_PREFIX, Some(GetOptions::new().with_prefix()))
            .await?;
        let checks = resp
            .kvs()
            .iter()
            .filter_map(|kv| {
                let yaml = String::from_utf8_lossy(kv.value());
                serde_yaml::from_str::<UrlCheck>(&yaml).ok()
            })
            .collect();
        Ok(checks)
    }

    async fn delete_url_check(&self, name: &str) -> Result<()> {
        let mut client = self.client.write().await;
        client.delete(Self::key_for(name), None).await?;
        Ok(())
    }

    async fn update_url_check_status(&self, name: &str, status: &UrlCheckStatus) -> Result<()> {
        let key = Self::key_for(name);
        let mut client = self.client.write().await;

        let resp = client.get(key.clone(), None).await?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| anyhow!("urlcheck {name} vanished before status update"))?;
        let mut check: UrlCheck = serde_yaml::from_str(&String::from_utf8_lossy(kv.value()))?;
        check.status = status.clone();
        let yaml = serde_yaml::to_string(&check)?;

        // Guard against a spec edit landing between our read and write. The
        // controller owns status, so losing the race means retrying with the
        // new revision, not merging.
        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                key.clone(),
                CompareOp::Equal,
                kv.mod_revision(),
            )])
            .and_then(vec![TxnOp::put(key, yaml, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            bail!("conflicting write on urlcheck {name}, status update dropped");
        }
        Ok(())
    }
}
