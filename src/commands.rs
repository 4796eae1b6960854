use crate::api::store::Store;
use crate::api::types::UrlCheck;
use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use std::path::Path;

/// Handle a user-requested apply: read a UrlCheck manifest and upsert it
/// into the registry. An existing object keeps its observed status, since
/// only the controller may write that block.
pub async fn apply(store: &dyn Store, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read manifest from {}", file.display()))?;
    let mut check: UrlCheck =
        serde_yaml::from_str(&content).context("Failed to parse UrlCheck manifest")?;

    match store.get_url_check(&check.metadata.name).await? {
        Some(existing) => {
            check.metadata.creation_timestamp = existing.metadata.creation_timestamp;
            check.status = existing.status;
        }
        None => {
            check.metadata.creation_timestamp = Some(Utc::now());
        }
    }

    store.insert_url_check(&check).await?;
    info!(
        target: "urlwatch::commands::apply",
        "applied urlcheck {} (url {})",
        check.metadata.name,
        check.spec.url
    );
    Ok(())
}

/// Print all declared UrlChecks with their last observed result.
pub async fn get(store: &dyn Store) -> Result<()> {
    let mut checks = store.list_url_checks().await?;
    checks.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    println!("{:<24} {:<48} {:<8} LAST CHECK", "NAME", "URL", "STATUS");
    for check in checks {
        let status = check
            .status
            .last_check_result
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let last = check
            .status
            .last_check_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<24} {:<48} {:<8} {}",
            check.metadata.name, check.spec.url, status, last
        );
    }
    Ok(())
}
