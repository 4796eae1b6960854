use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config_ref() -> &'static Config {
    CONFIG.get().unwrap()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    // etcd endpoints holding the urlcheck registry
    pub etcd_config: EtcdConfig,
    // controller tuning
    #[serde(default)]
    pub controller_config: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Minimum seconds between two checks of the same URL.
    #[serde(default = "default_recheck_interval_secs")]
    pub recheck_interval_secs: u64,
    /// Timeout for one outbound check request.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
    /// Max number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_recheck_interval_secs() -> u64 {
    30
}

fn default_check_timeout_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: default_recheck_interval_secs(),
            check_timeout_secs: default_check_timeout_secs(),
            workers: default_workers(),
        }
    }
}

pub fn load_config(path: &str) -> anyhow::Result<&'static Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    let cfg = CONFIG.get_or_init(|| cfg);
    Ok(cfg)
}
