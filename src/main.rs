use anyhow::Context;
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use urlwatch::api::etcdstore::EtcdStore;
use urlwatch::api::store::Store;
use urlwatch::checker::HttpChecker;
use urlwatch::cli::{Cli, Commands};
use urlwatch::commands;
use urlwatch::config::{Config, config_ref, load_config};
use urlwatch::controllers::{ControllerManager, UrlCheckController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::init();

    match &cli.command {
        Commands::Start { config } => {
            load_config(config.to_str().unwrap())?;
            handle_start_command().await?;
        }
        Commands::Apply { config, file } => {
            load_config(config.to_str().unwrap())?;
            let store = connect_store(config_ref()).await?;
            commands::apply(store.as_ref(), file).await?;
        }
        Commands::Get { config } => {
            load_config(config.to_str().unwrap())?;
            let store = connect_store(config_ref()).await?;
            commands::get(store.as_ref()).await?;
        }
    }

    Ok(())
}

async fn connect_store(cfg: &Config) -> anyhow::Result<Arc<EtcdStore>> {
    let store = Arc::new(
        EtcdStore::new(&cfg.etcd_config)
            .await
            .with_context(|| "Failed to connect etcd")?,
    );
    Ok(store)
}

async fn handle_start_command() -> anyhow::Result<()> {
    let cfg = config_ref();
    let store = connect_store(cfg).await?;

    let checker = Arc::new(HttpChecker::new(Duration::from_secs(
        cfg.controller_config.check_timeout_secs,
    ))?);
    let controller = Arc::new(UrlCheckController::new(
        store.clone() as Arc<dyn Store>,
        checker,
        Duration::from_secs(cfg.controller_config.recheck_interval_secs),
    ));

    let manager = Arc::new(ControllerManager::new());
    manager
        .clone()
        .register(controller, cfg.controller_config.workers)
        .await?;
    manager.clone().start_watch(store.clone()).await?;

    info!(
        target: "urlwatch::main",
        "watching urlchecks on {:?}, recheck interval {}s",
        cfg.etcd_config.endpoints,
        cfg.controller_config.recheck_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!(target: "urlwatch::main", "shutting down");
    manager.shutdown().await;

    Ok(())
}
