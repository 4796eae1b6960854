use crate::api::etcdstore::{EtcdStore, REGISTRY_PREFIX};
use crate::api::types::UrlCheck;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::sleep;

/// Directive a controller hands back to the manager after a reconcile:
/// either invoke me again after a delay, or nothing left to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Ask to be invoked again after `delay`, absent any other trigger.
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Take no further action for this key.
    pub fn none() -> Self {
        Self {
            requeue_after: None,
        }
    }
}

/// Controller trait defines the contract for controllers managed by ControllerManager.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    // Name used for identifying the controller.
    fn name(&self) -> &'static str;

    // Reconcile the resource identified by key (the resource name) and
    // return a scheduling directive. Errors are retried by the manager.
    async fn reconcile(&self, key: &str) -> Result<ReconcileResult>;
}

/// ControllerManager: registers controllers, provides enqueue, starts the
/// registry watch, and honors requeue directives.
///
/// The inflight set guarantees at most one queued-or-running invocation per
/// key per controller, so controllers never see concurrent reconciles for
/// the same resource and need no internal locking.
pub struct ControllerManager {
    controllers: RwLock<HashMap<String, Arc<dyn Controller>>>,
    // a work queue per controller.
    queues: RwLock<HashMap<String, mpsc::Sender<String>>>,
    // avoids the same key getting into a queue twice.
    inflight: RwLock<HashMap<String, HashSet<String>>>,
    // use for stopping the manager.
    stop_tx: watch::Sender<bool>,
}

impl ControllerManager {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            controllers: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            inflight: RwLock::new(HashMap::new()),
            stop_tx,
        }
    }

    // Register a controller and spawn a dispatcher task that consumes its
    // work queue with at most `workers` concurrent reconciles.
    pub async fn register(
        self: Arc<Self>,
        controller: Arc<dyn Controller>,
        workers: usize,
    ) -> Result<()> {
        let name = controller.name().to_string();
        let (tx, mut rx) = mpsc::channel::<String>(1000);

        self.controllers
            .write()
            .await
            .insert(name.clone(), controller.clone());
        self.queues.write().await.insert(name.clone(), tx.clone());
        self.inflight
            .write()
            .await
            .insert(name.clone(), HashSet::new());

        let semaphore = Arc::new(tokio::sync::Semaphore::new(workers));
        let mut stop_sub = self.stop_tx.subscribe();

        let manager = self.clone();
        let controller = controller.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_sub.changed() => {
                        break;
                    }

                    opt = rx.recv() => {
                        match opt {
                            Some(key) => {
                                let permit = match semaphore.clone().acquire_owned().await {
                                    Ok(permit) => permit,
                                    Err(_) => break,
                                };

                                let controller = controller.clone();
                                let manager = manager.clone();
                                let name = name.clone();

                                tokio::spawn(async move {
                                    let outcome = retry_with_backoff(|| async {
                                        controller.reconcile(&key).await
                                    })
                                    .await;

                                    // Release the key before scheduling any
                                    // requeue so the next tick can enter the
                                    // queue.
                                    {
                                        let mut inflight_map = manager.inflight.write().await;
                                        if let Some(set) = inflight_map.get_mut(&name) {
                                            set.remove(&key);
                                        }
                                    }

                                    match outcome {
                                        Ok(result) => {
                                            if let Some(delay) = result.requeue_after {
                                                let mgr = manager.clone();
                                                tokio::spawn(async move {
                                                    sleep(delay).await;
                                                    mgr.enqueue(&name, key).await;
                                                });
                                            }
                                        }
                                        Err(e) => {
                                            log::error!(
                                                "controller {} reconcile {} failed: {:?}",
                                                name, key, e
                                            );
                                        }
                                    }

                                    drop(permit);
                                });
                            }

                            None => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    // Enqueue a key for a controller; the inflight set drops duplicates of
    // keys that are already queued or being reconciled.
    pub async fn enqueue(&self, controller_name: &str, key: String) {
        let mut inflight_map = self.inflight.write().await;
        if let Some(set) = inflight_map.get_mut(controller_name) {
            if set.contains(&key) {
                return;
            }
            set.insert(key.clone());
        }

        let queues = self.queues.read().await;
        if let Some(tx) = queues.get(controller_name) {
            let _ = tx.send(key).await;
        } else {
            // cleanup reservation if no queue to receive
            if let Some(set) = inflight_map.get_mut(controller_name) {
                set.remove(&key);
            }
        }
    }

    // Start the urlcheck informer: snapshot everything, enqueue it, then
    // watch from the snapshot revision and reconnect with backoff on errors.
    pub async fn start_watch(self: Arc<Self>, store: Arc<EtcdStore>) -> Result<()> {
        let mgr = self.clone();
        tokio::spawn(async move {
            let mut backoff_ms = 100u64;
            loop {
                match store.url_checks_snapshot_with_rev().await {
                    Ok((items, rev)) => {
                        for (name, _yaml) in items.into_iter() {
                            mgr.broadcast(name).await;
                        }

                        match store.watch_url_checks(rev).await {
                            Ok((_watcher, mut stream)) => {
                                // reset backoff on successful watch
                                backoff_ms = 100;
                                loop {
                                    match stream.message().await {
                                        Ok(Some(resp)) => {
                                            for ev in resp.events() {
                                                if let Some(kv) = ev.kv() {
                                                    let key = String::from_utf8_lossy(kv.key())
                                                        .replace(REGISTRY_PREFIX, "");

                                                    // Skip events where the spec did not
                                                    // change; the controller's own status
                                                    // writes would otherwise re-trigger
                                                    // reconciliation on every check.
                                                    // Creations and deletions always enqueue.
                                                    let mut should_enqueue = true;
                                                    if let Some(prev_kv) = ev.prev_kv() {
                                                        let prev = serde_yaml::from_str::<UrlCheck>(
                                                            &String::from_utf8_lossy(
                                                                prev_kv.value(),
                                                            ),
                                                        );
                                                        let curr = serde_yaml::from_str::<UrlCheck>(
                                                            &String::from_utf8_lossy(kv.value()),
                                                        );
                                                        if let (Ok(prev), Ok(curr)) = (prev, curr) {
                                                            if prev.spec == curr.spec {
                                                                should_enqueue = false;
                                                            }
                                                        }
                                                    }

                                                    if should_enqueue {
                                                        mgr.broadcast(key).await;
                                                    }
                                                }
                                            }
                                        }
                                        Ok(None) => {
                                            log::info!(
                                                "urlcheck watch stream closed, will reconnect"
                                            );
                                            break;
                                        }
                                        Err(e) => {
                                            log::error!(
                                                "urlcheck watch error: {:?}, will reconnect",
                                                e
                                            );
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                log::error!("failed to start urlcheck watch: {:?}", e);
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("failed to snapshot urlchecks: {:?}", e);
                    }
                }

                // backoff before retry
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(30_000);
            }
        });

        Ok(())
    }

    // Enqueue a key to every registered controller.
    async fn broadcast(&self, key: String) {
        let names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        for name in names {
            self.enqueue(&name, key.clone()).await;
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        sleep(Duration::from_millis(200)).await;
    }
}

impl Default for ControllerManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn retry_with_backoff<F, Fut, T>(mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts += 1;
                if attempts >= 5 {
                    return Err(e);
                }
                let backoff = 2u64.pow(attempts.min(6)) * 100;
                sleep(Duration::from_millis(backoff)).await;
                continue;
            }
        }
    }
}
