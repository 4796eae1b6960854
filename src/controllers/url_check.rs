use crate::api::store::Store;
use crate::checker::Checker;
use crate::controllers::manager::{Controller, ReconcileResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// UrlCheckController reconciles a UrlCheck object: when the recheck
/// interval has elapsed it performs one GET against the declared URL and
/// records the status code and check time in the object's status.
///
/// The controller assumes the manager's single-invocation guarantee: no two
/// reconciles run concurrently for the same key, so status writes for a key
/// are totally ordered and no compare-and-swap logic is needed here.
pub struct UrlCheckController {
    store: Arc<dyn Store>,
    checker: Arc<dyn Checker>,
    recheck_interval: Duration,
}

impl UrlCheckController {
    pub fn new(
        store: Arc<dyn Store>,
        checker: Arc<dyn Checker>,
        recheck_interval: Duration,
    ) -> Self {
        Self {
            store,
            checker,
            recheck_interval,
        }
    }

    async fn reconcile_by_name(&self, name: &str) -> Result<ReconcileResult> {
        let check = match self.store.get_url_check(name).await? {
            Some(check) => check,
            None => {
                // deleted between trigger and execution, nothing to do
                debug!("urlcheck {} no longer exists, skipping", name);
                return Ok(ReconcileResult::none());
            }
        };

        let now = Utc::now();
        if let Some(remaining) =
            remaining_cooldown(check.status.last_check_time, now, self.recheck_interval)
        {
            // cooldown still active, come back when it elapses
            return Ok(ReconcileResult::requeue_after(remaining));
        }

        let code = match self.checker.check(&check.spec.url).await {
            Ok(code) => code,
            Err(err) => {
                // Transport failures self-heal on the next tick. Status is
                // left untouched and the manager is not handed an error.
                warn!("check of {} failed: {err:#}", check.spec.url);
                return Ok(ReconcileResult::requeue_after(self.recheck_interval));
            }
        };

        info!("checked url {} status {}", check.spec.url, code);

        let mut status = check.status;
        status.last_check_time = Some(now);
        status.last_check_result = Some(code);
        self.store.update_url_check_status(name, &status).await?;

        Ok(ReconcileResult::requeue_after(self.recheck_interval))
    }
}

#[async_trait]
impl Controller for UrlCheckController {
    fn name(&self) -> &'static str {
        "urlcheck"
    }

    async fn reconcile(&self, key: &str) -> Result<ReconcileResult> {
        self.reconcile_by_name(key).await
    }
}

/// Time left in the recheck cooldown, rounded to whole seconds, or `None`
/// when a check is due. A resource that was never checked is due
/// immediately.
fn remaining_cooldown(
    last_check_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Option<Duration> {
    let last = last_check_time?;
    let due_at = last + chrono::Duration::milliseconds(interval.as_millis() as i64);
    if now > due_at {
        return None;
    }
    let remaining_ms = (due_at - now).num_milliseconds().max(0);
    Some(Duration::from_secs(((remaining_ms + 500) / 1000) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::store::MemoryStore;
    use crate::api::types::{UrlCheck, UrlCheckStatus};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct ScriptedChecker {
        outcomes: Mutex<Vec<Result<u16>>>,
        calls: AtomicUsize,
    }

    impl ScriptedChecker {
        fn returning(code: u16) -> Self {
            Self {
                outcomes: Mutex::new(vec![Ok(code)]),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                outcomes: Mutex::new(vec![Err(anyhow!("{message}"))]),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        async fn check(&self, _url: &str) -> Result<u16> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().await;
            if outcomes.is_empty() {
                return Ok(200);
            }
            outcomes.remove(0)
        }
    }

    /// Store wrapper whose status writes always fail.
    struct BrokenStatusStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl Store for BrokenStatusStore {
        async fn get_url_check(&self, name: &str) -> Result<Option<UrlCheck>> {
            self.inner.get_url_check(name).await
        }

        async fn insert_url_check(&self, check: &UrlCheck) -> Result<()> {
            self.inner.insert_url_check(check).await
        }

        async fn list_url_checks(&self) -> Result<Vec<UrlCheck>> {
            self.inner.list_url_checks().await
        }

        async fn delete_url_check(&self, name: &str) -> Result<()> {
            self.inner.delete_url_check(name).await
        }

        async fn update_url_check_status(
            &self,
            _name: &str,
            _status: &UrlCheckStatus,
        ) -> Result<()> {
            anyhow::bail!("registry unavailable")
        }
    }

    const INTERVAL: Duration = Duration::from_secs(30);

    fn controller(
        store: Arc<dyn Store>,
        checker: Arc<ScriptedChecker>,
    ) -> UrlCheckController {
        UrlCheckController::new(store, checker, INTERVAL)
    }

    /// A never-checked resource is checked once and both status fields are
    /// written together from the same instant.
    #[tokio::test]
    async fn first_check_records_time_and_result() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::returning(200));
        store
            .insert_url_check(&UrlCheck::new("example", "https://example.com"))
            .await?;

        let before = Utc::now();
        let result = controller(store.clone(), checker.clone())
            .reconcile("example")
            .await?;

        assert_eq!(checker.call_count(), 1);
        assert_eq!(result, ReconcileResult::requeue_after(INTERVAL));

        let check = store.get_url_check("example").await?.unwrap();
        assert_eq!(check.status.last_check_result, Some(200));
        let recorded = check.status.last_check_time.unwrap();
        assert!(recorded >= before && recorded <= Utc::now());
        Ok(())
    }

    /// Within the cooldown no outbound call happens, the status is left
    /// untouched and the directive is the remaining cooldown.
    #[tokio::test]
    async fn skip_inside_cooldown_returns_remaining_time() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::returning(200));
        let mut check = UrlCheck::new("example", "https://example.com");
        check.status.last_check_time = Some(Utc::now() - chrono::Duration::seconds(10));
        check.status.last_check_result = Some(200);
        let expected_status = check.status.clone();
        store.insert_url_check(&check).await?;

        let result = controller(store.clone(), checker.clone())
            .reconcile("example")
            .await?;

        assert_eq!(checker.call_count(), 0);
        let delay = result.requeue_after.expect("skip path must requeue");
        let secs = delay.as_secs();
        assert!((19..=20).contains(&secs), "expected ~20s, got {secs}s");

        let after = store.get_url_check("example").await?.unwrap();
        assert_eq!(after.status, expected_status);
        Ok(())
    }

    /// A transport failure is swallowed: status untouched, standard-interval
    /// requeue, no error surfaced to the manager.
    #[tokio::test]
    async fn transport_failure_leaves_status_untouched() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::failing("connection refused"));
        let mut check = UrlCheck::new("example", "https://example.com");
        check.status.last_check_time = Some(Utc::now() - chrono::Duration::seconds(120));
        check.status.last_check_result = Some(200);
        let expected_status = check.status.clone();
        store.insert_url_check(&check).await?;

        let result = controller(store.clone(), checker.clone())
            .reconcile("example")
            .await?;

        assert_eq!(checker.call_count(), 1);
        assert_eq!(result, ReconcileResult::requeue_after(INTERVAL));

        let after = store.get_url_check("example").await?.unwrap();
        assert_eq!(after.status, expected_status);
        Ok(())
    }

    /// Failure status codes are recorded like any other response; only
    /// transport-level failure is special.
    #[tokio::test]
    async fn http_error_codes_are_recorded() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::returning(503));
        store
            .insert_url_check(&UrlCheck::new("flaky", "https://flaky.example.com"))
            .await?;

        let result = controller(store.clone(), checker.clone())
            .reconcile("flaky")
            .await?;

        assert_eq!(result, ReconcileResult::requeue_after(INTERVAL));
        let check = store.get_url_check("flaky").await?.unwrap();
        assert_eq!(check.status.last_check_result, Some(503));
        assert!(check.status.last_check_time.is_some());
        Ok(())
    }

    /// A failed status write after a successful check surfaces as an error,
    /// with no directive produced by the controller itself.
    #[tokio::test]
    async fn status_write_failure_surfaces_as_error() -> Result<()> {
        let store = Arc::new(BrokenStatusStore {
            inner: MemoryStore::new(),
        });
        let checker = Arc::new(ScriptedChecker::returning(200));
        store
            .insert_url_check(&UrlCheck::new("example", "https://example.com"))
            .await?;

        let outcome = controller(store, checker.clone()).reconcile("example").await;

        assert_eq!(checker.call_count(), 1);
        assert!(outcome.is_err());
        Ok(())
    }

    /// Reconciling a deleted resource is a successful no-op with no outbound
    /// call and no requeue.
    #[tokio::test]
    async fn missing_resource_is_a_noop() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::returning(200));

        let result = controller(store, checker.clone()).reconcile("gone").await?;

        assert_eq!(checker.call_count(), 0);
        assert_eq!(result, ReconcileResult::none());
        Ok(())
    }

    /// Across repeated due checks the recorded check time never goes
    /// backwards.
    #[tokio::test]
    async fn check_time_is_monotonic() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let checker = Arc::new(ScriptedChecker::returning(200));
        store
            .insert_url_check(&UrlCheck::new("example", "https://example.com"))
            .await?;
        let ctrl = controller(store.clone(), checker.clone());

        ctrl.reconcile("example").await?;
        let first = store
            .get_url_check("example")
            .await?
            .unwrap()
            .status
            .last_check_time
            .unwrap();

        // age the record so the next reconcile is due again
        let mut status = store.get_url_check("example").await?.unwrap().status;
        status.last_check_time = Some(first - chrono::Duration::seconds(60));
        store.update_url_check_status("example", &status).await?;

        ctrl.reconcile("example").await?;
        let second = store
            .get_url_check("example")
            .await?
            .unwrap()
            .status
            .last_check_time
            .unwrap();

        assert!(second >= first - chrono::Duration::seconds(60));
        assert!(second >= first, "recorded check time went backwards");
        Ok(())
    }

    #[test]
    fn cooldown_is_none_when_never_checked() {
        assert_eq!(remaining_cooldown(None, Utc::now(), INTERVAL), None);
    }

    #[test]
    fn cooldown_is_none_once_interval_elapsed() {
        let now = Utc::now();
        let last = now - chrono::Duration::seconds(31);
        assert_eq!(remaining_cooldown(Some(last), now, INTERVAL), None);
    }

    #[test]
    fn cooldown_rounds_to_nearest_second() {
        let now = Utc::now();

        let last = now - chrono::Duration::milliseconds(10_200);
        let remaining = remaining_cooldown(Some(last), now, INTERVAL).unwrap();
        assert_eq!(remaining, Duration::from_secs(20));

        let last = now - chrono::Duration::milliseconds(10_600);
        let remaining = remaining_cooldown(Some(last), now, INTERVAL).unwrap();
        assert_eq!(remaining, Duration::from_secs(19));
    }

    #[test]
    fn cooldown_at_exact_boundary_still_skips() {
        let now = Utc::now();
        let last = now - chrono::Duration::seconds(30);
        // now == due_at is the last instant of the cooldown
        assert_eq!(
            remaining_cooldown(Some(last), now, INTERVAL),
            Some(Duration::from_secs(0))
        );
    }
}
