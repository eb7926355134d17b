use super::*;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::driver::{MemoryDriver, MemoryRegistry};
use crate::node_pool::ConvergenceState;
use crate::ring::HashRing;
use crate::store::MemoryJobStore;

/// Never fires during a test run.
const NEW_YEAR: &str = "0 0 1 1 *";

fn options() -> DcronOptions {
    DcronOptions::new("svc").with_update_interval(Duration::from_secs(3))
}

fn driver(registry: &MemoryRegistry) -> Arc<MemoryDriver> {
    Arc::new(MemoryDriver::new(registry.clone(), "svc", Duration::from_secs(6)))
}

fn dcron(registry: &MemoryRegistry) -> Dcron {
    Dcron::new(driver(registry), options()).unwrap()
}

struct ClearJob {
    conversation_id: String,
    runs: Arc<AtomicUsize>,
}

impl ClearJob {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Job for ClearJob {
    async fn run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn as_stable(&self) -> Option<&dyn StableJob> {
        Some(self)
    }
}

impl StableJob for ClearJob {
    fn job_name(&self) -> &str {
        "clearMsgJob_c1"
    }

    fn cron_expr(&self) -> &str {
        NEW_YEAR
    }

    fn payload(&self) -> Result<serde_json::Value> {
        Ok(json!({ "conversation_id": self.conversation_id }))
    }
}

/// Rebuilds `ClearJob`s; anything without a conversation id is rejected.
struct ClearRecoverer;

impl JobRecoverer for ClearRecoverer {
    fn recover(&self, record: &StableJobRecord) -> Result<Arc<dyn Job>> {
        let conversation_id = record.payload["conversation_id"]
            .as_str()
            .ok_or_else(|| DcronError::Recover {
                name: record.name.clone(),
                reason: "missing conversation_id".to_string(),
            })?;
        Ok(Arc::new(ClearJob::new(conversation_id)))
    }
}

/// Every write fails.
struct BrokenStore;

#[async_trait]
impl JobStore for BrokenStore {
    async fn save(&self, _record: &StableJobRecord) -> Result<()> {
        Err(DcronError::Unavailable("broken".to_string()))
    }

    async fn load(&self, _name: &str) -> Result<Option<StableJobRecord>> {
        Ok(None)
    }

    async fn load_all(&self) -> Result<Vec<StableJobRecord>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Err(DcronError::Unavailable("broken".to_string()))
    }
}

/// `ClearJob` for c1 on an arbitrary schedule.
struct RescheduledClear(&'static str);

#[async_trait]
impl Job for RescheduledClear {
    async fn run(&self) {}

    fn as_stable(&self) -> Option<&dyn StableJob> {
        Some(self)
    }
}

impl StableJob for RescheduledClear {
    fn job_name(&self) -> &str {
        "clearMsgJob_c1"
    }

    fn cron_expr(&self) -> &str {
        self.0
    }

    fn payload(&self) -> Result<serde_json::Value> {
        Ok(json!({ "conversation_id": "c1" }))
    }
}

/// Saves fail while `failing` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryJobStore,
    failing: AtomicBool,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn save(&self, record: &StableJobRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DcronError::Unavailable("flaky".to_string()));
        }
        self.inner.save(record).await
    }

    async fn load(&self, name: &str) -> Result<Option<StableJobRecord>> {
        self.inner.load(name).await
    }

    async fn load_all(&self) -> Result<Vec<StableJobRecord>> {
        self.inner.load_all().await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

/// Holds every save until the test opens the gate.
#[derive(Default)]
struct GatedStore {
    inner: MemoryJobStore,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl JobStore for GatedStore {
    async fn save(&self, record: &StableJobRecord) -> Result<()> {
        self.gate.notified().await;
        self.inner.save(record).await
    }

    async fn load(&self, name: &str) -> Result<Option<StableJobRecord>> {
        self.inner.load(name).await
    }

    async fn load_all(&self) -> Result<Vec<StableJobRecord>> {
        self.inner.load_all().await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.inner.delete(name).await
    }
}

async fn store_with_c1() -> Arc<MemoryJobStore> {
    let store = Arc::new(MemoryJobStore::new());
    store
        .save(&StableJobRecord {
            name: "clearMsgJob_c1".to_string(),
            cron: NEW_YEAR.to_string(),
            payload: json!({ "conversation_id": "c1" }),
        })
        .await
        .unwrap();
    store
}

#[test]
fn test_new_rejects_ttl_shorter_than_two_intervals() {
    let driver = Arc::new(MemoryDriver::new(
        MemoryRegistry::new(),
        "svc",
        Duration::from_secs(5),
    ));
    let err = Dcron::new(driver, options()).err().unwrap();
    assert!(matches!(err, DcronError::Config(_)));
}

#[tokio::test]
async fn test_add_job_rejects_invalid_cron() {
    let d = dcron(&MemoryRegistry::new());
    let err = d.add_func("bad", "not a cron", || async {}).await.unwrap_err();
    assert!(matches!(err, DcronError::InvalidCron { .. }));
    assert!(!d.contains("bad"));
}

#[tokio::test]
async fn test_add_job_rejects_duplicate_name() {
    let d = dcron(&MemoryRegistry::new());
    d.add_func("job", NEW_YEAR, || async {}).await.unwrap();
    let err = d.add_func("job", "* * * * *", || async {}).await.unwrap_err();
    assert!(matches!(err, DcronError::DuplicateJob(_)));
    assert_eq!(d.jobs().len(), 1);
    assert_eq!(d.jobs()[0].cron, NEW_YEAR);
    assert_eq!(d.job("job").unwrap().cron, NEW_YEAR);
    assert!(d.job("missing").is_none());
}

#[tokio::test]
async fn test_stable_job_is_persisted_and_removed() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());

    d.add_stable_job(Arc::new(ClearJob::new("c1"))).await.unwrap();
    let saved = store.load("clearMsgJob_c1").await.unwrap().unwrap();
    assert_eq!(saved.cron, NEW_YEAR);
    assert_eq!(saved.payload["conversation_id"], "c1");
    assert!(d.jobs()[0].stable);

    d.remove("clearMsgJob_c1").await.unwrap();
    assert!(!d.contains("clearMsgJob_c1"));
    assert!(store.is_empty().await);

    // Removing again is fine.
    d.remove("clearMsgJob_c1").await.unwrap();
}

#[tokio::test]
async fn test_add_job_persists_through_as_stable() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());

    d.add_job("clearMsgJob_c1", NEW_YEAR, Arc::new(ClearJob::new("c1")))
        .await
        .unwrap();
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_plain_job_is_not_persisted() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());

    d.add_func("tick", NEW_YEAR, || async {}).await.unwrap();
    assert!(store.is_empty().await);
    assert!(!d.jobs()[0].stable);
}

#[tokio::test]
async fn test_failed_persist_undoes_registration() {
    let d = dcron(&MemoryRegistry::new()).with_store(Arc::new(BrokenStore));

    let err = d
        .add_stable_job(Arc::new(ClearJob::new("c1")))
        .await
        .unwrap_err();
    assert!(matches!(err, DcronError::Unavailable(_)));
    assert!(d.jobs().is_empty());
    assert!(d.registry.engine.is_empty());
}

#[tokio::test]
async fn test_recover_skips_bad_records() {
    let store = Arc::new(MemoryJobStore::new());
    store
        .save(&StableJobRecord {
            name: "clearMsgJob_c1".to_string(),
            cron: NEW_YEAR.to_string(),
            payload: json!({ "conversation_id": "c1" }),
        })
        .await
        .unwrap();
    store
        .save(&StableJobRecord {
            name: "clearMsgJob_c2".to_string(),
            cron: NEW_YEAR.to_string(),
            payload: json!({}),
        })
        .await
        .unwrap();
    store.insert_raw("garbage", "][").await;

    let d = dcron(&MemoryRegistry::new())
        .with_store(store.clone())
        .with_recoverer(Arc::new(ClearRecoverer));
    assert_eq!(d.recover().await.unwrap(), 1);

    let jobs = d.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "clearMsgJob_c1");
    assert!(jobs[0].stable);

    // A second pass finds everything already registered.
    assert_eq!(d.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_without_recoverer_is_a_no_op() {
    let store = Arc::new(MemoryJobStore::new());
    store.insert_raw("x", "{}").await;
    let d = dcron(&MemoryRegistry::new()).with_store(store);
    assert_eq!(d.recover().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_start_recovers_and_reports_status() {
    let store = Arc::new(MemoryJobStore::new());
    store
        .save(&StableJobRecord {
            name: "clearMsgJob_c1".to_string(),
            cron: NEW_YEAR.to_string(),
            payload: json!({ "conversation_id": "c1" }),
        })
        .await
        .unwrap();
    let d = dcron(&MemoryRegistry::new())
        .with_store(store)
        .with_recoverer(Arc::new(ClearRecoverer));

    d.start().await.unwrap();
    assert!(d.contains("clearMsgJob_c1"));
    let status = d.status();
    assert_eq!(status.state, ConvergenceState::Steady);
    assert_eq!(status.nodes, vec![d.node_id().to_string()]);
    assert!(d.check_job_available("clearMsgJob_c1").unwrap());

    assert!(matches!(d.start().await, Err(DcronError::AlreadyStarted(_))));
    d.stop().await.unwrap();
    d.stop().await.unwrap();
    assert!(!d.check_job_available("clearMsgJob_c1").unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_after_stop() {
    let d = Arc::new(dcron(&MemoryRegistry::new()));
    let runner = tokio::spawn({
        let d = d.clone();
        async move { d.run().await }
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(d.status().state, ConvergenceState::Steady);
    d.stop().await.unwrap();
    runner.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deferred_fire_is_replayed_by_owner_only() {
    let registry = MemoryRegistry::new();
    let d = dcron(&registry);
    d.start().await.unwrap();

    // A second node joins and the pool goes back to upgrading.
    let other = driver(&registry);
    other.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(d.status().state, ConvergenceState::Upgrading);

    let ring = HashRing::from_nodes(50, &[d.node_id(), other.node_id()]);
    let name_owned_by = |node: &str| {
        (0..1000)
            .map(|i| format!("clearMsgJob_{}", i))
            .find(|name| ring.get(name) == Some(node))
            .unwrap()
    };
    let mine = name_owned_by(d.node_id());
    let theirs = name_owned_by(other.node_id());

    let mine_runs = Arc::new(AtomicUsize::new(0));
    let theirs_runs = Arc::new(AtomicUsize::new(0));
    for (name, runs) in [(&mine, &mine_runs), (&theirs, &theirs_runs)] {
        let runs = runs.clone();
        d.add_func(name, NEW_YEAR, move || {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await
        .unwrap();
    }

    // Simulate the engine ticking both jobs during the upgrade window.
    for name in [&mine, &theirs] {
        let wrapper = d.registry.get(name.as_str()).unwrap();
        wrapper.fire().await;
    }
    assert_eq!(mine_runs.load(Ordering::SeqCst), 0);
    assert_eq!(theirs_runs.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(d.status().state, ConvergenceState::Steady);
    assert_eq!(mine_runs.load(Ordering::SeqCst), 1);
    assert_eq!(theirs_runs.load(Ordering::SeqCst), 0);

    d.stop().await.unwrap();
    other.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removed_job_is_not_replayed() {
    let registry = MemoryRegistry::new();
    let d = dcron(&registry);
    d.start().await.unwrap();
    let other = driver(&registry);
    other.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    d.add_func("gone", NEW_YEAR, move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
    .await
    .unwrap();
    let wrapper = d.registry.get("gone").unwrap();
    wrapper.fire().await;
    d.remove("gone").await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    d.stop().await.unwrap();
    other.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sync_spreads_adds_and_removes_between_nodes() {
    let registry = MemoryRegistry::new();
    let store = Arc::new(MemoryJobStore::new());
    let a = dcron(&registry)
        .with_store(store.clone())
        .with_recoverer(Arc::new(ClearRecoverer));
    let b = dcron(&registry)
        .with_store(store.clone())
        .with_recoverer(Arc::new(ClearRecoverer));

    a.add_job("clearMsgJob_c1", NEW_YEAR, Arc::new(ClearJob::new("c1")))
        .await
        .unwrap();
    assert!(!b.contains("clearMsgJob_c1"));
    assert_eq!(b.sync().await.unwrap(), 1);
    assert!(b.contains("clearMsgJob_c1"));
    assert!(b.jobs()[0].stable);

    tokio::time::advance(Duration::from_millis(10)).await;
    a.remove("clearMsgJob_c1").await.unwrap();
    assert_eq!(b.sync().await.unwrap(), 1);
    assert!(!b.contains("clearMsgJob_c1"));
    assert_eq!(b.sync().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sync_reregisters_changed_record() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new())
        .with_store(store.clone())
        .with_recoverer(Arc::new(ClearRecoverer));
    d.add_job("clearMsgJob_c1", NEW_YEAR, Arc::new(ClearJob::new("c1")))
        .await
        .unwrap();

    store
        .save(&StableJobRecord {
            name: "clearMsgJob_c1".to_string(),
            cron: "0 0 2 1 *".to_string(),
            payload: json!({ "conversation_id": "c1" }),
        })
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;

    assert_eq!(d.sync().await.unwrap(), 2);
    assert_eq!(d.jobs()[0].cron, "0 0 2 1 *");
}

#[tokio::test(start_paused = true)]
async fn test_sync_leaves_plain_jobs_alone() {
    let d = dcron(&MemoryRegistry::new())
        .with_store(Arc::new(MemoryJobStore::new()))
        .with_recoverer(Arc::new(ClearRecoverer));
    d.add_func("local", NEW_YEAR, || async {}).await.unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;

    assert_eq!(d.sync().await.unwrap(), 0);
    assert!(d.contains("local"));
}

#[tokio::test(start_paused = true)]
async fn test_started_nodes_pick_up_jobs_added_elsewhere() {
    let registry = MemoryRegistry::new();
    let store = Arc::new(MemoryJobStore::new());
    let node = || {
        Dcron::new(
            driver(&registry),
            options().with_sync_interval(Some(Duration::from_secs(5))),
        )
        .unwrap()
        .with_store(store.clone())
        .with_recoverer(Arc::new(ClearRecoverer))
    };
    let a = node();
    let b = node();
    let (ra, rb) = tokio::join!(a.start(), b.start());
    ra.unwrap();
    rb.unwrap();

    a.add_job("clearMsgJob_c1", NEW_YEAR, Arc::new(ClearJob::new("c1")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(b.contains("clearMsgJob_c1"));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_jobs_recovered_before_membership_converges() {
    let d = Arc::new(
        dcron(&MemoryRegistry::new())
            .with_store(store_with_c1().await)
            .with_recoverer(Arc::new(ClearRecoverer)),
    );
    let starter = tokio::spawn({
        let d = d.clone();
        async move { d.start().await }
    });

    // The first membership poll is 3s away.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(d.status().state, ConvergenceState::Upgrading);
    assert!(d.contains("clearMsgJob_c1"));
    assert!(!starter.is_finished());

    starter.await.unwrap().unwrap();
    d.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_after_stop_is_refused() {
    let registry = MemoryRegistry::new();
    let d = dcron(&registry);
    d.stop().await.unwrap();

    assert!(matches!(d.start().await, Err(DcronError::Stopped)));
    assert!(d.status().nodes.is_empty());

    // Nothing joined the fleet.
    let observer = driver(&registry);
    observer.start().await.unwrap();
    assert_eq!(
        observer.get_nodes().await.unwrap(),
        vec![observer.node_id().to_string()]
    );
    observer.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_is_refused() {
    let d = dcron(&MemoryRegistry::new());
    d.start().await.unwrap();
    d.stop().await.unwrap();
    assert!(matches!(d.start().await, Err(DcronError::Stopped)));
}

#[tokio::test(start_paused = true)]
async fn test_sync_keeps_job_whose_save_is_in_flight() {
    let store = Arc::new(GatedStore::default());
    let d = Arc::new(
        dcron(&MemoryRegistry::new())
            .with_store(store.clone())
            .with_recoverer(Arc::new(ClearRecoverer)),
    );

    let adder = tokio::spawn({
        let d = d.clone();
        async move {
            d.add_job("clearMsgJob_c1", NEW_YEAR, Arc::new(ClearJob::new("c1")))
                .await
        }
    });
    while !d.contains("clearMsgJob_c1") {
        tokio::task::yield_now().await;
    }
    tokio::time::advance(Duration::from_millis(10)).await;

    // The record is not in the store yet; the registration must survive.
    assert_eq!(d.sync().await.unwrap(), 0);
    assert!(d.contains("clearMsgJob_c1"));

    store.gate.notify_one();
    adder.await.unwrap().unwrap();
    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(d.sync().await.unwrap(), 0);
    assert!(d.contains("clearMsgJob_c1"));
}

#[tokio::test]
async fn test_replace_stable_job_swaps_schedule() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());

    d.replace_stable_job(Arc::new(ClearJob::new("c1"))).await.unwrap();
    d.replace_stable_job(Arc::new(RescheduledClear("0 0 2 1 *")))
        .await
        .unwrap();

    assert_eq!(d.jobs().len(), 1);
    assert_eq!(d.job("clearMsgJob_c1").unwrap().cron, "0 0 2 1 *");
    assert_eq!(d.registry.engine.len(), 1);
    let saved = store.load("clearMsgJob_c1").await.unwrap().unwrap();
    assert_eq!(saved.cron, "0 0 2 1 *");
}

#[tokio::test]
async fn test_replace_with_invalid_cron_keeps_previous_job() {
    let store = Arc::new(MemoryJobStore::new());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());
    d.add_stable_job(Arc::new(ClearJob::new("c1"))).await.unwrap();

    let err = d
        .replace_stable_job(Arc::new(RescheduledClear("not a cron")))
        .await
        .unwrap_err();
    assert!(matches!(err, DcronError::InvalidCron { .. }));

    assert_eq!(d.job("clearMsgJob_c1").unwrap().cron, NEW_YEAR);
    assert!(d.registry.engine.contains("clearMsgJob_c1"));
    assert_eq!(store.load("clearMsgJob_c1").await.unwrap().unwrap().cron, NEW_YEAR);
}

#[tokio::test]
async fn test_replace_with_failing_store_keeps_previous_job() {
    let store = Arc::new(FlakyStore::default());
    let d = dcron(&MemoryRegistry::new()).with_store(store.clone());
    d.add_stable_job(Arc::new(ClearJob::new("c1"))).await.unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let err = d
        .replace_stable_job(Arc::new(RescheduledClear("0 0 2 1 *")))
        .await
        .unwrap_err();
    assert!(matches!(err, DcronError::Unavailable(_)));

    assert_eq!(d.job("clearMsgJob_c1").unwrap().cron, NEW_YEAR);
    assert!(d.registry.engine.contains("clearMsgJob_c1"));
    assert_eq!(store.load("clearMsgJob_c1").await.unwrap().unwrap().cron, NEW_YEAR);
}
