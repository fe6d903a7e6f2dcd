//! End-to-end pipeline scenarios: a real queue, worker pool, and SQLite
//! store, with scripted executors and a recording notifier standing in for
//! the external capabilities.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use scan_dispatch::advisory::AdvisoryClient;
use scan_dispatch::config::Config;
use scan_dispatch::dispatch::{ExhaustedJob, JobQueue, JobStatus, WorkerPool};
use scan_dispatch::errors::{ExecutionError, NotificationError, PersistenceError};
use scan_dispatch::executor::ScanExecutor;
use scan_dispatch::models::{
    AdvisoryParams, Finding, ParamSource, RawScanResult, ScanReport, ScanTarget, SystemStats,
};
use scan_dispatch::notify::Notifier;
use scan_dispatch::store::{ResultStore, SqliteStore};

/// Executor that replays a script of outcomes, one per attempt.
struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<Result<RawScanResult, ExecutionError>>>,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    fn new(outcomes: Vec<Result<RawScanResult, ExecutionError>>) -> Self {
        ScriptedExecutor {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _target: &ScanTarget,
        _params: &AdvisoryParams,
    ) -> Result<RawScanResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(RawScanResult { findings: vec![], duration_seconds: 1.0 }))
    }
}

/// Executor that never finishes within any reasonable deadline.
struct StalledExecutor;

#[async_trait]
impl ScanExecutor for StalledExecutor {
    async fn execute(
        &self,
        _target: &ScanTarget,
        _params: &AdvisoryParams,
    ) -> Result<RawScanResult, ExecutionError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(RawScanResult { findings: vec![], duration_seconds: 0.0 })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), NotificationError> {
        self.messages.lock().await.push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

/// Notifier whose endpoint always rejects the message.
struct RejectingNotifier {
    calls: AtomicU32,
}

#[async_trait]
impl Notifier for RejectingNotifier {
    async fn notify(&self, _channel: &str, _text: &str) -> Result<(), NotificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(NotificationError::Rejected(502))
    }
}

/// Store wrapper whose first `fail_saves` report writes and first
/// `fail_counter_updates` counter bumps fail.
struct FlakyStore {
    inner: SqliteStore,
    fail_saves: AtomicU32,
    fail_counter_updates: AtomicU32,
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn upsert_target(&self, t: &ScanTarget) -> Result<(), PersistenceError> {
        self.inner.upsert_target(t).await
    }
    async fn get_target(&self, id: &str) -> Result<Option<ScanTarget>, PersistenceError> {
        self.inner.get_target(id).await
    }
    async fn save_report(&self, report: &ScanReport) -> Result<i64, PersistenceError> {
        if self.fail_saves.load(Ordering::SeqCst) > 0 {
            self.fail_saves.fetch_sub(1, Ordering::SeqCst);
            return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.save_report(report).await
    }
    async fn increment_target_counters(&self, id: &str, n: i64) -> Result<(), PersistenceError> {
        if self.fail_counter_updates.load(Ordering::SeqCst) > 0 {
            self.fail_counter_updates.fetch_sub(1, Ordering::SeqCst);
            return Err(PersistenceError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.increment_target_counters(id, n).await
    }
    async fn get_report(&self, job_id: &Uuid) -> Result<Option<ScanReport>, PersistenceError> {
        self.inner.get_report(job_id).await
    }
    async fn report_count(&self, job_id: &Uuid) -> Result<i64, PersistenceError> {
        self.inner.report_count(job_id).await
    }
    async fn system_stats(&self) -> Result<SystemStats, PersistenceError> {
        self.inner.system_stats().await
    }
}

fn xss_result() -> RawScanResult {
    RawScanResult {
        findings: vec![Finding { kind: "XSS".into(), severity: "Medium".into(), confidence: 0.8 }],
        duration_seconds: 42.0,
    }
}

fn test_config() -> Config {
    Config {
        max_attempts: 3,
        base_backoff: Duration::from_millis(10),
        exec_deadline: Duration::from_secs(2),
        ..Config::default()
    }
}

fn down_advisory() -> Arc<AdvisoryClient> {
    // Nothing listens on port 9; every suggest call falls back.
    Arc::new(AdvisoryClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap())
}

async fn seeded_store() -> SqliteStore {
    let store = SqliteStore::in_memory().await.unwrap();
    let target = ScanTarget::new("t1", "Example", "https://example.com", "GET", "id", "");
    store.upsert_target(&target).await.unwrap();
    store
}

fn target_snapshot() -> ScanTarget {
    ScanTarget::new("t1", "Example", "https://example.com", "GET", "id", "")
}

struct Harness {
    queue: Arc<JobQueue>,
    store: Arc<dyn ResultStore>,
    notifier: Arc<RecordingNotifier>,
    failures: tokio::sync::mpsc::UnboundedReceiver<ExhaustedJob>,
    pool_handle: tokio::task::JoinHandle<()>,
}

async fn run_one_job(
    executor: Arc<dyn ScanExecutor>,
    store: Arc<dyn ResultStore>,
    config: Config,
) -> (Harness, Uuid) {
    let queue = JobQueue::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let (pool, failures) = WorkerPool::new(
        Arc::clone(&queue),
        down_advisory(),
        executor,
        Arc::clone(&store),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        &config,
    );

    let job_id = queue.enqueue("chat-1", target_snapshot()).await;
    let pool_handle = tokio::spawn(pool.run(1));

    settle(&queue, &job_id).await;

    queue.close();
    (Harness { queue, store, notifier, failures, pool_handle }, job_id)
}

/// Wait for the job to settle, bounded so a regression cannot hang CI.
async fn settle(queue: &Arc<JobQueue>, job_id: &Uuid) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(status) = queue.status(job_id).await {
                if status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state");
}

#[tokio::test]
async fn fallback_scan_end_to_end() {
    let store = Arc::new(seeded_store().await);
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(xss_result())]));

    let (mut h, job_id) = run_one_job(executor, store, test_config()).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Succeeded));

    let report = h.store.get_report(&job_id).await.unwrap().unwrap();
    assert_eq!(report.advisory_params.source, ParamSource::Fallback);
    assert_eq!(report.findings_count, 1);
    assert_eq!(report.attempt, 1);
    assert_eq!(report.duration_seconds, 42.0);

    let target = h.store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(target.vulnerabilities_found_total, 1);
    assert_eq!(target.total_scans, 1);
    assert!(target.last_scan_at.is_some());

    let messages = h.notifier.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "chat-1");
    assert!(messages[0].1.contains('1'), "notice should carry the finding count");

    assert!(h.failures.try_recv().is_err());
    h.pool_handle.await.unwrap();
}

#[tokio::test]
async fn job_succeeds_on_third_attempt() {
    let store = Arc::new(seeded_store().await);
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(ExecutionError::Failed("probe reset".into())),
        Err(ExecutionError::Failed("probe reset".into())),
        Ok(xss_result()),
    ]));
    let calls = Arc::clone(&executor);

    let (mut h, job_id) = run_one_job(executor, store, test_config()).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Succeeded));
    assert_eq!(calls.calls(), 3);

    let job = h.queue.get(&job_id).await.unwrap();
    assert_eq!(job.lock().await.attempt_count, 3);

    // Exactly one report, for the successful attempt only.
    assert_eq!(h.store.report_count(&job_id).await.unwrap(), 1);
    let report = h.store.get_report(&job_id).await.unwrap().unwrap();
    assert_eq!(report.attempt, 3);

    assert!(h.failures.try_recv().is_err());
    h.pool_handle.await.unwrap();
}

#[tokio::test]
async fn exhausted_job_fails_terminally() {
    let store = Arc::new(seeded_store().await);
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(ExecutionError::Failed("connection refused".into())),
        Err(ExecutionError::Failed("connection refused".into())),
        Err(ExecutionError::Failed("connection refused".into())),
    ]));

    let (mut h, job_id) = run_one_job(executor, store, test_config()).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Failed));

    let job = h.queue.get(&job_id).await.unwrap();
    let job = job.lock().await;
    assert_eq!(job.attempt_count, 3);
    assert!(job.last_error.as_deref().unwrap().contains("connection refused"));
    drop(job);

    assert_eq!(h.store.report_count(&job_id).await.unwrap(), 0);

    let record = h.failures.try_recv().expect("terminal failure must be surfaced");
    assert_eq!(record.job_id, job_id);
    assert_eq!(record.target_id, "t1");
    assert_eq!(record.attempt_count, 3);

    // Failure is operator-visible, not user-visible, by default.
    assert!(h.notifier.messages.lock().await.is_empty());
    h.pool_handle.await.unwrap();
}

#[tokio::test]
async fn exhaustion_notice_is_opt_in() {
    let store = Arc::new(seeded_store().await);
    let executor = Arc::new(ScriptedExecutor::new(vec![Err(ExecutionError::Failed("down".into()))]));
    let config = Config { max_attempts: 1, notify_on_failure: true, ..test_config() };

    let (h, job_id) = run_one_job(executor, store, config).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Failed));
    let messages = h.notifier.messages.lock().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].1.contains("failed"));
}

#[tokio::test]
async fn deadline_overrun_is_recoverable_and_bounded() {
    let store = Arc::new(seeded_store().await);
    let config = Config {
        max_attempts: 1,
        exec_deadline: Duration::from_millis(50),
        ..test_config()
    };

    let (h, job_id) = run_one_job(Arc::new(StalledExecutor), store, config).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Failed));
    let job = h.queue.get(&job_id).await.unwrap();
    assert!(job.lock().await.last_error.as_deref().unwrap().contains("deadline"));
    assert_eq!(h.store.report_count(&job_id).await.unwrap(), 0);
}

#[tokio::test]
async fn persistence_failure_retries_full_job_without_losing_findings() {
    let store = Arc::new(FlakyStore {
        inner: seeded_store().await,
        fail_saves: AtomicU32::new(1),
        fail_counter_updates: AtomicU32::new(0),
    });
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(xss_result()), Ok(xss_result())]));
    let calls = Arc::clone(&executor);

    let (mut h, job_id) = run_one_job(executor, store, test_config()).await;

    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Succeeded));
    // Full-job retry: the scan re-executed after the failed write.
    assert_eq!(calls.calls(), 2);

    assert_eq!(h.store.report_count(&job_id).await.unwrap(), 1);
    let report = h.store.get_report(&job_id).await.unwrap().unwrap();
    assert_eq!(report.attempt, 2);
    assert_eq!(report.findings_count, 1);

    // Counters bumped once, by the attempt that completed.
    let target = h.store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(target.total_scans, 1);
    assert_eq!(target.vulnerabilities_found_total, 1);

    assert!(h.failures.try_recv().is_err());
    h.pool_handle.await.unwrap();
}

#[tokio::test]
async fn rejected_completion_notice_does_not_fail_the_job() {
    let store: Arc<dyn ResultStore> = Arc::new(seeded_store().await);
    let queue = JobQueue::new();
    let notifier = Arc::new(RejectingNotifier { calls: AtomicU32::new(0) });
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(xss_result())]));
    let (pool, mut failures) = WorkerPool::new(
        Arc::clone(&queue),
        down_advisory(),
        Arc::clone(&executor) as Arc<dyn ScanExecutor>,
        Arc::clone(&store),
        Arc::clone(&notifier) as Arc<dyn Notifier>,
        &test_config(),
    );

    let job_id = queue.enqueue("chat-1", target_snapshot()).await;
    let handle = tokio::spawn(pool.run(1));
    settle(&queue, &job_id).await;
    queue.close();
    handle.await.unwrap();

    // Delivery was attempted once, absorbed, and nothing retried.
    assert_eq!(queue.status(&job_id).await, Some(JobStatus::Succeeded));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.calls(), 1);
    assert_eq!(store.report_count(&job_id).await.unwrap(), 1);

    let target = store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(target.total_scans, 1);
    assert!(failures.try_recv().is_err());
}

#[tokio::test]
async fn counter_update_failure_is_absorbed_without_retry() {
    let store = Arc::new(FlakyStore {
        inner: seeded_store().await,
        fail_saves: AtomicU32::new(0),
        fail_counter_updates: AtomicU32::new(1),
    });
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(xss_result())]));
    let calls = Arc::clone(&executor);

    let (mut h, job_id) = run_one_job(executor, store, test_config()).await;

    // A retry here would re-run the scan and double-count the completion.
    assert_eq!(h.queue.status(&job_id).await, Some(JobStatus::Succeeded));
    assert_eq!(calls.calls(), 1);
    assert_eq!(h.store.report_count(&job_id).await.unwrap(), 1);

    // The counter bump was lost, not the job: the report persisted and the
    // requester still got the completion notice.
    let target = h.store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(target.total_scans, 0);
    assert_eq!(target.vulnerabilities_found_total, 0);
    assert_eq!(h.notifier.messages.lock().await.len(), 1);
    assert!(h.failures.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_jobs_for_one_target_keep_counters_consistent() {
    let store: Arc<dyn ResultStore> = Arc::new(seeded_store().await);
    let queue = JobQueue::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Ok(xss_result()),
        Ok(xss_result()),
        Ok(xss_result()),
    ]));
    let (pool, _failures) = WorkerPool::new(
        Arc::clone(&queue),
        down_advisory(),
        executor,
        Arc::clone(&store),
        notifier as Arc<dyn Notifier>,
        &test_config(),
    );

    let mut job_ids = Vec::new();
    for n in 0..3 {
        job_ids.push(queue.enqueue(&format!("chat-{}", n), target_snapshot()).await);
    }
    let handle = tokio::spawn(pool.run(3));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut done = true;
            for id in &job_ids {
                match queue.status(id).await {
                    Some(s) if s.is_terminal() => {}
                    _ => done = false,
                }
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("jobs did not settle");

    queue.close();
    handle.await.unwrap();

    let target = store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(target.total_scans, 3);
    assert_eq!(target.vulnerabilities_found_total, 3);
    for id in &job_ids {
        assert_eq!(store.report_count(id).await.unwrap(), 1);
    }
}
