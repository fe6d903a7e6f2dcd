//! Worker pool.
//!
//! Each worker pulls one job and drives the full pipeline to completion or
//! terminal failure before pulling the next: advisory suggestion, deadline-
//! bounded execution, report compilation and persistence, counter update,
//! notification. Recoverable failures retry the whole job with exponential
//! backoff; exhaustion lands on the operator-visible failure stream.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};

use super::job::{ExhaustedJob, ScanJob};
use super::queue::JobQueue;
use crate::advisory::AdvisoryClient;
use crate::config::Config;
use crate::errors::{AttemptError, ExecutionError};
use crate::executor::ScanExecutor;
use crate::notify::{completion_message, failure_message, Notifier};
use crate::report::ReportCompiler;
use crate::store::ResultStore;

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    advisory: Arc<AdvisoryClient>,
    executor: Arc<dyn ScanExecutor>,
    compiler: ReportCompiler,
    store: Arc<dyn ResultStore>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    base_backoff: Duration,
    exec_deadline: Duration,
    notify_on_failure: bool,
    failures: mpsc::UnboundedSender<ExhaustedJob>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        advisory: Arc<AdvisoryClient>,
        executor: Arc<dyn ScanExecutor>,
        store: Arc<dyn ResultStore>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ExhaustedJob>) {
        let (failures, failure_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(WorkerPool {
            queue,
            advisory,
            compiler: ReportCompiler::new(Arc::clone(&store)),
            executor,
            store,
            notifier,
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff,
            exec_deadline: config.exec_deadline,
            notify_on_failure: config.notify_on_failure,
            failures,
        });
        (pool, failure_rx)
    }

    /// Run `workers` concurrent workers until the queue is closed and
    /// drained.
    pub async fn run(self: Arc<Self>, workers: usize) {
        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let pool = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                while let Some(job) = pool.queue.pop().await {
                    pool.process(job).await;
                }
                debug!("Worker {} drained, exiting", n);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// One pipeline attempt. Steps run strictly in order; no step begins
    /// before the previous one returned.
    async fn process(&self, job: Arc<Mutex<ScanJob>>) {
        let snapshot = {
            let mut j = job.lock().await;
            // A terminal job can still be redelivered if a shutdown requeue
            // raced its final ack. Succeeded and Failed stay terminal.
            if j.status.is_terminal() {
                let job_id = j.job_id;
                drop(j);
                debug!("Job {} already terminal, skipping redelivery", job_id);
                self.queue.ack(&job_id).await;
                return;
            }
            j.begin_attempt();
            j.clone()
        };
        info!(
            "Job {} attempt {}/{} for target {}",
            snapshot.job_id, snapshot.attempt_count, self.max_attempts, snapshot.target.id
        );

        // Never fails outward; always usable params.
        let params = self.advisory.suggest(&snapshot.target).await;

        let raw = match tokio::time::timeout(
            self.exec_deadline,
            self.executor.execute(&snapshot.target, &params),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.handle_attempt_failure(&job, e.into()).await;
                return;
            }
            Err(_) => {
                let e = ExecutionError::DeadlineExceeded(self.exec_deadline);
                self.handle_attempt_failure(&job, e.into()).await;
                return;
            }
        };

        let report = self.compiler.compile(&snapshot, raw, params);
        if let Err(e) = self.compiler.persist(&report).await {
            // Execution succeeded; the findings must not vanish. Surface the
            // full payload before the retry re-executes the scan.
            let payload =
                serde_json::to_string(&report).unwrap_or_else(|_| format!("{:?}", report));
            error!(
                "Job {}: report persistence failed ({}); unsaved report: {}",
                snapshot.job_id, e, payload
            );
            self.handle_attempt_failure(&job, e.into()).await;
            return;
        }

        // Counter update is not retried: a retry would re-run the scan and
        // double-count this completion.
        if let Err(e) = self
            .store
            .increment_target_counters(&report.target_id, report.findings_count)
            .await
        {
            error!("Job {}: target counter update failed: {}", snapshot.job_id, e);
        }

        let message = completion_message(&snapshot.target.title, report.findings_count);
        if let Err(e) = self.notifier.notify(&snapshot.requester_channel, &message).await {
            warn!("Job {}: completion notice undelivered: {}", snapshot.job_id, e);
        }

        job.lock().await.mark_succeeded();
        self.queue.ack(&snapshot.job_id).await;
        info!(
            "Job {} succeeded after {} attempt(s), {} finding(s)",
            snapshot.job_id, snapshot.attempt_count, report.findings_count
        );
    }

    fn backoff_delay(&self, attempt_count: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt_count.saturating_sub(1))
    }

    async fn handle_attempt_failure(&self, job: &Arc<Mutex<ScanJob>>, err: AttemptError) {
        let mut j = job.lock().await;
        let job_id = j.job_id;

        if j.attempt_count < self.max_attempts {
            j.mark_retrying(&err.to_string());
            let delay = self.backoff_delay(j.attempt_count);
            warn!(
                "Job {} attempt {} failed ({}); retrying in {:?}",
                job_id, j.attempt_count, err, delay
            );
            drop(j);
            self.queue.requeue_after(job_id, delay);
            return;
        }

        j.mark_failed(&err.to_string());
        error!(
            "Job {} exhausted after {} attempts; last error: {}",
            job_id, j.attempt_count, err
        );
        let record = ExhaustedJob {
            job_id,
            target_id: j.target.id.clone(),
            attempt_count: j.attempt_count,
            last_error: err.to_string(),
        };
        let title = j.target.title.clone();
        let requester = j.requester_channel.clone();
        let attempts = j.attempt_count;
        drop(j);

        // The receiver may be gone during shutdown; the error log above
        // already carries the record.
        let _ = self.failures.send(record);

        if self.notify_on_failure {
            let message = failure_message(&title, attempts);
            if let Err(e) = self.notifier.notify(&requester, &message).await {
                warn!("Job {}: failure notice undelivered: {}", job_id, e);
            }
        }

        self.queue.ack(&job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::JobStatus;
    use crate::executor::SimulatedExecutor;
    use crate::models::ScanTarget;
    use crate::notify::LogNotifier;
    use crate::store::SqliteStore;

    async fn pool_with_queue(queue: Arc<JobQueue>, config: &Config) -> Arc<WorkerPool> {
        let store: Arc<dyn ResultStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        let advisory =
            Arc::new(AdvisoryClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
        let (pool, _rx) = WorkerPool::new(
            queue,
            advisory,
            Arc::new(SimulatedExecutor),
            store,
            Arc::new(LogNotifier),
            config,
        );
        pool
    }

    #[tokio::test]
    async fn backoff_doubles_per_attempt() {
        let config = Config {
            base_backoff: Duration::from_secs(60),
            ..Config::default()
        };
        let pool = pool_with_queue(JobQueue::new(), &config).await;

        assert_eq!(pool.backoff_delay(1), Duration::from_secs(60));
        assert_eq!(pool.backoff_delay(2), Duration::from_secs(120));
        assert_eq!(pool.backoff_delay(3), Duration::from_secs(240));
    }

    #[tokio::test]
    async fn redelivered_terminal_job_is_not_rerun() {
        let queue = JobQueue::new();
        let pool = pool_with_queue(Arc::clone(&queue), &Config::default()).await;

        let target = ScanTarget::new("t1", "Example", "https://example.com", "GET", "id", "");
        let job_id = queue.enqueue("chat-1", target).await;
        queue.get(&job_id).await.unwrap().lock().await.mark_succeeded();

        queue.close();
        pool.run(1).await;

        let job = queue.get(&job_id).await.unwrap();
        let j = job.lock().await;
        assert_eq!(j.status, JobStatus::Succeeded);
        assert_eq!(j.attempt_count, 0, "a finished job must not re-enter Running");
        assert_eq!(queue.in_flight_len().await, 0);
    }
}
