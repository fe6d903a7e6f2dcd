//! In-process job queue.
//!
//! Enqueue is a non-blocking accept-ack; it says the job was taken in, not
//! that it succeeded. Dequeue hands each job to exactly one worker. Jobs in
//! flight are tracked so a shutdown can requeue them instead of losing them,
//! and retry delays are rescheduled through a spawned timer so the worker is
//! free to process other jobs during the backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use super::job::{JobStatus, ScanJob};
use crate::models::ScanTarget;

pub struct JobQueue {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<ScanJob>>>>,
    pending: Mutex<VecDeque<Uuid>>,
    in_flight: Mutex<HashSet<Uuid>>,
    wakeup: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(JobQueue {
            jobs: RwLock::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashSet::new()),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Accept a scan request. Returns the job id immediately; the outcome
    /// arrives later through the notifier or the failure stream.
    pub async fn enqueue(&self, requester_channel: &str, target: ScanTarget) -> Uuid {
        let job = ScanJob::new(requester_channel, target);
        let job_id = job.job_id;
        info!("Accepted job {} for target {}", job_id, job.target.id);

        self.jobs.write().await.insert(job_id, Arc::new(Mutex::new(job)));
        self.pending.lock().await.push_back(job_id);
        self.wakeup.notify_one();
        job_id
    }

    /// Take the next job, waiting if none is pending. Returns None once the
    /// queue is closed and drained. The returned job is in flight until
    /// `ack` or a requeue.
    pub async fn pop(&self) -> Option<Arc<Mutex<ScanJob>>> {
        loop {
            // Register for a wakeup before re-checking, so a notify between
            // the check and the await is not lost.
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut pending = self.pending.lock().await;
                let id = pending.pop_front();
                // Pass the baton: one permit can hide further pending jobs
                // from the other workers.
                if id.is_some() && !pending.is_empty() {
                    self.wakeup.notify_one();
                }
                id
            };

            if let Some(job_id) = next {
                self.in_flight.lock().await.insert(job_id);
                if let Some(job) = self.jobs.read().await.get(&job_id).cloned() {
                    return Some(job);
                }
                // Unknown id; drop it and keep going.
                self.in_flight.lock().await.remove(&job_id);
                continue;
            }

            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Mark a job as no longer in flight (it reached a terminal state).
    pub async fn ack(&self, job_id: &Uuid) {
        self.in_flight.lock().await.remove(job_id);
    }

    /// Reschedule a retrying job after its backoff delay. The delay runs on
    /// a spawned timer, not in the worker.
    pub fn requeue_after(self: &Arc<Self>, job_id: Uuid, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.in_flight.lock().await.remove(&job_id);
            if queue.restore_pending(job_id).await {
                queue.wakeup.notify_one();
                debug!("Job {} requeued after {:?} backoff", job_id, delay);
            }
        });
    }

    /// Redeliver everything currently in flight. Called on shutdown, after
    /// the workers have stopped, so partially processed jobs are re-run
    /// rather than lost. Jobs that already reached a terminal state stay
    /// terminal.
    pub async fn requeue_in_flight(&self) {
        let drained: Vec<Uuid> = self.in_flight.lock().await.drain().collect();
        let mut restored = 0usize;
        for job_id in drained {
            if self.restore_pending(job_id).await {
                restored += 1;
            }
        }
        if restored > 0 {
            info!("Requeued {} in-flight job(s)", restored);
            self.wakeup.notify_one();
        }
    }

    /// Put a job back on the pending list unless it is already there or has
    /// reached a terminal state. Redelivery paths can race (backoff timer vs
    /// shutdown requeue); this keeps each job queued at most once.
    async fn restore_pending(&self, job_id: Uuid) -> bool {
        let terminal = match self.jobs.read().await.get(&job_id) {
            Some(job) => job.lock().await.status.is_terminal(),
            None => true,
        };
        if terminal {
            return false;
        }
        let mut pending = self.pending.lock().await;
        if pending.contains(&job_id) {
            return false;
        }
        pending.push_back(job_id);
        true
    }

    /// Stop accepting waits: workers drain what is pending and then exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wakeup.notify_waiters();
    }

    pub async fn get(&self, job_id: &Uuid) -> Option<Arc<Mutex<ScanJob>>> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn status(&self, job_id: &Uuid) -> Option<JobStatus> {
        let job = self.get(job_id).await?;
        let status = job.lock().await.status;
        Some(status)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
