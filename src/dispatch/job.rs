//! Scan job lifecycle.
//!
//! A job tracks one request to scan a target through its retry lifecycle.
//! The queue owns job state in memory; nothing else mutates it.

use uuid::Uuid;

use crate::models::ScanTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One request to scan a target. Carries a snapshot of the target so a
/// concurrent edit to the registry cannot change a job mid-flight.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub job_id: Uuid,
    pub requester_channel: String,
    pub target: ScanTarget,
    /// Number of transitions into Running so far.
    pub attempt_count: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl ScanJob {
    pub fn new(requester_channel: &str, target: ScanTarget) -> Self {
        ScanJob {
            job_id: Uuid::new_v4(),
            requester_channel: requester_channel.to_string(),
            target,
            attempt_count: 0,
            status: JobStatus::Queued,
            last_error: None,
        }
    }

    /// Transition into Running. Every attempt, first or retried, goes
    /// through here so the attempt count stays honest.
    pub fn begin_attempt(&mut self) {
        self.status = JobStatus::Running;
        self.attempt_count += 1;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = JobStatus::Succeeded;
    }

    pub fn mark_retrying(&mut self, error: &str) {
        self.status = JobStatus::Retrying;
        self.last_error = Some(error.to_string());
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.to_string());
    }
}

/// Terminal failure record, emitted to the operator-visible failure stream
/// when a job runs out of attempts. Never silently dropped.
#[derive(Debug, Clone)]
pub struct ExhaustedJob {
    pub job_id: Uuid,
    pub target_id: String,
    pub attempt_count: u32,
    pub last_error: String,
}
