//! Report Compiler: turns a raw scan result into a durable report record.

use std::sync::Arc;

use chrono::Utc;

use crate::dispatch::job::ScanJob;
use crate::errors::PersistenceError;
use crate::models::{AdvisoryParams, RawScanResult, ScanReport};
use crate::store::ResultStore;

pub struct ReportCompiler {
    store: Arc<dyn ResultStore>,
}

impl ReportCompiler {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        ReportCompiler { store }
    }

    /// Pure construction: stamps the timestamp and derives the finding count.
    pub fn compile(&self, job: &ScanJob, raw: RawScanResult, params: AdvisoryParams) -> ScanReport {
        ScanReport {
            report_id: None,
            job_id: job.job_id,
            attempt: job.attempt_count,
            target_id: job.target.id.clone(),
            requester_channel: job.requester_channel.clone(),
            timestamp: Utc::now(),
            findings_count: raw.findings.len() as i64,
            findings: raw.findings,
            duration_seconds: raw.duration_seconds,
            advisory_params: params,
        }
    }

    /// The single store write. A failure here does not invalidate the
    /// compiled report; the caller still holds it and decides what to do.
    pub async fn persist(&self, report: &ScanReport) -> Result<i64, PersistenceError> {
        self.store.save_report(report).await
    }
}
