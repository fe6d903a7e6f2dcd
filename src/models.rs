use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered scan target. Immutable once referenced by a report, except
/// for the two derived counters which only the result store mutates.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct ScanTarget {
    pub id: String,
    pub title: String,
    pub target_url: String,
    pub method: String,
    pub param: String,
    pub instructions: String,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub vulnerabilities_found_total: i64,
    pub total_scans: i64,
}

impl ScanTarget {
    pub fn new(id: &str, title: &str, target_url: &str, method: &str, param: &str, instructions: &str) -> Self {
        ScanTarget {
            id: id.to_string(),
            title: title.to_string(),
            target_url: target_url.to_string(),
            method: method.to_string(),
            param: param.to_string(),
            instructions: instructions.to_string(),
            last_scan_at: None,
            vulnerabilities_found_total: 0,
            total_scans: 0,
        }
    }
}

/// One vulnerability observation produced by a scan attempt.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Finding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Raw output of one scan execution, before compilation into a report.
#[derive(Debug, Clone)]
pub struct RawScanResult {
    pub findings: Vec<Finding>,
    pub duration_seconds: f64,
}

/// Where a parameter tuple came from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamSource {
    Model,
    Fallback,
}

/// Scan tuning parameters. Always fully populated: either the advisory
/// model's validated suggestion or the entire fixed fallback tuple, never a
/// field-by-field mix.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AdvisoryParams {
    pub rate: u32,
    pub intensity: f64,
    pub accuracy: f64,
    pub timeout: u64,
    pub source: ParamSource,
}

impl AdvisoryParams {
    /// The fixed tuple used whenever the advisory oracle cannot be trusted.
    pub fn fallback() -> Self {
        AdvisoryParams {
            rate: 1000,
            intensity: 0.5,
            accuracy: 0.5,
            timeout: 30,
            source: ParamSource::Fallback,
        }
    }
}

/// Durable record of one successful scan attempt. Created exactly once per
/// job that succeeds (for the successful attempt only), immutable after that.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScanReport {
    /// Store-assigned row id, None until persisted.
    pub report_id: Option<i64>,
    pub job_id: Uuid,
    pub attempt: u32,
    pub target_id: String,
    pub requester_channel: String,
    pub timestamp: DateTime<Utc>,
    pub findings: Vec<Finding>,
    pub findings_count: i64,
    pub duration_seconds: f64,
    pub advisory_params: AdvisoryParams,
}

/// Aggregate counters across the whole store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemStats {
    pub total_targets: i64,
    pub total_reports: i64,
    pub total_vulnerabilities: i64,
    /// Percentage of reports that carried at least one finding.
    pub success_rate: f64,
}
