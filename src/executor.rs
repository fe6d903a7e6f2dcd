//! Scan execution seam.
//!
//! The pipeline does not care how a scan happens, only that execution either
//! produces findings or fails within the caller's deadline, and that
//! repeating it on retry has no partial side effects visible elsewhere.

use async_trait::async_trait;
use rand::Rng;

use crate::errors::ExecutionError;
use crate::models::{AdvisoryParams, Finding, RawScanResult, ScanTarget};

#[async_trait]
pub trait ScanExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &ScanTarget,
        params: &AdvisoryParams,
    ) -> Result<RawScanResult, ExecutionError>;
}

/// Stochastic stand-in for a real scan engine: ~30% of runs yield one to
/// three findings. Safe to repeat; it touches nothing outside its return
/// value.
pub struct SimulatedExecutor;

const VULN_TYPES: [&str; 5] = ["XSS", "SQLi", "CSRF", "Info Disclosure", "RCE"];
const SEVERITIES: [&str; 4] = ["Low", "Medium", "High", "Critical"];

#[async_trait]
impl ScanExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        _target: &ScanTarget,
        _params: &AdvisoryParams,
    ) -> Result<RawScanResult, ExecutionError> {
        let mut rng = rand::thread_rng();
        let duration_seconds = (rng.gen_range(30.0..120.0_f64) * 100.0).round() / 100.0;

        let mut findings = Vec::new();
        if rng.gen::<f64>() < 0.3 {
            for _ in 0..rng.gen_range(1..=3) {
                findings.push(Finding {
                    kind: VULN_TYPES[rng.gen_range(0..VULN_TYPES.len())].to_string(),
                    severity: SEVERITIES[rng.gen_range(0..SEVERITIES.len())].to_string(),
                    confidence: (rng.gen_range(0.70..0.95_f64) * 100.0).round() / 100.0,
                });
            }
        }

        Ok(RawScanResult { findings, duration_seconds })
    }
}
