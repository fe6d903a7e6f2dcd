//! Advisory Client
//!
//! Wraps the external parameter-advisory endpoint. The contract is that
//! `suggest` never fails outward: any transport error, non-2xx status,
//! malformed payload, or out-of-range value yields the fixed fallback tuple.
//! The client never retries on its own; the worker's job-level retry loop is
//! the only retry path, so timeouts do not compound.

use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AdvisoryUnavailable;
use crate::models::{AdvisoryParams, ParamSource, ScanTarget};

pub struct AdvisoryClient {
    http: reqwest::Client,
    base_url: String,
}

/// Raw response schema of POST /suggest. Fields are validated before they
/// become an `AdvisoryParams`; unknown members (e.g. model_version) are
/// ignored.
#[derive(Debug, Deserialize)]
struct SuggestResponse {
    rate: f64,
    intensity: f64,
    accuracy: f64,
    timeout: f64,
}

impl AdvisoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(AdvisoryClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the advisory oracle for scan tuning. Never fails: falls back to
    /// the fixed tuple when the oracle is unreachable or untrustworthy.
    pub async fn suggest(&self, target: &ScanTarget) -> AdvisoryParams {
        match self.request(target).await {
            Ok(params) => {
                debug!("Advisory suggestion for {}: {:?}", target.id, params);
                params
            }
            Err(e) => {
                warn!("Advisory unavailable for {} ({}); using fallback params", target.id, e);
                AdvisoryParams::fallback()
            }
        }
    }

    async fn request(&self, target: &ScanTarget) -> Result<AdvisoryParams, AdvisoryUnavailable> {
        let body = json!({
            "target": target.target_url,
            "method": target.method,
            "param": target.param,
        });

        let resp = self
            .http
            .post(format!("{}/suggest", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AdvisoryUnavailable::Status(status.as_u16()));
        }

        let suggestion: SuggestResponse = resp
            .json()
            .await
            .map_err(|e| AdvisoryUnavailable::Malformed(e.to_string()))?;

        Self::validate(suggestion)
    }

    /// Range-check a structurally valid response. A semantically unusable
    /// value rejects the whole tuple; there is no field-by-field salvage.
    fn validate(resp: SuggestResponse) -> Result<AdvisoryParams, AdvisoryUnavailable> {
        if !resp.rate.is_finite() || resp.rate <= 0.0 {
            return Err(AdvisoryUnavailable::OutOfRange(format!("rate={}", resp.rate)));
        }
        if !(0.0..=1.0).contains(&resp.intensity) {
            return Err(AdvisoryUnavailable::OutOfRange(format!("intensity={}", resp.intensity)));
        }
        if !(0.0..=1.0).contains(&resp.accuracy) {
            return Err(AdvisoryUnavailable::OutOfRange(format!("accuracy={}", resp.accuracy)));
        }
        if !resp.timeout.is_finite() || resp.timeout <= 0.0 {
            return Err(AdvisoryUnavailable::OutOfRange(format!("timeout={}", resp.timeout)));
        }

        Ok(AdvisoryParams {
            rate: resp.rate as u32,
            intensity: resp.intensity,
            accuracy: resp.accuracy,
            timeout: resp.timeout as u64,
            source: ParamSource::Model,
        })
    }

    /// Liveness probe against GET /health, used by operator tooling.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
