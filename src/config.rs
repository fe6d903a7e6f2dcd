//! Environment-style configuration with defaults.

use std::env;
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the advisory endpoint, e.g. http://localhost:5000
    pub advisory_url: String,
    pub database_url: String,
    /// Maximum pipeline attempts per job before it is marked failed.
    pub max_attempts: u32,
    /// Backoff base: retry n waits base * 2^(n-1).
    pub base_backoff: Duration,
    /// Deadline for one scan execution.
    pub exec_deadline: Duration,
    /// Timeout for one advisory request.
    pub advisory_timeout: Duration,
    pub workers: usize,
    /// Telegram bot token; when absent, notifications go to the log.
    pub telegram_token: Option<String>,
    /// Whether the requester is told about terminal job failure.
    pub notify_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            advisory_url: "http://localhost:5000".to_string(),
            database_url: "sqlite:dispatch.db".to_string(),
            max_attempts: 3,
            base_backoff: Duration::from_secs(60),
            exec_deadline: Duration::from_secs(120),
            advisory_timeout: Duration::from_secs(10),
            workers: 4,
            telegram_token: None,
            notify_on_failure: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            advisory_url: env::var("ADVISORY_URL").unwrap_or(defaults.advisory_url),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_attempts: env_parse("MAX_ATTEMPTS", defaults.max_attempts),
            base_backoff: Duration::from_secs(env_parse("BASE_BACKOFF_SECS", defaults.base_backoff.as_secs())),
            exec_deadline: Duration::from_secs(env_parse("EXEC_DEADLINE_SECS", defaults.exec_deadline.as_secs())),
            advisory_timeout: Duration::from_secs(env_parse("ADVISORY_TIMEOUT_SECS", defaults.advisory_timeout.as_secs())),
            workers: env_parse("WORKERS", defaults.workers),
            telegram_token: env::var("TELEGRAM_TOKEN").ok().filter(|t| !t.is_empty()),
            notify_on_failure: env_parse_flag("NOTIFY_ON_FAILURE", false),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Boolean env vars accept the usual truthy/falsy spellings, not just
/// `true`/`false`.
fn env_parse_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!("Ignoring unparseable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
