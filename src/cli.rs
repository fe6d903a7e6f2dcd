use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "scan-dispatch")]
#[command(version)]
#[command(about = "Queued scan execution with bounded retries, advisory tuning, and durable reports.", long_about = None)]
pub struct Args {
    /// Target URL to register and scan.
    #[arg(short, long)]
    pub url: Option<String>,

    /// HTTP method of the target (GET/POST).
    #[arg(short, long, default_value = "GET")]
    pub method: String,

    /// Parameter of interest on the target.
    #[arg(short, long, default_value = "id")]
    pub param: String,

    /// Stable target identifier; defaults to a fresh one.
    #[arg(long)]
    pub target_id: Option<String>,

    /// Human-readable target title used in notifications.
    #[arg(long)]
    pub title: Option<String>,

    /// Operator instructions attached to the target record.
    #[arg(long, default_value = "")]
    pub instructions: String,

    /// Requester channel (chat id) that receives the completion notice.
    #[arg(short, long, default_value = "operator")]
    pub requester: String,

    /// Number of worker units in the pool.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Advisory endpoint base URL (overrides ADVISORY_URL).
    #[arg(long)]
    pub advisory_url: Option<String>,

    /// Database URL (overrides DATABASE_URL).
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum pipeline attempts per job.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Base backoff in seconds; retry n waits base * 2^(n-1).
    #[arg(long)]
    pub base_backoff_secs: Option<u64>,

    /// Deadline in seconds for one scan execution.
    #[arg(long)]
    pub exec_deadline_secs: Option<u64>,

    /// Timeout in seconds for one advisory request.
    #[arg(long)]
    pub advisory_timeout_secs: Option<u64>,

    /// Also tell the requester when a job exhausts its retries.
    #[arg(long)]
    pub notify_on_failure: bool,
}

impl Args {
    /// Fold CLI overrides on top of the environment configuration.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(url) = &self.advisory_url {
            config.advisory_url = url.clone();
        }
        if let Some(db) = &self.database_url {
            config.database_url = db.clone();
        }
        if let Some(n) = self.max_attempts {
            config.max_attempts = n;
        }
        if let Some(s) = self.base_backoff_secs {
            config.base_backoff = std::time::Duration::from_secs(s);
        }
        if let Some(s) = self.exec_deadline_secs {
            config.exec_deadline = std::time::Duration::from_secs(s);
        }
        if let Some(s) = self.advisory_timeout_secs {
            config.advisory_timeout = std::time::Duration::from_secs(s);
        }
        if let Some(w) = self.workers {
            config.workers = w;
        }
        if self.notify_on_failure {
            config.notify_on_failure = true;
        }
    }
}
