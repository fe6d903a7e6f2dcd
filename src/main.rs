use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use env_logger::Env;
use log::{error, info, warn};
use uuid::Uuid;

use scan_dispatch::advisory::AdvisoryClient;
use scan_dispatch::cli::Args;
use scan_dispatch::config::Config;
use scan_dispatch::dispatch::{JobQueue, WorkerPool};
use scan_dispatch::executor::SimulatedExecutor;
use scan_dispatch::models::ScanTarget;
use scan_dispatch::notify::{LogNotifier, Notifier, TelegramNotifier};
use scan_dispatch::store::{ResultStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::from_env();
    args.apply_to(&mut config);

    let url = match &args.url {
        Some(u) => u.clone(),
        None => {
            println!("No target URL given. Nothing to do.");
            return Ok(());
        }
    };

    let store: Arc<dyn ResultStore> = Arc::new(SqliteStore::new(&config.database_url).await?);

    let advisory = Arc::new(AdvisoryClient::new(&config.advisory_url, config.advisory_timeout)?);
    if advisory.health().await {
        info!("Advisory endpoint {} is healthy", config.advisory_url);
    } else {
        warn!(
            "Advisory endpoint {} is unreachable; scans will use fallback params",
            config.advisory_url
        );
    }

    let notifier: Arc<dyn Notifier> = match &config.telegram_token {
        Some(token) => Arc::new(TelegramNotifier::new(token)),
        None => Arc::new(LogNotifier),
    };

    let target_id = args.target_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let title = args.title.clone().unwrap_or_else(|| url.clone());
    let target = ScanTarget::new(&target_id, &title, &url, &args.method, &args.param, &args.instructions);
    store.upsert_target(&target).await?;

    let queue = JobQueue::new();
    let (pool, mut failures) = WorkerPool::new(
        Arc::clone(&queue),
        advisory,
        Arc::new(SimulatedExecutor),
        Arc::clone(&store),
        notifier,
        &config,
    );

    // Operator-visible failure stream.
    let failure_drain = tokio::spawn(async move {
        while let Some(record) = failures.recv().await {
            error!(
                "TERMINAL FAILURE job={} target={} attempts={} last_error={}",
                record.job_id, record.target_id, record.attempt_count, record.last_error
            );
        }
    });

    let job_id = queue.enqueue(&args.requester, target).await;
    println!("{} job {} accepted for {}", "OK".green().bold(), job_id, url);

    let pool_handle = tokio::spawn(pool.run(config.workers));

    tokio::select! {
        _ = wait_terminal(&queue, &job_id) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown requested; draining workers");
        }
    }

    queue.close();
    let _ = pool_handle.await;
    // Only after the workers have stopped: anything still in flight was
    // interrupted and goes back on the queue instead of being lost.
    queue.requeue_in_flight().await;
    failure_drain.abort();

    print_summary(&store, &job_id).await;
    Ok(())
}

async fn wait_terminal(queue: &Arc<JobQueue>, job_id: &Uuid) {
    loop {
        match queue.status(job_id).await {
            Some(status) if status.is_terminal() => return,
            Some(_) => tokio::time::sleep(Duration::from_millis(200)).await,
            None => return,
        }
    }
}

async fn print_summary(store: &Arc<dyn ResultStore>, job_id: &Uuid) {
    println!("\n{}", "Scan Summary".bold().underline());

    match store.get_report(job_id).await {
        Ok(Some(report)) => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Job", "Attempt", "Findings", "Duration (s)", "Params"]);
            table.add_row(vec![
                report.job_id.to_string(),
                report.attempt.to_string(),
                report.findings_count.to_string(),
                report.duration_seconds.to_string(),
                format!("{:?}", report.advisory_params.source),
            ]);
            println!("{table}");

            for finding in &report.findings {
                println!(
                    "  {} {} (confidence {:.2})",
                    finding.severity.red().bold(),
                    finding.kind,
                    finding.confidence
                );
            }
        }
        Ok(None) => println!("{}", "No report persisted for this job.".yellow()),
        Err(e) => error!("Could not load report: {}", e),
    }

    match store.system_stats().await {
        Ok(stats) => println!(
            "\nTargets: {}  Reports: {}  Vulnerabilities: {}  Hit rate: {}%",
            stats.total_targets, stats.total_reports, stats.total_vulnerabilities, stats.success_rate
        ),
        Err(e) => error!("Could not load stats: {}", e),
    }
}
