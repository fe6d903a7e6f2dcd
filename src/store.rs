//! Result store: the single source of truth for persisted reports and
//! per-target counters.

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::models::{ScanReport, ScanTarget, SystemStats};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Register a target or refresh its descriptive fields. Counters are
    /// never touched here.
    async fn upsert_target(&self, target: &ScanTarget) -> Result<(), PersistenceError>;

    async fn get_target(&self, target_id: &str) -> Result<Option<ScanTarget>, PersistenceError>;

    /// Persist a report. Idempotent per (job_id, attempt): a duplicate write
    /// is suppressed and returns the id of the existing row.
    async fn save_report(&self, report: &ScanReport) -> Result<i64, PersistenceError>;

    /// Atomic counter bump after a completed scan. Single UPDATE statement;
    /// correct under concurrent completions for the same target.
    async fn increment_target_counters(
        &self,
        target_id: &str,
        findings_count: i64,
    ) -> Result<(), PersistenceError>;

    async fn get_report(&self, job_id: &Uuid) -> Result<Option<ScanReport>, PersistenceError>;

    async fn report_count(&self, job_id: &Uuid) -> Result<i64, PersistenceError>;

    async fn system_stats(&self) -> Result<SystemStats, PersistenceError>;
}

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = SqliteStore { pool };
        store.init_schema().await?;
        info!("Result store ready at {}", database_url);
        Ok(store)
    }

    /// Private in-memory database, one connection so every query sees the
    /// same data. Used by tests.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = SqliteStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                target_url TEXT NOT NULL,
                method TEXT NOT NULL,
                param TEXT NOT NULL,
                instructions TEXT NOT NULL DEFAULT '',
                last_scan_at DATETIME,
                vulnerabilities_found_total INTEGER NOT NULL DEFAULT 0,
                total_scans INTEGER NOT NULL DEFAULT 0
            );",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                target_id TEXT NOT NULL,
                requester_channel TEXT NOT NULL,
                timestamp DATETIME NOT NULL,
                findings TEXT NOT NULL,
                findings_count INTEGER NOT NULL,
                duration_seconds REAL NOT NULL,
                advisory_params TEXT NOT NULL,
                UNIQUE(job_id, attempt)
            );",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn report_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScanReport, PersistenceError> {
        let job_id: String = row.get("job_id");
        let job_id = Uuid::from_str(&job_id)
            .map_err(|e| PersistenceError::Database(sqlx::Error::Decode(Box::new(e))))?;
        let findings_json: String = row.get("findings");
        let params_json: String = row.get("advisory_params");

        Ok(ScanReport {
            report_id: Some(row.get::<i64, _>("id")),
            job_id,
            attempt: row.get::<i64, _>("attempt") as u32,
            target_id: row.get("target_id"),
            requester_channel: row.get("requester_channel"),
            timestamp: row.get("timestamp"),
            findings: serde_json::from_str(&findings_json)?,
            findings_count: row.get("findings_count"),
            duration_seconds: row.get("duration_seconds"),
            advisory_params: serde_json::from_str(&params_json)?,
        })
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn upsert_target(&self, target: &ScanTarget) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO targets (id, title, target_url, method, param, instructions)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                target_url = excluded.target_url,
                method = excluded.method,
                param = excluded.param,
                instructions = excluded.instructions",
        )
        .bind(&target.id)
        .bind(&target.title)
        .bind(&target.target_url)
        .bind(&target.method)
        .bind(&target.param)
        .bind(&target.instructions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<ScanTarget>, PersistenceError> {
        let target = sqlx::query_as::<_, ScanTarget>("SELECT * FROM targets WHERE id = ?")
            .bind(target_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(target)
    }

    async fn save_report(&self, report: &ScanReport) -> Result<i64, PersistenceError> {
        // Referential invariant: every report must resolve to a target.
        if self.get_target(&report.target_id).await?.is_none() {
            return Err(PersistenceError::TargetMissing(report.target_id.clone()));
        }

        let findings_json = serde_json::to_string(&report.findings)?;
        let params_json = serde_json::to_string(&report.advisory_params)?;

        sqlx::query(
            "INSERT INTO reports
                (job_id, attempt, target_id, requester_channel, timestamp,
                 findings, findings_count, duration_seconds, advisory_params)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(job_id, attempt) DO NOTHING",
        )
        .bind(report.job_id.to_string())
        .bind(report.attempt as i64)
        .bind(&report.target_id)
        .bind(&report.requester_channel)
        .bind(report.timestamp)
        .bind(findings_json)
        .bind(report.findings_count)
        .bind(report.duration_seconds)
        .bind(params_json)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query("SELECT id FROM reports WHERE job_id = ? AND attempt = ?")
            .bind(report.job_id.to_string())
            .bind(report.attempt as i64)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        Ok(id)
    }

    async fn increment_target_counters(
        &self,
        target_id: &str,
        findings_count: i64,
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            "UPDATE targets SET
                vulnerabilities_found_total = vulnerabilities_found_total + ?,
                total_scans = total_scans + 1,
                last_scan_at = ?
             WHERE id = ?",
        )
        .bind(findings_count)
        .bind(Utc::now())
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::TargetMissing(target_id.to_string()));
        }
        Ok(())
    }

    async fn get_report(&self, job_id: &Uuid) -> Result<Option<ScanReport>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM reports WHERE job_id = ? ORDER BY attempt DESC LIMIT 1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::report_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn report_count(&self, job_id: &Uuid) -> Result<i64, PersistenceError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reports WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn system_stats(&self) -> Result<SystemStats, PersistenceError> {
        let (total_targets,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM targets")
            .fetch_one(&self.pool)
            .await?;
        let (total_reports,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        let (total_vulnerabilities,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(findings_count), 0) FROM reports")
                .fetch_one(&self.pool)
                .await?;
        let (with_findings,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM reports WHERE findings_count > 0")
                .fetch_one(&self.pool)
                .await?;

        let success_rate = if total_reports > 0 {
            (with_findings as f64 / total_reports as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(SystemStats {
            total_targets,
            total_reports,
            total_vulnerabilities,
            success_rate,
        })
    }
}
