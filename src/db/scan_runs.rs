//! Scan run database repository
//!
//! One row per scanner execution, with counters and structured per-file
//! error details.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::sqlite_helpers::{json_to_vec, vec_to_json};

/// Structured detail for a single per-file scan error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanErrorDetail {
    pub path: String,
    /// Error kind label, e.g. "probe_failed", "io", "unresolved"
    pub kind: String,
    pub message: String,
}

/// Scan run record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScanRunRecord {
    pub id: i64,
    /// full | incremental
    pub kind: String,
    /// JSON array of logical roots
    pub roots: String,
    /// running | completed | failed
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_found: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_unchanged: i64,
    pub files_deleted: i64,
    pub errors_count: i64,
    /// JSON array of [`ScanErrorDetail`]
    pub error_details: String,
    pub failure_reason: Option<String>,
}

impl ScanRunRecord {
    pub fn root_list(&self) -> Vec<String> {
        json_to_vec(&self.roots)
    }

    pub fn error_detail_list(&self) -> Vec<ScanErrorDetail> {
        json_to_vec(&self.error_details)
    }
}

/// Final counters written when a run finishes
#[derive(Debug, Clone, Default)]
pub struct ScanRunTotals {
    pub files_found: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_unchanged: i64,
    pub files_deleted: i64,
}

pub struct ScanRunRepository {
    pool: SqlitePool,
}

impl ScanRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record the start of a scan
    pub async fn create(&self, kind: &str, roots: &[String], now: DateTime<Utc>) -> Result<ScanRunRecord> {
        let record = sqlx::query_as::<_, ScanRunRecord>(
            r#"
            INSERT INTO scan_runs (kind, roots, status, started_at)
            VALUES (?, ?, 'running', ?)
            RETURNING id, kind, roots, status, started_at, finished_at,
                      files_found, files_new, files_updated, files_unchanged,
                      files_deleted, errors_count, error_details, failure_reason
            "#,
        )
        .bind(kind)
        .bind(vec_to_json(roots))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Finalize a run with its counters and status
    pub async fn finalize(
        &self,
        id: i64,
        status: &str,
        totals: &ScanRunTotals,
        errors: &[ScanErrorDetail],
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ScanRunRecord> {
        let record = sqlx::query_as::<_, ScanRunRecord>(
            r#"
            UPDATE scan_runs SET
                status = ?, finished_at = ?,
                files_found = ?, files_new = ?, files_updated = ?,
                files_unchanged = ?, files_deleted = ?,
                errors_count = ?, error_details = ?, failure_reason = ?
            WHERE id = ?
            RETURNING id, kind, roots, status, started_at, finished_at,
                      files_found, files_new, files_updated, files_unchanged,
                      files_deleted, errors_count, error_details, failure_reason
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(totals.files_found)
        .bind(totals.files_new)
        .bind(totals.files_updated)
        .bind(totals.files_unchanged)
        .bind(totals.files_deleted)
        .bind(errors.len() as i64)
        .bind(vec_to_json(errors))
        .bind(failure_reason)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }
}
