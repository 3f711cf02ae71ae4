//! Pending deletion database repository
//!
//! One row per staged artifact awaiting human approval. A row is live while
//! `deleted_at` is null; approval stamps `deleted_at` and the row becomes
//! terminal. Rows are only removed by restore (or administrative cleanup of
//! the table itself).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sqlx::{SqliteConnection, SqlitePool};

use super::sqlite_helpers::{from_json, to_json};

/// Known shapes of the free-form deletion metadata column
///
/// Persisted as schema-less JSON; unknown shapes round-trip untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionMetadata {
    /// The source file was already gone when staging ran; nothing was moved
    SourceMissing,
    /// Normal staging: the artifact was moved into the holding area
    Staged { staged_filename: String },
    /// Anything this build does not recognize
    Unknown(Value),
}

impl DeletionMetadata {
    pub fn source_missing(&self) -> bool {
        match self {
            Self::SourceMissing => true,
            Self::Staged { .. } => false,
            Self::Unknown(value) => value
                .get("source_missing")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::SourceMissing => json!({ "source_missing": true }),
            Self::Staged { staged_filename } => json!({
                "source_missing": false,
                "staged_filename": staged_filename,
            }),
            Self::Unknown(value) => value.clone(),
        }
    }

    pub fn from_value(value: Value) -> Self {
        match value.get("source_missing").and_then(Value::as_bool) {
            Some(true) => Self::SourceMissing,
            Some(false) => {
                if let Some(name) = value.get("staged_filename").and_then(Value::as_str) {
                    Self::Staged {
                        staged_filename: name.to_string(),
                    }
                } else {
                    Self::Unknown(value)
                }
            }
            None => Self::Unknown(value),
        }
    }
}

/// Pending deletion record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingDeletionRecord {
    pub id: i64,
    pub asset_id: i64,
    pub original_logical_path: String,
    /// Null when the source was already missing at stage time
    pub staged_path: Option<String>,
    pub size_bytes: i64,
    pub reason: String,
    pub group_id: Option<i64>,
    pub better_asset_id: Option<i64>,
    pub quality_delta: Option<i64>,
    pub language_concern: bool,
    pub language_concern_reason: Option<String>,
    pub staged_at: DateTime<Utc>,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    /// Terminal once set
    pub deleted_at: Option<DateTime<Utc>>,
    /// JSON; decode with [`PendingDeletionRecord::metadata`]
    pub metadata: String,
}

impl PendingDeletionRecord {
    pub fn metadata(&self) -> DeletionMetadata {
        from_json::<Value>(&self.metadata)
            .map(DeletionMetadata::from_value)
            .unwrap_or(DeletionMetadata::Unknown(Value::Null))
    }

    pub fn is_terminal(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for creating a pending deletion
#[derive(Debug, Clone)]
pub struct CreatePendingDeletion {
    pub asset_id: i64,
    pub original_logical_path: String,
    pub staged_path: Option<String>,
    pub size_bytes: i64,
    pub reason: String,
    pub group_id: Option<i64>,
    pub better_asset_id: Option<i64>,
    pub quality_delta: Option<i64>,
    pub language_concern: bool,
    pub language_concern_reason: Option<String>,
    pub metadata: DeletionMetadata,
}

const PENDING_COLUMNS: &str = r#"
    id, asset_id, original_logical_path, staged_path, size_bytes, reason,
    group_id, better_asset_id, quality_delta, language_concern,
    language_concern_reason, staged_at, approved, approved_at, approved_by,
    deleted_at, metadata
"#;

pub struct PendingDeletionRepository {
    pool: SqlitePool,
}

impl PendingDeletionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a pending deletion by id
    pub async fn get_by_id(&self, id: i64) -> Result<Option<PendingDeletionRecord>> {
        let record = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_deletions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get the live (not yet deleted) pending row for an asset, if any
    pub async fn live_for_asset(&self, asset_id: i64) -> Result<Option<PendingDeletionRecord>> {
        let record = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_deletions WHERE asset_id = ? AND deleted_at IS NULL"
        ))
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all live pending deletions, oldest first
    pub async fn list_live(&self) -> Result<Vec<PendingDeletionRecord>> {
        let records = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_deletions WHERE deleted_at IS NULL ORDER BY staged_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List rows the retention sweep may purge: already approved, not yet
    /// deleted, staged before the cutoff
    pub async fn list_approved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PendingDeletionRecord>> {
        let records = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            r#"
            SELECT {PENDING_COLUMNS} FROM pending_deletions
            WHERE approved = 1 AND deleted_at IS NULL AND staged_at < ?
            ORDER BY staged_at
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Insert a new pending deletion
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        input: &CreatePendingDeletion,
        now: DateTime<Utc>,
    ) -> Result<PendingDeletionRecord> {
        let record = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            r#"
            INSERT INTO pending_deletions (
                asset_id, original_logical_path, staged_path, size_bytes,
                reason, group_id, better_asset_id, quality_delta,
                language_concern, language_concern_reason, staged_at, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {PENDING_COLUMNS}
            "#
        ))
        .bind(input.asset_id)
        .bind(&input.original_logical_path)
        .bind(&input.staged_path)
        .bind(input.size_bytes)
        .bind(&input.reason)
        .bind(input.group_id)
        .bind(input.better_asset_id)
        .bind(input.quality_delta)
        .bind(input.language_concern)
        .bind(&input.language_concern_reason)
        .bind(now)
        .bind(to_json(&input.metadata.to_value()))
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Stamp a row approved and deleted in one step
    pub async fn mark_approved_deleted(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        approver: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingDeletionRecord> {
        let record = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            r#"
            UPDATE pending_deletions
            SET approved = 1, approved_at = ?, approved_by = ?, deleted_at = ?
            WHERE id = ?
            RETURNING {PENDING_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(approver)
        .bind(now)
        .bind(id)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Stamp an already-approved row deleted (retention sweep)
    pub async fn mark_deleted(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingDeletionRecord> {
        let record = sqlx::query_as::<_, PendingDeletionRecord>(&format!(
            r#"
            UPDATE pending_deletions
            SET deleted_at = ?
            WHERE id = ?
            RETURNING {PENDING_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Remove a row entirely (restore path)
    pub async fn delete_row(&self, conn: &mut SqliteConnection, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM pending_deletions WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
