//! Archive operation database repository
//!
//! Append-only log of every filesystem-effective mutation (stage, delete,
//! restore), including failed attempts. Rows are never updated or removed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::sqlite_helpers::to_json;

/// Archive operation record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchiveOperationRecord {
    pub id: i64,
    pub asset_id: Option<i64>,
    /// stage | delete | restore
    pub kind: String,
    pub source_path: Option<String>,
    pub destination_path: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub performed_by: Option<String>,
    /// Free-form JSON
    pub operation_metadata: Option<String>,
}

/// Input for one log entry
#[derive(Debug, Clone)]
pub struct AppendArchiveOperation {
    pub asset_id: Option<i64>,
    pub kind: String,
    pub source_path: Option<String>,
    pub destination_path: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub performed_by: Option<String>,
    pub operation_metadata: Option<serde_json::Value>,
}

pub struct ArchiveOperationRepository {
    pool: SqlitePool,
}

impl ArchiveOperationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a log entry
    pub async fn append(
        &self,
        conn: &mut SqliteConnection,
        input: &AppendArchiveOperation,
        now: DateTime<Utc>,
    ) -> Result<ArchiveOperationRecord> {
        let record = sqlx::query_as::<_, ArchiveOperationRecord>(
            r#"
            INSERT INTO archive_operations (
                asset_id, kind, source_path, destination_path, success,
                error_message, performed_at, performed_by, operation_metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, asset_id, kind, source_path, destination_path,
                      success, error_message, performed_at, performed_by,
                      operation_metadata
            "#,
        )
        .bind(input.asset_id)
        .bind(&input.kind)
        .bind(&input.source_path)
        .bind(&input.destination_path)
        .bind(input.success)
        .bind(&input.error_message)
        .bind(now)
        .bind(&input.performed_by)
        .bind(input.operation_metadata.as_ref().map(to_json))
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// List the log for an asset, oldest first
    pub async fn list_for_asset(&self, asset_id: i64) -> Result<Vec<ArchiveOperationRecord>> {
        let records = sqlx::query_as::<_, ArchiveOperationRecord>(
            r#"
            SELECT id, asset_id, kind, source_path, destination_path,
                   success, error_message, performed_at, performed_by,
                   operation_metadata
            FROM archive_operations
            WHERE asset_id = ?
            ORDER BY performed_at, id
            "#,
        )
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
