//! Duplicate group and member database repository
//!
//! Groups and members are owned entirely by the duplicate engine: a rebuild
//! upserts groups by fingerprint (preserving review state), replaces member
//! rows wholesale, and deletes groups that no longer appear.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

/// Duplicate group record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DuplicateGroupRecord {
    pub id: i64,
    pub group_fingerprint: String,
    /// exact | fuzzy
    pub kind: String,
    pub confidence: f64,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub media_kind: String,
    pub member_count: i64,
    /// stage_lower | review
    pub recommended_action: String,
    pub action_reason: Option<String>,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

/// Duplicate member record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DuplicateMemberRecord {
    pub id: i64,
    pub group_id: i64,
    pub asset_id: i64,
    /// 1 = best
    pub rank: i64,
    /// keep | review | stage
    pub recommended_action: String,
    pub action_reason: Option<String>,
}

/// Input for creating or refreshing a group
#[derive(Debug, Clone)]
pub struct UpsertDuplicateGroup {
    pub group_fingerprint: String,
    pub kind: String,
    pub confidence: f64,
    pub title: Option<String>,
    pub year: Option<i64>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
    pub media_kind: String,
    pub member_count: i64,
    pub recommended_action: String,
    pub action_reason: Option<String>,
}

/// Input for one member row (rank assigned by the engine)
#[derive(Debug, Clone)]
pub struct NewDuplicateMember {
    pub asset_id: i64,
    pub rank: i64,
    pub recommended_action: String,
    pub action_reason: Option<String>,
}

const GROUP_COLUMNS: &str = r#"
    id, group_fingerprint, kind, confidence, title, year, season, episode,
    media_kind, member_count, recommended_action, action_reason,
    reviewed, reviewed_at, detected_at
"#;

pub struct DuplicateRepository {
    pool: SqlitePool,
}

impl DuplicateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all groups, ordered by fingerprint for reproducibility
    pub async fn list_groups(&self) -> Result<Vec<DuplicateGroupRecord>> {
        let records = sqlx::query_as::<_, DuplicateGroupRecord>(&format!(
            "SELECT {GROUP_COLUMNS} FROM duplicate_groups ORDER BY group_fingerprint"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List the members of a group, best rank first
    pub async fn members_for_group(&self, group_id: i64) -> Result<Vec<DuplicateMemberRecord>> {
        let records = sqlx::query_as::<_, DuplicateMemberRecord>(
            r#"
            SELECT id, group_id, asset_id, rank, recommended_action, action_reason
            FROM duplicate_members
            WHERE group_id = ?
            ORDER BY rank
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Find the member edge for an asset, if any
    pub async fn member_for_asset(&self, asset_id: i64) -> Result<Option<DuplicateMemberRecord>> {
        let record = sqlx::query_as::<_, DuplicateMemberRecord>(
            r#"
            SELECT id, group_id, asset_id, rank, recommended_action, action_reason
            FROM duplicate_members
            WHERE asset_id = ?
            "#,
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Insert a group, or refresh a reappearing one in place
    ///
    /// `reviewed`, `reviewed_at`, and `detected_at` survive the refresh.
    pub async fn upsert_group(
        &self,
        conn: &mut SqliteConnection,
        input: &UpsertDuplicateGroup,
        now: DateTime<Utc>,
    ) -> Result<DuplicateGroupRecord> {
        let record = sqlx::query_as::<_, DuplicateGroupRecord>(&format!(
            r#"
            INSERT INTO duplicate_groups (
                group_fingerprint, kind, confidence, title, year, season,
                episode, media_kind, member_count, recommended_action,
                action_reason, detected_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (group_fingerprint) DO UPDATE SET
                kind = excluded.kind,
                confidence = excluded.confidence,
                title = excluded.title,
                year = excluded.year,
                season = excluded.season,
                episode = excluded.episode,
                media_kind = excluded.media_kind,
                member_count = excluded.member_count,
                recommended_action = excluded.recommended_action,
                action_reason = excluded.action_reason
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(&input.group_fingerprint)
        .bind(&input.kind)
        .bind(input.confidence)
        .bind(&input.title)
        .bind(input.year)
        .bind(input.season)
        .bind(input.episode)
        .bind(&input.media_kind)
        .bind(input.member_count)
        .bind(&input.recommended_action)
        .bind(&input.action_reason)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Replace a group's member rows wholesale
    pub async fn replace_members(
        &self,
        conn: &mut SqliteConnection,
        group_id: i64,
        members: &[NewDuplicateMember],
    ) -> Result<()> {
        sqlx::query("DELETE FROM duplicate_members WHERE group_id = ?")
            .bind(group_id)
            .execute(&mut *conn)
            .await?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO duplicate_members (group_id, asset_id, rank, recommended_action, action_reason)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(group_id)
            .bind(member.asset_id)
            .bind(member.rank)
            .bind(&member.recommended_action)
            .bind(&member.action_reason)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Delete every group whose fingerprint is not in the rebuilt set
    ///
    /// Member rows go with their group via ON DELETE CASCADE. Returns the
    /// number of groups removed.
    pub async fn delete_groups_not_in(
        &self,
        conn: &mut SqliteConnection,
        fingerprints: &[String],
    ) -> Result<u64> {
        if fingerprints.is_empty() {
            let result = sqlx::query("DELETE FROM duplicate_groups")
                .execute(conn)
                .await?;
            return Ok(result.rows_affected());
        }

        let placeholders: Vec<&str> = fingerprints.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM duplicate_groups WHERE group_fingerprint NOT IN ({})",
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for fingerprint in fingerprints {
            query = query.bind(fingerprint);
        }

        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }
}
