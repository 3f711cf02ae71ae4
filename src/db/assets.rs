//! Media asset database repository
//!
//! The canonical inventory of discovered files. Assets are created and
//! refreshed by the scanner; the staging workflow flips their
//! `is_staged`/`is_deleted` flags. Reads go through the pool; every mutation
//! takes an explicit connection so the calling coordinator owns the
//! transaction boundary.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::sqlite_helpers::{json_to_vec, vec_to_json};

/// Media asset record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaAssetRecord {
    pub id: i64,
    pub logical_path: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_fingerprint: Option<String>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub resolution_tier: Option<String>,
    pub bitrate_kbps: Option<i64>,
    pub framerate_fps: Option<f64>,
    pub duration_seconds: Option<f64>,
    /// Channel layout with one decimal place, e.g. "2.0", "5.1"
    pub audio_channels: Option<String>,
    pub audio_track_count: i64,
    pub subtitle_track_count: i64,
    /// JSON array of ISO-639 codes, ordered
    pub audio_languages: String,
    /// JSON array of ISO-639 codes, ordered
    pub subtitle_languages: String,
    pub dominant_audio_language: Option<String>,
    pub hdr_type: Option<String>,
    pub parsed_title: Option<String>,
    pub parsed_year: Option<i64>,
    pub parsed_season: Option<i64>,
    pub parsed_episode: Option<i64>,
    pub parsed_release_group: Option<String>,
    pub media_kind: String,
    pub quality_score: i64,
    pub is_staged: bool,
    pub is_deleted: bool,
    pub external_id: Option<String>,
    pub canonical_title: Option<String>,
    pub overview: Option<String>,
    pub rating: Option<f64>,
    pub poster_ref: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub metadata_updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MediaAssetRecord {
    /// Decode the ordered audio language list
    pub fn audio_language_list(&self) -> Vec<String> {
        json_to_vec(&self.audio_languages)
    }

    /// Decode the ordered subtitle language list
    pub fn subtitle_language_list(&self) -> Vec<String> {
        json_to_vec(&self.subtitle_languages)
    }
}

/// Enrichment fields returned by the external-catalog hook
#[derive(Debug, Clone, Default)]
pub struct EnrichmentFields {
    pub external_id: Option<String>,
    pub canonical_title: Option<String>,
    pub overview: Option<String>,
    pub rating: Option<f64>,
    pub poster_ref: Option<String>,
}

/// Input for creating or refreshing a media asset
#[derive(Debug, Clone, Default)]
pub struct UpsertMediaAsset {
    pub logical_path: String,
    pub filename: String,
    pub size_bytes: i64,
    pub content_fingerprint: Option<String>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub resolution_tier: Option<String>,
    pub bitrate_kbps: Option<i64>,
    pub framerate_fps: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub audio_channels: Option<String>,
    pub audio_track_count: i64,
    pub subtitle_track_count: i64,
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
    pub dominant_audio_language: Option<String>,
    pub hdr_type: Option<String>,
    pub parsed_title: Option<String>,
    pub parsed_year: Option<i64>,
    pub parsed_season: Option<i64>,
    pub parsed_episode: Option<i64>,
    pub parsed_release_group: Option<String>,
    pub media_kind: String,
    pub quality_score: i64,
    pub enrichment: Option<EnrichmentFields>,
}

const ASSET_COLUMNS: &str = r#"
    id, logical_path, filename, size_bytes, content_fingerprint,
    container, video_codec, audio_codec, width, height, resolution_tier,
    bitrate_kbps, framerate_fps, duration_seconds, audio_channels,
    audio_track_count, subtitle_track_count, audio_languages,
    subtitle_languages, dominant_audio_language, hdr_type,
    parsed_title, parsed_year, parsed_season, parsed_episode,
    parsed_release_group, media_kind, quality_score, is_staged, is_deleted,
    external_id, canonical_title, overview, rating, poster_ref,
    discovered_at, last_scanned_at, metadata_updated_at, deleted_at
"#;

pub struct AssetRepository {
    pool: SqlitePool,
}

impl AssetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get an asset by id
    pub async fn get_by_id(&self, id: i64) -> Result<Option<MediaAssetRecord>> {
        let record = sqlx::query_as::<_, MediaAssetRecord>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get an asset by its catalog path
    pub async fn get_by_logical_path(&self, logical_path: &str) -> Result<Option<MediaAssetRecord>> {
        let record = sqlx::query_as::<_, MediaAssetRecord>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE logical_path = ?"
        ))
        .bind(logical_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all live (non-deleted) assets, ordered by path for reproducibility
    pub async fn list_live(&self) -> Result<Vec<MediaAssetRecord>> {
        let records = sqlx::query_as::<_, MediaAssetRecord>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE is_deleted = 0 ORDER BY logical_path"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Insert a newly discovered asset
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        input: &UpsertMediaAsset,
        now: DateTime<Utc>,
    ) -> Result<MediaAssetRecord> {
        let enrichment = input.enrichment.clone().unwrap_or_default();
        let record = sqlx::query_as::<_, MediaAssetRecord>(&format!(
            r#"
            INSERT INTO media_assets (
                logical_path, filename, size_bytes, content_fingerprint,
                container, video_codec, audio_codec, width, height,
                resolution_tier, bitrate_kbps, framerate_fps, duration_seconds,
                audio_channels, audio_track_count, subtitle_track_count,
                audio_languages, subtitle_languages, dominant_audio_language,
                hdr_type, parsed_title, parsed_year, parsed_season,
                parsed_episode, parsed_release_group, media_kind, quality_score,
                external_id, canonical_title, overview, rating, poster_ref,
                discovered_at, last_scanned_at, metadata_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(&input.logical_path)
        .bind(&input.filename)
        .bind(input.size_bytes)
        .bind(&input.content_fingerprint)
        .bind(&input.container)
        .bind(&input.video_codec)
        .bind(&input.audio_codec)
        .bind(input.width)
        .bind(input.height)
        .bind(&input.resolution_tier)
        .bind(input.bitrate_kbps)
        .bind(input.framerate_fps)
        .bind(input.duration_seconds)
        .bind(&input.audio_channels)
        .bind(input.audio_track_count)
        .bind(input.subtitle_track_count)
        .bind(vec_to_json(&input.audio_languages))
        .bind(vec_to_json(&input.subtitle_languages))
        .bind(&input.dominant_audio_language)
        .bind(&input.hdr_type)
        .bind(&input.parsed_title)
        .bind(input.parsed_year)
        .bind(input.parsed_season)
        .bind(input.parsed_episode)
        .bind(&input.parsed_release_group)
        .bind(&input.media_kind)
        .bind(input.quality_score)
        .bind(&enrichment.external_id)
        .bind(&enrichment.canonical_title)
        .bind(&enrichment.overview)
        .bind(enrichment.rating)
        .bind(&enrichment.poster_ref)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Refresh an existing asset after a re-probe
    ///
    /// Preserves `discovered_at` and `is_staged`; a reappearing file clears
    /// any earlier deletion mark. Enrichment columns only move forward
    /// (absent hook output leaves the stored values alone).
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        input: &UpsertMediaAsset,
        now: DateTime<Utc>,
    ) -> Result<MediaAssetRecord> {
        let enrichment = input.enrichment.clone().unwrap_or_default();
        let record = sqlx::query_as::<_, MediaAssetRecord>(&format!(
            r#"
            UPDATE media_assets SET
                filename = ?, size_bytes = ?, content_fingerprint = ?,
                container = ?, video_codec = ?, audio_codec = ?,
                width = ?, height = ?, resolution_tier = ?,
                bitrate_kbps = ?, framerate_fps = ?, duration_seconds = ?,
                audio_channels = ?, audio_track_count = ?, subtitle_track_count = ?,
                audio_languages = ?, subtitle_languages = ?, dominant_audio_language = ?,
                hdr_type = ?, parsed_title = ?, parsed_year = ?, parsed_season = ?,
                parsed_episode = ?, parsed_release_group = ?, media_kind = ?,
                quality_score = ?,
                external_id = COALESCE(?, external_id),
                canonical_title = COALESCE(?, canonical_title),
                overview = COALESCE(?, overview),
                rating = COALESCE(?, rating),
                poster_ref = COALESCE(?, poster_ref),
                is_deleted = 0, deleted_at = NULL,
                last_scanned_at = ?, metadata_updated_at = ?
            WHERE id = ?
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(&input.filename)
        .bind(input.size_bytes)
        .bind(&input.content_fingerprint)
        .bind(&input.container)
        .bind(&input.video_codec)
        .bind(&input.audio_codec)
        .bind(input.width)
        .bind(input.height)
        .bind(&input.resolution_tier)
        .bind(input.bitrate_kbps)
        .bind(input.framerate_fps)
        .bind(input.duration_seconds)
        .bind(&input.audio_channels)
        .bind(input.audio_track_count)
        .bind(input.subtitle_track_count)
        .bind(vec_to_json(&input.audio_languages))
        .bind(vec_to_json(&input.subtitle_languages))
        .bind(&input.dominant_audio_language)
        .bind(&input.hdr_type)
        .bind(&input.parsed_title)
        .bind(input.parsed_year)
        .bind(input.parsed_season)
        .bind(input.parsed_episode)
        .bind(&input.parsed_release_group)
        .bind(&input.media_kind)
        .bind(input.quality_score)
        .bind(&enrichment.external_id)
        .bind(&enrichment.canonical_title)
        .bind(&enrichment.overview)
        .bind(enrichment.rating)
        .bind(&enrichment.poster_ref)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Mark assets under the given roots that this scan did not touch as deleted
    ///
    /// An asset was touched iff its `last_scanned_at` moved past the scan
    /// start. Returns the number of rows marked.
    pub async fn mark_unseen_deleted(
        &self,
        conn: &mut SqliteConnection,
        roots: &[String],
        scan_started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if roots.is_empty() {
            return Ok(0);
        }

        let prefix_clauses: Vec<&str> = roots.iter().map(|_| "logical_path LIKE ?").collect();
        let sql = format!(
            r#"
            UPDATE media_assets
            SET is_deleted = 1, deleted_at = ?
            WHERE is_deleted = 0
              AND (last_scanned_at IS NULL OR last_scanned_at < ?)
              AND ({})
            "#,
            prefix_clauses.join(" OR ")
        );

        let mut query = sqlx::query(&sql).bind(now).bind(scan_started_at);
        for root in roots {
            let prefix = format!("{}/%", root.trim_end_matches('/'));
            query = query.bind(prefix);
        }

        let result = query.execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Flip the staging flag (advisory exclusion for the deletion workflow)
    pub async fn set_staged(&self, conn: &mut SqliteConnection, id: i64, staged: bool) -> Result<()> {
        sqlx::query("UPDATE media_assets SET is_staged = ? WHERE id = ?")
            .bind(staged)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Mark a staged asset as permanently deleted
    pub async fn mark_deleted_from_staging(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE media_assets SET is_deleted = 1, is_staged = 0, deleted_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
