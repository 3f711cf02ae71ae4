//! Deletion staging workflow
//!
//! Two-phase move-then-approve pipeline: `stage` moves an artifact into a
//! dated holding directory and records a pending-deletion row; `approve`
//! permanently deletes the staged artifact; `restore` puts it back. Nothing
//! is ever deleted without an explicit approver identity supplied by the
//! caller, and every filesystem-effective mutation (including failed
//! attempts) lands in the archive-operation log.
//!
//! Staging layout: `{root}/{movies|tv|documentaries|other}/{yyyy-mm-dd}/
//! {basename}[_N][.ext]`, with `_N` inserted only on collision. A human
//! operator can locate any staged artifact by date and media kind.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::db::{
    AppendArchiveOperation, CreatePendingDeletion, Database, DeletionMetadata, MediaAssetRecord,
    PendingDeletionRecord,
};
use crate::error::{VaultError, VaultResult};
use crate::services::duplicates::{GroupingAsset, GuardrailVerdict, is_foreign_language_title, language_guardrail};
use crate::services::filename_parser::MediaKind;
use crate::services::path_resolver::PathResolver;

/// Summary of one retention sweep
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub examined: usize,
    pub purged: usize,
    pub failed: usize,
}

/// Deletion staging service
pub struct StagingService {
    db: Database,
    resolver: PathResolver,
}

impl StagingService {
    pub fn new(db: Database, resolver: PathResolver) -> Self {
        Self { db, resolver }
    }

    /// Stage an asset for deletion
    ///
    /// Moves the file into the holding area when the source still exists;
    /// records a source-missing pending row when it does not. The asset's
    /// `is_staged` flag is the advisory exclusion: staging a staged asset is
    /// a conflict.
    pub async fn stage(
        &self,
        asset_id: i64,
        reason: &str,
        group_id: Option<i64>,
        better_asset_id: Option<i64>,
    ) -> VaultResult<PendingDeletionRecord> {
        let asset = self
            .db
            .assets()
            .get_by_id(asset_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("asset {}", asset_id)))?;

        if asset.is_deleted {
            return Err(VaultError::InvalidState(format!(
                "asset {} is already deleted",
                asset_id
            )));
        }
        if asset.is_staged {
            return Err(VaultError::Conflict(format!(
                "asset {} is already staged",
                asset_id
            )));
        }
        if self.db.pending_deletions().live_for_asset(asset_id).await?.is_some() {
            return Err(VaultError::Conflict(format!(
                "asset {} already has a live pending deletion",
                asset_id
            )));
        }

        // Callers may omit the group context; when the asset sits in a
        // duplicate group below rank 1, the rank-1 member is the better copy
        let (group_id, better_asset_id) = match (group_id, better_asset_id) {
            (None, None) => self.group_context_for(asset_id).await?,
            explicit => explicit,
        };

        let better = match better_asset_id {
            Some(id) => Some(
                self.db
                    .assets()
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| VaultError::NotFound(format!("asset {}", id)))?,
            ),
            None => None,
        };

        let now = Utc::now();
        let source = self.resolver.resolve(&asset.logical_path);
        let source_for_undo = source.clone();

        let (staged_path, metadata) = match source {
            Some(source_path) => {
                let dest_dir = self
                    .writable_staging_dir(&asset.media_kind, now.date_naive())
                    .await?;
                let destination = unique_destination(&dest_dir, &asset.filename);

                if let Err(e) = move_file(&source_path, &destination).await {
                    self.log_operation(&AppendArchiveOperation {
                        asset_id: Some(asset_id),
                        kind: "stage".to_string(),
                        source_path: Some(source_path.to_string_lossy().to_string()),
                        destination_path: Some(destination.to_string_lossy().to_string()),
                        success: false,
                        error_message: Some(e.to_string()),
                        performed_by: None,
                        operation_metadata: None,
                    })
                    .await;
                    return Err(e);
                }

                let staged_filename = destination
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| asset.filename.clone());

                (
                    Some(destination.to_string_lossy().to_string()),
                    DeletionMetadata::Staged { staged_filename },
                )
            }
            None => {
                warn!(
                    asset_id = asset_id,
                    logical_path = %asset.logical_path,
                    "Source missing at stage time; recording pending deletion without a move"
                );
                (None, DeletionMetadata::SourceMissing)
            }
        };

        let (language_concern, language_concern_reason) =
            language_concern_for(&asset, better.as_ref());
        let quality_delta = better.as_ref().map(|b| b.quality_score - asset.quality_score);

        let input = CreatePendingDeletion {
            asset_id,
            original_logical_path: asset.logical_path.clone(),
            staged_path: staged_path.clone(),
            size_bytes: asset.size_bytes,
            reason: reason.to_string(),
            group_id,
            better_asset_id,
            quality_delta,
            language_concern,
            language_concern_reason,
            metadata,
        };

        let moved = staged_path.is_some();
        let tx_result: VaultResult<PendingDeletionRecord> = async {
            let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;
            let pending = self.db.pending_deletions().create(&mut tx, &input, now).await?;
            self.db.assets().set_staged(&mut tx, asset_id, true).await?;
            self.db
                .archive_operations()
                .append(
                    &mut tx,
                    &AppendArchiveOperation {
                        asset_id: Some(asset_id),
                        kind: "stage".to_string(),
                        source_path: Some(asset.logical_path.clone()),
                        destination_path: staged_path.clone(),
                        success: moved,
                        error_message: (!moved).then(|| "source file missing".to_string()),
                        performed_by: None,
                        operation_metadata: Some(json!({ "reason": reason })),
                    },
                    now,
                )
                .await?;
            tx.commit().await.map_err(VaultError::from)?;
            Ok(pending)
        }
        .await;

        let pending = match tx_result {
            Ok(pending) => pending,
            Err(e) => {
                // Undo the move so the filesystem matches the catalog
                if let (Some(staged), Some(original)) = (&staged_path, &source_for_undo) {
                    if let Err(undo) = move_file(Path::new(staged), original).await {
                        warn!(error = %undo, "Failed to undo stage move after rollback");
                    }
                }
                return Err(e);
            }
        };

        info!(
            asset_id = asset_id,
            pending_id = pending.id,
            staged_path = ?pending.staged_path,
            source_missing = pending.metadata().source_missing(),
            "Staged asset for deletion"
        );

        Ok(pending)
    }

    /// Permanently delete a staged artifact
    ///
    /// The only code path that sets `approved`; the approver identity comes
    /// from outside and is stored verbatim.
    pub async fn approve(&self, pending_id: i64, approver: &str) -> VaultResult<PendingDeletionRecord> {
        let pending = self
            .db
            .pending_deletions()
            .get_by_id(pending_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("pending deletion {}", pending_id)))?;

        if pending.is_terminal() {
            return Err(VaultError::InvalidState(format!(
                "pending deletion {} is already deleted",
                pending_id
            )));
        }

        let now = Utc::now();

        if let Some(ref staged) = pending.staged_path {
            let staged_path = Path::new(staged);
            if staged_path.exists() {
                if let Err(e) = tokio::fs::remove_file(staged_path).await {
                    let err = VaultError::io(staged.clone(), e);
                    self.log_operation(&AppendArchiveOperation {
                        asset_id: Some(pending.asset_id),
                        kind: "delete".to_string(),
                        source_path: Some(staged.clone()),
                        destination_path: None,
                        success: false,
                        error_message: Some(err.to_string()),
                        performed_by: Some(approver.to_string()),
                        operation_metadata: None,
                    })
                    .await;
                    return Err(err);
                }
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;
        let updated = self
            .db
            .pending_deletions()
            .mark_approved_deleted(&mut tx, pending_id, approver, now)
            .await?;
        self.db
            .assets()
            .mark_deleted_from_staging(&mut tx, pending.asset_id, now)
            .await?;
        self.db
            .archive_operations()
            .append(
                &mut tx,
                &AppendArchiveOperation {
                    asset_id: Some(pending.asset_id),
                    kind: "delete".to_string(),
                    source_path: pending.staged_path.clone(),
                    destination_path: None,
                    success: true,
                    error_message: None,
                    performed_by: Some(approver.to_string()),
                    operation_metadata: None,
                },
                now,
            )
            .await?;
        tx.commit().await.map_err(VaultError::from)?;

        info!(
            pending_id = pending_id,
            asset_id = pending.asset_id,
            approver = approver,
            "Approved pending deletion"
        );

        Ok(updated)
    }

    /// Return a staged artifact to its recorded original location
    pub async fn restore(&self, pending_id: i64) -> VaultResult<i64> {
        let pending = self
            .db
            .pending_deletions()
            .get_by_id(pending_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("pending deletion {}", pending_id)))?;

        if pending.is_terminal() {
            return Err(VaultError::InvalidState(format!(
                "pending deletion {} is already deleted",
                pending_id
            )));
        }

        let now = Utc::now();

        if let Some(ref staged) = pending.staged_path {
            let staged_path = Path::new(staged);
            if staged_path.exists() {
                let destination = self.resolver.restore_target(&pending.original_logical_path);

                if destination.exists() {
                    let err = VaultError::Conflict(format!(
                        "restore target '{}' already exists",
                        destination.display()
                    ));
                    self.log_operation(&AppendArchiveOperation {
                        asset_id: Some(pending.asset_id),
                        kind: "restore".to_string(),
                        source_path: Some(staged.clone()),
                        destination_path: Some(destination.to_string_lossy().to_string()),
                        success: false,
                        error_message: Some(err.to_string()),
                        performed_by: None,
                        operation_metadata: None,
                    })
                    .await;
                    return Err(err);
                }

                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| VaultError::io(parent.to_string_lossy(), e))?;
                }

                move_file(staged_path, &destination).await?;
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;
        self.db.pending_deletions().delete_row(&mut tx, pending_id).await?;
        self.db
            .assets()
            .set_staged(&mut tx, pending.asset_id, false)
            .await?;
        self.db
            .archive_operations()
            .append(
                &mut tx,
                &AppendArchiveOperation {
                    asset_id: Some(pending.asset_id),
                    kind: "restore".to_string(),
                    source_path: pending.staged_path.clone(),
                    destination_path: Some(pending.original_logical_path.clone()),
                    success: true,
                    error_message: None,
                    performed_by: None,
                    operation_metadata: None,
                },
                now,
            )
            .await?;
        tx.commit().await.map_err(VaultError::from)?;

        info!(
            pending_id = pending_id,
            asset_id = pending.asset_id,
            "Restored staged asset"
        );

        Ok(pending.asset_id)
    }

    /// Retention sweep over rows whose approval has already been issued
    ///
    /// Purges pending deletions older than `age_days` where `approved` is
    /// already true. Never sets `approved` itself: an unapproved row is
    /// untouched regardless of age.
    pub async fn cleanup(&self, age_days: i64) -> VaultResult<CleanupReport> {
        let cutoff = Utc::now() - Duration::days(age_days.max(0));
        let rows = self.db.pending_deletions().list_approved_before(cutoff).await?;

        let mut report = CleanupReport {
            examined: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match self.purge_row(&row).await {
                Ok(()) => report.purged += 1,
                Err(e) => {
                    warn!(pending_id = row.id, error = %e, "Retention purge failed for row");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            purged = report.purged,
            failed = report.failed,
            age_days = age_days,
            "Pending-deletion cleanup complete"
        );

        Ok(report)
    }

    async fn purge_row(&self, row: &PendingDeletionRecord) -> VaultResult<()> {
        let now = Utc::now();

        if let Some(ref staged) = row.staged_path {
            let staged_path = Path::new(staged);
            if staged_path.exists() {
                tokio::fs::remove_file(staged_path)
                    .await
                    .map_err(|e| VaultError::io(staged.clone(), e))?;
            }
        }

        let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;
        self.db.pending_deletions().mark_deleted(&mut tx, row.id, now).await?;
        self.db
            .assets()
            .mark_deleted_from_staging(&mut tx, row.asset_id, now)
            .await?;
        self.db
            .archive_operations()
            .append(
                &mut tx,
                &AppendArchiveOperation {
                    asset_id: Some(row.asset_id),
                    kind: "delete".to_string(),
                    source_path: row.staged_path.clone(),
                    destination_path: None,
                    success: true,
                    error_message: None,
                    performed_by: row.approved_by.clone(),
                    operation_metadata: Some(json!({ "retention_sweep": true })),
                },
                now,
            )
            .await?;
        tx.commit().await.map_err(VaultError::from)?;

        Ok(())
    }

    /// Duplicate-group context for an asset: its group and the rank-1 member
    async fn group_context_for(&self, asset_id: i64) -> VaultResult<(Option<i64>, Option<i64>)> {
        let Some(member) = self.db.duplicates().member_for_asset(asset_id).await? else {
            return Ok((None, None));
        };
        if member.rank == 1 {
            return Ok((Some(member.group_id), None));
        }

        let best = self
            .db
            .duplicates()
            .members_for_group(member.group_id)
            .await?
            .into_iter()
            .find(|m| m.rank == 1)
            .map(|m| m.asset_id);

        Ok((Some(member.group_id), best))
    }

    /// First staging root where the dated media-kind directory can be created
    async fn writable_staging_dir(&self, media_kind: &str, date: NaiveDate) -> VaultResult<PathBuf> {
        let mut last_error: Option<std::io::Error> = None;
        let mut last_root = PathBuf::new();

        for root in self.resolver.stage_roots() {
            let dir = staging_dir(root, media_kind, date);
            match tokio::fs::create_dir_all(&dir).await {
                Ok(()) => return Ok(dir),
                Err(e) => {
                    last_root = dir;
                    last_error = Some(e);
                }
            }
        }

        Err(VaultError::io(
            last_root.to_string_lossy(),
            last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no staging roots configured")
            }),
        ))
    }

    /// Best-effort archive logging outside a transaction (failure paths)
    async fn log_operation(&self, input: &AppendArchiveOperation) {
        let now = Utc::now();
        let result: anyhow::Result<()> = async {
            let mut conn = self.db.pool().acquire().await?;
            self.db.archive_operations().append(&mut conn, input, now).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to append archive operation");
        }
    }
}

/// Language concern for staging `asset` in favor of `better`
///
/// Mirrors the duplicate engine's guardrails: the concern flags a stage that
/// would remove the only English audio track; a foreign-language title is
/// noted but not protected.
fn language_concern_for(
    asset: &MediaAssetRecord,
    better: Option<&MediaAssetRecord>,
) -> (bool, Option<String>) {
    let Some(better) = better else {
        return (false, None);
    };

    let member = GroupingAsset::from(asset);
    let best = GroupingAsset::from(better);

    match language_guardrail(&best, &member) {
        GuardrailVerdict::Blocked { reason } => (true, Some(reason)),
        GuardrailVerdict::Pass => {
            if is_foreign_language_title(&member) {
                (
                    false,
                    Some("foreign-language title; English subtitles present".to_string()),
                )
            } else {
                (false, None)
            }
        }
    }
}

/// Dated holding directory for a media kind under one staging root
fn staging_dir(root: &Path, media_kind: &str, date: NaiveDate) -> PathBuf {
    root.join(MediaKind::staging_subdir(media_kind))
        .join(date.format("%Y-%m-%d").to_string())
}

/// Destination path inside `dir`, suffixing `_1`, `_2`, ... on collision
fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (filename, None),
    };

    let mut counter = 1;
    loop {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dir.join(&name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Move a file, falling back to copy+delete across filesystems
async fn move_file(source: &Path, destination: &Path) -> VaultResult<()> {
    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(source, destination)
                .await
                .map_err(|e| VaultError::io(destination.to_string_lossy(), e))?;
            tokio::fs::remove_file(source)
                .await
                .map_err(|e| VaultError::io(source.to_string_lossy(), e))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, path: &str) -> MediaAssetRecord {
        MediaAssetRecord {
            id,
            logical_path: path.to_string(),
            filename: "Foo.mkv".to_string(),
            size_bytes: 1000,
            content_fingerprint: None,
            container: None,
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
            resolution_tier: None,
            bitrate_kbps: None,
            framerate_fps: None,
            duration_seconds: None,
            audio_channels: None,
            audio_track_count: 1,
            subtitle_track_count: 0,
            audio_languages: r#"["en"]"#.to_string(),
            subtitle_languages: "[]".to_string(),
            dominant_audio_language: Some("en".to_string()),
            hdr_type: None,
            parsed_title: None,
            parsed_year: None,
            parsed_season: None,
            parsed_episode: None,
            parsed_release_group: None,
            media_kind: "movie".to_string(),
            quality_score: 100,
            is_staged: false,
            is_deleted: false,
            external_id: None,
            canonical_title: None,
            overview: None,
            rating: None,
            poster_ref: None,
            discovered_at: Utc::now(),
            last_scanned_at: None,
            metadata_updated_at: None,
            deleted_at: None,
        }
    }

    // =========================================================================
    // Staging Layout Tests
    // =========================================================================

    #[test]
    fn test_staging_dir_layout() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(
            staging_dir(Path::new("/stage"), "movie", date),
            PathBuf::from("/stage/movies/2026-08-01")
        );
        assert_eq!(
            staging_dir(Path::new("/stage"), "tv", date),
            PathBuf::from("/stage/tv/2026-08-01")
        );
        assert_eq!(
            staging_dir(Path::new("/stage"), "unknown", date),
            PathBuf::from("/stage/other/2026-08-01")
        );
    }

    #[test]
    fn test_unique_destination_without_collision() {
        let dir = tempfile::tempdir().unwrap();
        let dest = unique_destination(dir.path(), "Foo.mkv");
        assert_eq!(dest, dir.path().join("Foo.mkv"));
    }

    #[test]
    fn test_unique_destination_suffixes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Foo.mkv"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "Foo.mkv"),
            dir.path().join("Foo_1.mkv")
        );

        std::fs::write(dir.path().join("Foo_1.mkv"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "Foo.mkv"),
            dir.path().join("Foo_2.mkv")
        );
    }

    #[test]
    fn test_unique_destination_no_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            unique_destination(dir.path(), "README"),
            dir.path().join("README_1")
        );
    }

    // =========================================================================
    // Move Tests
    // =========================================================================

    #[tokio::test]
    async fn test_move_file_renames() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        let dest = dir.path().join("b.mkv");
        std::fs::write(&source, b"payload").unwrap();

        move_file(&source, &dest).await.unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_move_file_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_file(&dir.path().join("gone.mkv"), &dir.path().join("out.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Io { .. }));
    }

    // =========================================================================
    // Language Concern Tests
    // =========================================================================

    #[test]
    fn test_language_concern_triggers_for_only_english_copy() {
        let asset = record(1, "/library/a.mkv");
        let mut better = record(2, "/library/b.mkv");
        better.audio_languages = r#"["de"]"#.to_string();
        better.dominant_audio_language = Some("de".to_string());

        let (concern, reason) = language_concern_for(&asset, Some(&better));
        assert!(concern);
        assert_eq!(reason.as_deref(), Some("would remove only English audio track"));
    }

    #[test]
    fn test_language_concern_inert_when_both_english() {
        let asset = record(1, "/library/a.mkv");
        let better = record(2, "/library/b.mkv");
        let (concern, reason) = language_concern_for(&asset, Some(&better));
        assert!(!concern);
        assert!(reason.is_none());
    }

    #[test]
    fn test_language_concern_notes_foreign_title() {
        let mut asset = record(1, "/library/a.mkv");
        asset.audio_languages = r#"["ja"]"#.to_string();
        asset.subtitle_languages = r#"["en"]"#.to_string();
        asset.dominant_audio_language = Some("ja".to_string());
        let mut better = record(2, "/library/b.mkv");
        better.audio_languages = r#"["ja"]"#.to_string();
        better.dominant_audio_language = Some("ja".to_string());

        let (concern, reason) = language_concern_for(&asset, Some(&better));
        assert!(!concern);
        assert_eq!(
            reason.as_deref(),
            Some("foreign-language title; English subtitles present")
        );
    }

    #[test]
    fn test_language_concern_absent_without_better() {
        let asset = record(1, "/library/a.mkv");
        let (concern, reason) = language_concern_for(&asset, None);
        assert!(!concern);
        assert!(reason.is_none());
    }
}
