//! Library scanner
//!
//! Walks the configured logical roots, classifies candidate files, probes
//! and fingerprints media through a bounded worker pool, scores quality, and
//! upserts the canonical inventory in batched transactions. Scans are
//! resumable by construction: every file error is per-file, every batch is
//! its own transaction, and a cancelled or interrupted scan leaves the
//! catalog consistent for the next run to continue from.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, broadcast, mpsc};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::{Database, ScanErrorDetail, ScanRunRecord, ScanRunTotals, UpsertMediaAsset};
use crate::error::{VaultError, VaultResult};
use crate::services::enrichment::EnrichmentHook;
use crate::services::ffmpeg::{FfprobeService, ProbeResult};
use crate::services::filename_parser::{self, MediaKind};
use crate::services::fingerprint::fingerprint_file;
use crate::services::path_resolver::PathResolver;
use crate::services::quality::{QualitySignals, quality_score};
use crate::services::retry::{RetryPolicy, with_retries};

/// Path segments that mark a small file as a likely source-code artifact
const SOURCE_LIKE_SEGMENTS: &[&str] = &[
    "src", "source", "lib", "test", "tests", "build", "dist", "vendor", "node_modules",
];

/// Kind of scan being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Full,
    Incremental,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Full => "full",
            ScanKind::Incremental => "incremental",
        }
    }
}

/// Scanner policy knobs, taken from the application config
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub media_extensions: Vec<String>,
    pub archive_extensions: Vec<String>,
    pub deny_dirs: Vec<String>,
    pub min_media_bytes: u64,
    pub max_workers: usize,
    pub batch_size: usize,
    pub fingerprint_chunk_bytes: usize,
}

impl ScannerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_extensions: config.media_extensions.clone(),
            archive_extensions: config.archive_extensions.clone(),
            deny_dirs: config.scan_deny_dirs.clone(),
            min_media_bytes: config.scan_min_media_bytes,
            max_workers: config.scan_max_workers.max(1),
            batch_size: config.scan_batch_size.max(1),
            fingerprint_chunk_bytes: config.fingerprint_chunk_bytes,
        }
    }
}

/// Scanner progress event
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub scan_run_id: i64,
    pub files_found: i64,
    pub files_processed: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_unchanged: i64,
    pub errors: i64,
    pub current_file: Option<String>,
    pub is_complete: bool,
}

/// One file the walk decided is a media candidate
#[derive(Debug, Clone)]
struct Candidate {
    logical_path: String,
    concrete_path: PathBuf,
    filename: String,
    size_bytes: i64,
    mtime: Option<DateTime<Utc>>,
}

/// What a worker produced for one candidate
struct ProcessOutcome {
    candidate: Candidate,
    probe: Option<ProbeResult>,
    fingerprint: Option<String>,
    errors: Vec<ScanErrorDetail>,
}

/// Walk-phase classification of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Media,
    Archive,
    Skip,
}

/// Scanner service for discovering media files
pub struct ScannerService {
    db: Database,
    resolver: PathResolver,
    probe: FfprobeService,
    config: ScannerConfig,
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel_flag: Arc<AtomicBool>,
    enrichment: Option<EnrichmentHook>,
    retry: RetryPolicy,
}

impl ScannerService {
    pub fn new(
        db: Database,
        resolver: PathResolver,
        probe: FfprobeService,
        config: ScannerConfig,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            db,
            resolver,
            probe,
            config,
            progress_tx,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            enrichment: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Attach the optional enrichment hook - wired up by embedding callers
    #[allow(dead_code)]
    pub fn with_enrichment_hook(mut self, hook: EnrichmentHook) -> Self {
        self.enrichment = Some(hook);
        self
    }

    /// Subscribe to scan progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Request cooperative cancellation of the running scan
    ///
    /// The coordinator stops dispatching new work, in-flight workers finish
    /// their current file, and the run is marked failed with reason
    /// "cancelled".
    pub fn request_cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Run one scan over the given logical roots
    pub async fn run_scan(&self, kind: ScanKind, roots: &[String]) -> VaultResult<ScanRunRecord> {
        let scan_started = Utc::now();
        self.cancel_flag.store(false, Ordering::SeqCst);

        let run = self
            .db
            .scan_runs()
            .create(kind.as_str(), roots, scan_started)
            .await?;

        info!(
            scan_run_id = run.id,
            kind = kind.as_str(),
            roots = ?roots,
            "Starting library scan"
        );

        let mut errors: Vec<ScanErrorDetail> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        // Walk phase: single-threaded per root for determinism
        for root in roots {
            match self.resolver.resolve(root) {
                Some(resolved) => {
                    let (mut found, mut walk_errors) = walk_root(&resolved, root, &self.config);
                    candidates.append(&mut found);
                    errors.append(&mut walk_errors);
                }
                None => {
                    warn!(root = %root, "Scan root did not resolve to an existing path");
                    errors.push(ScanErrorDetail {
                        path: root.clone(),
                        kind: "unresolved".to_string(),
                        message: "logical root did not resolve to an existing path".to_string(),
                    });
                }
            }
        }

        let mut totals = ScanRunTotals {
            files_found: candidates.len() as i64,
            ..Default::default()
        };

        info!(scan_run_id = run.id, found = totals.files_found, "Walk complete");

        // Process phase: bounded worker pool for probe + fingerprint
        let outcome = self
            .process_candidates(run.id, kind, candidates, &mut totals, &mut errors)
            .await;

        let cancelled = self.cancel_flag.load(Ordering::SeqCst);

        if let Err(e) = outcome {
            let finished = self
                .db
                .scan_runs()
                .finalize(run.id, "failed", &totals, &errors, Some(&e.to_string()), Utc::now())
                .await?;
            return match e {
                VaultError::Cancelled => Ok(finished),
                other => Err(other),
            };
        }

        if cancelled {
            let finished = self
                .db
                .scan_runs()
                .finalize(run.id, "failed", &totals, &errors, Some("cancelled"), Utc::now())
                .await?;
            self.broadcast_complete(run.id, &totals, errors.len() as i64);
            info!(scan_run_id = run.id, "Scan cancelled");
            return Ok(finished);
        }

        // Deletion sweep: only a full scan can conclude that an unseen asset
        // is gone
        if kind == ScanKind::Full {
            let mut tx = self.db.pool().begin().await.map_err(VaultError::from)?;
            totals.files_deleted = self
                .db
                .assets()
                .mark_unseen_deleted(&mut tx, roots, scan_started, Utc::now())
                .await? as i64;
            tx.commit().await.map_err(VaultError::from)?;
        }

        let finished = self
            .db
            .scan_runs()
            .finalize(run.id, "completed", &totals, &errors, None, Utc::now())
            .await?;

        self.broadcast_complete(run.id, &totals, errors.len() as i64);

        info!(
            scan_run_id = run.id,
            found = totals.files_found,
            new = totals.files_new,
            updated = totals.files_updated,
            unchanged = totals.files_unchanged,
            deleted = totals.files_deleted,
            errors = errors.len(),
            "Library scan completed"
        );

        Ok(finished)
    }

    /// Dispatch candidates to workers and fold results into batched upserts
    async fn process_candidates(
        &self,
        scan_run_id: i64,
        kind: ScanKind,
        candidates: Vec<Candidate>,
        totals: &mut ScanRunTotals,
        errors: &mut Vec<ScanErrorDetail>,
    ) -> VaultResult<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<ProcessOutcome>(self.config.max_workers * 2);

        // Filter the unchanged files up front so the channel only carries
        // real work
        let mut work: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.cancel_flag.load(Ordering::SeqCst) {
                break;
            }
            if kind == ScanKind::Incremental
                && self.incremental_skip(&candidate).await?
            {
                totals.files_unchanged += 1;
                debug!(path = %candidate.logical_path, "Unchanged since last scan, skipping");
                continue;
            }
            work.push(candidate);
        }

        let probe = self.probe.clone();
        let retry = self.retry.clone();
        let chunk_bytes = self.config.fingerprint_chunk_bytes;
        let cancel_flag = self.cancel_flag.clone();

        let dispatcher = {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let mut dispatched = 0i64;
                for candidate in work {
                    if cancel_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let probe = probe.clone();
                    let retry = retry.clone();
                    let tx = outcome_tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let outcome = process_one(&probe, &retry, chunk_bytes, candidate).await;
                        let _ = tx.send(outcome).await;
                    });
                    dispatched += 1;
                }
                drop(outcome_tx);
                dispatched
            })
        };

        let mut batch: Vec<UpsertMediaAsset> = Vec::with_capacity(self.config.batch_size);
        let mut processed: i64 = 0;

        while let Some(outcome) = outcome_rx.recv().await {
            processed += 1;
            errors.extend(outcome.errors.iter().cloned());

            let input = self.build_upsert(&outcome).await;
            batch.push(input);

            if batch.len() >= self.config.batch_size {
                if let Err(e) = self.flush_batch(&mut batch, totals, errors).await {
                    // The catalog is gone; stop the dispatcher and let the
                    // caller finalize the run as failed
                    self.cancel_flag.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }

            if processed % 10 == 0 {
                let _ = self.progress_tx.send(ScanProgress {
                    scan_run_id,
                    files_found: totals.files_found,
                    files_processed: processed,
                    files_new: totals.files_new,
                    files_updated: totals.files_updated,
                    files_unchanged: totals.files_unchanged,
                    errors: errors.len() as i64,
                    current_file: Some(outcome.candidate.logical_path.clone()),
                    is_complete: false,
                });
            }
        }

        // Flush whatever is left so a cancelled scan keeps its completed work
        self.flush_batch(&mut batch, totals, errors).await?;

        let dispatched = dispatcher
            .await
            .map_err(|e| VaultError::Dependency(format!("dispatcher task panicked: {}", e)))?;

        debug!(dispatched = dispatched, processed = processed, "Worker pool drained");

        Ok(())
    }

    /// True when an incremental scan can skip this candidate
    async fn incremental_skip(&self, candidate: &Candidate) -> VaultResult<bool> {
        let Some(existing) = self
            .db
            .assets()
            .get_by_logical_path(&candidate.logical_path)
            .await?
        else {
            return Ok(false);
        };

        let size_unchanged = existing.size_bytes == candidate.size_bytes;
        let scanned_after_mtime = match (existing.last_scanned_at, candidate.mtime) {
            (Some(scanned), Some(mtime)) => scanned > mtime,
            _ => false,
        };

        Ok(size_unchanged && scanned_after_mtime && !existing.is_deleted)
    }

    /// Assemble the catalog row for one processed candidate
    async fn build_upsert(&self, outcome: &ProcessOutcome) -> UpsertMediaAsset {
        let candidate = &outcome.candidate;
        let parsed = filename_parser::parse_media(&candidate.filename);
        let probe = outcome.probe.as_ref();

        // A media-extension file that failed probing is recorded as unknown
        // with a zero score
        let probe_failed = probe.is_none();

        let media_kind = if probe_failed {
            MediaKind::Unknown.as_str().to_string()
        } else {
            parsed.kind.clone()
        };

        let score = match probe {
            Some(probe) => quality_score(&QualitySignals {
                height: probe.height,
                video_codec: probe.video_codec.clone(),
                bitrate_kbps: probe.bitrate_kbps,
                audio_channels: probe.audio_channels_value(),
                audio_track_count: probe.audio_track_count,
                subtitle_track_count: probe.subtitle_track_count,
                hdr_type: probe.hdr_type.map(|h| h.as_str().to_string()),
            }),
            None => 0,
        };

        let enrichment = match &self.enrichment {
            Some(hook) => hook.fetch(&parsed).await,
            None => None,
        };

        UpsertMediaAsset {
            logical_path: candidate.logical_path.clone(),
            filename: candidate.filename.clone(),
            size_bytes: candidate.size_bytes,
            content_fingerprint: outcome.fingerprint.clone(),
            container: probe.and_then(|p| p.container.clone()),
            video_codec: probe.and_then(|p| p.video_codec.clone()),
            audio_codec: probe.and_then(|p| p.audio_codec.clone()),
            width: probe.and_then(|p| p.width),
            height: probe.and_then(|p| p.height),
            resolution_tier: probe.and_then(|p| p.resolution_tier.clone()),
            bitrate_kbps: probe.and_then(|p| p.bitrate_kbps),
            framerate_fps: probe.and_then(|p| p.framerate_fps),
            duration_seconds: probe.and_then(|p| p.duration_seconds),
            audio_channels: probe.and_then(|p| p.audio_channels.clone()),
            audio_track_count: probe.map(|p| p.audio_track_count).unwrap_or(0),
            subtitle_track_count: probe.map(|p| p.subtitle_track_count).unwrap_or(0),
            audio_languages: probe.map(|p| p.audio_languages.clone()).unwrap_or_default(),
            subtitle_languages: probe
                .map(|p| p.subtitle_languages.clone())
                .unwrap_or_default(),
            dominant_audio_language: probe.and_then(|p| p.dominant_audio_language()),
            hdr_type: probe.and_then(|p| p.hdr_type.map(|h| h.as_str().to_string())),
            parsed_title: parsed.title.clone(),
            parsed_year: parsed.year,
            parsed_season: parsed.season,
            parsed_episode: parsed.episode,
            parsed_release_group: parsed.release_group.clone(),
            media_kind,
            quality_score: score,
            enrichment,
        }
    }

    /// Write one batch in a single transaction
    ///
    /// A batch that rolls back on bad row data increments the error counter
    /// and the scan continues. A failure that means the catalog itself is
    /// unreachable is returned as an error so the caller aborts the run into
    /// the failed finalize path.
    async fn flush_batch(
        &self,
        batch: &mut Vec<UpsertMediaAsset>,
        totals: &mut ScanRunTotals,
        errors: &mut Vec<ScanErrorDetail>,
    ) -> VaultResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let items = std::mem::take(batch);
        let now = Utc::now();

        let result: anyhow::Result<(i64, i64)> = async {
            let mut tx = self.db.pool().begin().await?;
            let mut new_count = 0i64;
            let mut updated_count = 0i64;

            for input in &items {
                let existing = self
                    .db
                    .assets()
                    .get_by_logical_path(&input.logical_path)
                    .await?;
                match existing {
                    Some(asset) => {
                        self.db.assets().update(&mut tx, asset.id, input, now).await?;
                        updated_count += 1;
                    }
                    None => {
                        self.db.assets().create(&mut tx, input, now).await?;
                        new_count += 1;
                    }
                }
            }

            tx.commit().await?;
            Ok((new_count, updated_count))
        }
        .await;

        match result {
            Ok((new_count, updated_count)) => {
                totals.files_new += new_count;
                totals.files_updated += updated_count;
                Ok(())
            }
            Err(e) if is_catalog_unreachable(&e) => {
                error!(batch_size = items.len(), error = %e, "Catalog unreachable during batch write");
                Err(VaultError::Dependency(format!("catalog unreachable: {}", e)))
            }
            Err(e) => {
                error!(batch_size = items.len(), error = %e, "Batch rolled back; continuing scan");
                errors.push(ScanErrorDetail {
                    path: items
                        .first()
                        .map(|i| i.logical_path.clone())
                        .unwrap_or_default(),
                    kind: "batch_failed".to_string(),
                    message: format!("batch of {} rows rolled back: {}", items.len(), e),
                });
                Ok(())
            }
        }
    }

    fn broadcast_complete(&self, scan_run_id: i64, totals: &ScanRunTotals, errors: i64) {
        let _ = self.progress_tx.send(ScanProgress {
            scan_run_id,
            files_found: totals.files_found,
            files_processed: totals.files_new + totals.files_updated + totals.files_unchanged,
            files_new: totals.files_new,
            files_updated: totals.files_updated,
            files_unchanged: totals.files_unchanged,
            errors,
            current_file: None,
            is_complete: true,
        });
    }
}

/// A database failure that means the catalog is gone, not that this batch's
/// rows were bad
fn is_catalog_unreachable(err: &anyhow::Error) -> bool {
    let Some(db_err) = err.chain().find_map(|c| c.downcast_ref::<sqlx::Error>()) else {
        return false;
    };
    matches!(
        db_err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_)
    )
}

/// Probe and fingerprint one candidate on a worker
async fn process_one(
    probe: &FfprobeService,
    retry: &RetryPolicy,
    chunk_bytes: usize,
    candidate: Candidate,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome {
        probe: None,
        fingerprint: None,
        errors: Vec::new(),
        candidate,
    };

    let path = outcome.candidate.concrete_path.clone();

    match with_retries(retry, "probe", || probe.probe(&path)).await {
        Ok(result) => outcome.probe = Some(result),
        Err(e) => {
            let kind = match &e {
                VaultError::Io { .. } => "io",
                _ => "probe_failed",
            };
            outcome.errors.push(ScanErrorDetail {
                path: outcome.candidate.logical_path.clone(),
                kind: kind.to_string(),
                message: e.to_string(),
            });
        }
    }

    match with_retries(retry, "fingerprint", || fingerprint_file(&path, chunk_bytes)).await {
        Ok(digest) => outcome.fingerprint = Some(digest),
        Err(e) => {
            outcome.errors.push(ScanErrorDetail {
                path: outcome.candidate.logical_path.clone(),
                kind: "io".to_string(),
                message: e.to_string(),
            });
        }
    }

    outcome
}

/// Walk one resolved root depth-first, returning media candidates
///
/// Deny-listed directory names are pruned, symbolic links are followed once
/// (cycles detected by device/inode), and non-media files are dropped here.
fn walk_root(
    resolved_root: &Path,
    logical_root: &str,
    config: &ScannerConfig,
) -> (Vec<Candidate>, Vec<ScanErrorDetail>) {
    let mut candidates = Vec::new();
    let mut errors = Vec::new();
    let mut seen_dirs: HashSet<(u64, u64)> = HashSet::new();

    let mut walker = WalkDir::new(resolved_root).follow_links(true).into_iter();

    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                let path = e
                    .path()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| logical_root.to_string());
                warn!(path = %path, error = %e, "Walk error");
                errors.push(ScanErrorDetail {
                    path,
                    kind: "io".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            if config.deny_dirs.iter().any(|d| d == name.as_ref()) {
                debug!(dir = %entry.path().display(), "Skipping deny-listed directory");
                walker.skip_current_dir();
                continue;
            }

            #[cfg(unix)]
            {
                use std::os::unix::fs::MetadataExt;
                if let Ok(metadata) = entry.metadata() {
                    if !seen_dirs.insert((metadata.dev(), metadata.ino())) {
                        debug!(dir = %entry.path().display(), "Symlink cycle detected, skipping");
                        walker.skip_current_dir();
                        continue;
                    }
                }
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                errors.push(ScanErrorDetail {
                    path: entry.path().to_string_lossy().to_string(),
                    kind: "io".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        let size = metadata.len();
        match classify(entry.path(), size, config) {
            Classification::Media => {
                let logical_path = logical_path_for(entry.path(), resolved_root, logical_root);
                let filename = entry.file_name().to_string_lossy().to_string();
                let mtime = metadata.modified().ok().map(DateTime::<Utc>::from);
                candidates.push(Candidate {
                    logical_path,
                    concrete_path: entry.path().to_path_buf(),
                    filename,
                    size_bytes: size as i64,
                    mtime,
                });
            }
            Classification::Archive => {
                debug!(path = %entry.path().display(), "Archive bundle enumerated, not scanned");
            }
            Classification::Skip => {}
        }
    }

    // Path order keeps the final catalog state independent of walk quirks
    candidates.sort_by(|a, b| a.logical_path.cmp(&b.logical_path));

    (candidates, errors)
}

/// Classify a file by extension and the size floor
fn classify(path: &Path, size_bytes: u64, config: &ScannerConfig) -> Classification {
    let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
        return Classification::Skip;
    };
    let extension = extension.to_lowercase();

    if config.archive_extensions.iter().any(|e| *e == extension) {
        return Classification::Archive;
    }

    if !config.media_extensions.iter().any(|e| *e == extension) {
        return Classification::Skip;
    }

    // Small files inside source-tree-like paths are build artifacts, not
    // media; a file exactly at the floor is media
    if size_bytes < config.min_media_bytes && has_source_like_segment(path) {
        return Classification::Skip;
    }

    Classification::Media
}

fn has_source_like_segment(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| SOURCE_LIKE_SEGMENTS.contains(&s.to_lowercase().as_str()))
            .unwrap_or(false)
    })
}

/// Catalog path for a discovered file: the logical root plus the relative
/// walk path
fn logical_path_for(concrete: &Path, resolved_root: &Path, logical_root: &str) -> String {
    let relative = concrete
        .strip_prefix(resolved_root)
        .unwrap_or(concrete)
        .to_string_lossy();
    format!(
        "{}/{}",
        logical_root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}
