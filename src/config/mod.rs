//! Application configuration management

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Default recognized video container extensions
const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts",
];

/// Default recognized archive bundle extensions (enumerated, not extracted)
const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz"];

/// Default directory names skipped during a walk
const DEFAULT_DENY_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "@eaDir",
    "#recycle",
    ".Trash-1000",
    "lost+found",
];

/// Application configuration loaded from environment variables
///
/// Read once at startup and injected into each service at construction;
/// immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database path (SQLite)
    /// Use DATABASE_PATH or DATABASE_URL with sqlite:// prefix
    pub database_url: String,

    /// Ordered candidate holding directories for staged files
    pub stage_root_candidates: Vec<PathBuf>,

    /// Prefix under which catalog paths are re-rooted to reach the share mount
    pub share_mount_prefix: Option<String>,

    /// Optional development-machine fallback prefix
    pub dev_fallback_prefix: Option<String>,

    /// File extensions classified as media
    pub media_extensions: Vec<String>,

    /// File extensions classified as archives (enumerated separately)
    pub archive_extensions: Vec<String>,

    /// Directory names pruned from scan walks
    pub scan_deny_dirs: Vec<String>,

    /// Size floor for media candidates in source-code-like paths
    pub scan_min_media_bytes: u64,

    /// Title similarity threshold for fuzzy duplicate grouping (0-100)
    pub fuzzy_similarity_threshold: f64,

    /// Wall-clock timeout per ffprobe invocation
    pub probe_timeout_seconds: u64,

    /// Chunk size for content fingerprinting reads
    pub fingerprint_chunk_bytes: usize,

    /// Bound on concurrent probe+fingerprint workers
    pub scan_max_workers: usize,

    /// Files per catalog write transaction during a scan
    pub scan_batch_size: usize,

    /// Timeout for the optional enrichment callback
    pub enrichment_timeout_seconds: u64,

    /// Retention window consulted by the pending-deletion cleanup sweep
    pub pending_deletion_retention_days: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/mediavault.db".to_string());

        Ok(Self {
            database_url,

            stage_root_candidates: env::var("STAGE_ROOT_CANDIDATES")
                .map(|v| split_paths(&v))
                .unwrap_or_else(|_| vec![PathBuf::from("./data/staging")]),

            share_mount_prefix: env::var("SHARE_MOUNT_PREFIX").ok().filter(|s| !s.is_empty()),

            dev_fallback_prefix: env::var("DEV_FALLBACK_PREFIX").ok().filter(|s| !s.is_empty()),

            media_extensions: env::var("MEDIA_EXTENSIONS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| to_owned_list(DEFAULT_MEDIA_EXTENSIONS)),

            archive_extensions: env::var("ARCHIVE_EXTENSIONS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| to_owned_list(DEFAULT_ARCHIVE_EXTENSIONS)),

            scan_deny_dirs: env::var("SCAN_DENY_DIRS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| to_owned_list(DEFAULT_DENY_DIRS)),

            scan_min_media_bytes: env::var("SCAN_MIN_MEDIA_BYTES")
                .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
                .parse()
                .context("Invalid SCAN_MIN_MEDIA_BYTES")?,

            fuzzy_similarity_threshold: env::var("FUZZY_SIMILARITY_THRESHOLD")
                .unwrap_or_else(|_| "85".to_string())
                .parse()
                .context("Invalid FUZZY_SIMILARITY_THRESHOLD")?,

            probe_timeout_seconds: env::var("PROBE_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid PROBE_TIMEOUT_SECONDS")?,

            fingerprint_chunk_bytes: env::var("FINGERPRINT_CHUNK_BYTES")
                .unwrap_or_else(|_| (1024 * 1024).to_string())
                .parse()
                .context("Invalid FINGERPRINT_CHUNK_BYTES")?,

            scan_max_workers: env::var("SCAN_MAX_WORKERS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid SCAN_MAX_WORKERS")?,

            scan_batch_size: env::var("SCAN_BATCH_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("Invalid SCAN_BATCH_SIZE")?,

            enrichment_timeout_seconds: env::var("ENRICHMENT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid ENRICHMENT_TIMEOUT_SECONDS")?,

            pending_deletion_retention_days: env::var("PENDING_DELETION_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid PENDING_DELETION_RETENTION_DAYS")?,
        })
    }
}

/// Split a comma-separated list, trimming and dropping empties
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a colon-separated path list, preserving order
fn split_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_drops_empties() {
        assert_eq!(split_list("mkv, mp4,,avi "), vec!["mkv", "mp4", "avi"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_split_paths_preserves_order() {
        let paths = split_paths("/mnt/stage:/tmp/stage");
        assert_eq!(paths[0], PathBuf::from("/mnt/stage"));
        assert_eq!(paths[1], PathBuf::from("/tmp/stage"));
    }

    #[test]
    fn test_default_extension_sets_are_lowercase() {
        for ext in DEFAULT_MEDIA_EXTENSIONS {
            assert_eq!(*ext, ext.to_lowercase());
        }
    }
}
