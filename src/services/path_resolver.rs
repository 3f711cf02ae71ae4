//! Logical path resolution
//!
//! Catalog rows store paths as reported by the scan roots; on any given host
//! those may only be reachable under the share mount (or a development
//! fallback). The resolver tries an ordered candidate list and returns the
//! first path that exists. Missing paths are an answer, not an error: the
//! staging workflow turns them into a source-missing stage, the streaming
//! surface into a not-found.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;

/// Maps catalog paths to locally accessible paths
#[derive(Debug, Clone)]
pub struct PathResolver {
    share_mount_prefix: Option<String>,
    dev_fallback_prefix: Option<String>,
    stage_roots: Vec<PathBuf>,
}

impl PathResolver {
    pub fn from_config(config: &Config) -> Self {
        Self {
            share_mount_prefix: config.share_mount_prefix.clone(),
            dev_fallback_prefix: config.dev_fallback_prefix.clone(),
            stage_roots: config.stage_root_candidates.clone(),
        }
    }

    /// Resolve a logical path to the first existing candidate, if any
    pub fn resolve(&self, logical_path: &str) -> Option<PathBuf> {
        for candidate in self.candidates(logical_path) {
            if candidate.exists() {
                debug!(logical = logical_path, resolved = %candidate.display(), "Resolved path");
                return Some(candidate);
            }
        }

        debug!(logical = logical_path, "No candidate path exists");
        None
    }

    /// Ordered candidate holding directories for staged files
    ///
    /// The caller probes each for writability; nothing here touches the
    /// filesystem.
    pub fn stage_roots(&self) -> &[PathBuf] {
        &self.stage_roots
    }

    /// Where a restore should place a file for this logical path
    ///
    /// Picks the first candidate whose parent directory exists; when none
    /// does, falls back to the first candidate (the caller creates parents).
    pub fn restore_target(&self, logical_path: &str) -> PathBuf {
        let candidates = self.candidates(logical_path);
        candidates
            .iter()
            .find(|c| c.parent().map(Path::exists).unwrap_or(false))
            .cloned()
            .unwrap_or_else(|| candidates[0].clone())
    }

    /// The candidate list for a logical path, in probe order
    fn candidates(&self, logical_path: &str) -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(logical_path)];

        if let Some(prefix) = &self.share_mount_prefix {
            candidates.push(rebase(logical_path, prefix));
        }
        if let Some(prefix) = &self.dev_fallback_prefix {
            candidates.push(rebase(logical_path, prefix));
        }

        candidates
    }
}

/// Re-root an absolute-looking path under a prefix
fn rebase(logical_path: &str, prefix: &str) -> PathBuf {
    let relative = logical_path.trim_start_matches('/');
    Path::new(prefix).join(relative)
}
