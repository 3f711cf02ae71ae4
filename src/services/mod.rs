//! Core services

pub mod duplicates;
pub mod enrichment;
pub mod ffmpeg;
pub mod filename_parser;
pub mod fingerprint;
pub mod path_resolver;
pub mod quality;
pub mod retry;
pub mod scanner;
pub mod staging;

pub use duplicates::{DuplicateEngine, RebuildReport};
pub use enrichment::{EnrichmentHook, EnrichmentProvider};
pub use ffmpeg::{FfprobeService, ProbeResult};
pub use path_resolver::PathResolver;
pub use scanner::{ScanKind, ScannerConfig, ScannerService};
pub use staging::{CleanupReport, StagingService};
