//! Database connection and operations

pub mod archive_operations;
pub mod assets;
pub mod duplicates;
pub mod pending_deletions;
pub mod scan_runs;
pub mod sqlite_helpers;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use archive_operations::{AppendArchiveOperation, ArchiveOperationRecord, ArchiveOperationRepository};
pub use assets::{AssetRepository, EnrichmentFields, MediaAssetRecord, UpsertMediaAsset};
pub use duplicates::{
    DuplicateGroupRecord, DuplicateMemberRecord, DuplicateRepository, NewDuplicateMember,
    UpsertDuplicateGroup,
};
pub use pending_deletions::{
    CreatePendingDeletion, DeletionMetadata, PendingDeletionRecord, PendingDeletionRepository,
};
pub use scan_runs::{ScanErrorDetail, ScanRunRecord, ScanRunRepository, ScanRunTotals};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection pool, creating the file if missing
    pub async fn connect(url: &str) -> Result<Self> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get an asset repository
    pub fn assets(&self) -> AssetRepository {
        AssetRepository::new(self.pool.clone())
    }

    /// Get a duplicate group/member repository
    pub fn duplicates(&self) -> DuplicateRepository {
        DuplicateRepository::new(self.pool.clone())
    }

    /// Get a pending deletion repository
    pub fn pending_deletions(&self) -> PendingDeletionRepository {
        PendingDeletionRepository::new(self.pool.clone())
    }

    /// Get an archive operation repository
    pub fn archive_operations(&self) -> ArchiveOperationRepository {
        ArchiveOperationRepository::new(self.pool.clone())
    }

    /// Get a scan run repository
    pub fn scan_runs(&self) -> ScanRunRepository {
        ScanRunRepository::new(self.pool.clone())
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}
