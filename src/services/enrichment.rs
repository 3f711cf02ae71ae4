//! External-catalog enrichment hook
//!
//! The scanner invokes an optional callback once per asset upsert with the
//! asset's parsed identity; whatever comes back lands in the reserved
//! enrichment columns. The callback cannot touch any other field, and a
//! failing or slow callback never blocks the upsert: the asset is written
//! without enrichment and the error is logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::Config;
use crate::db::EnrichmentFields;
use crate::services::filename_parser::ParsedMedia;
use crate::services::retry::{RetryPolicy, with_retries};

/// Callback contract for external-catalog lookups
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Look up enrichment fields for one parsed identity
    async fn enrich(&self, identity: &ParsedMedia) -> anyhow::Result<EnrichmentFields>;
}

/// Wraps a provider with the timeout and retry policy the scanner applies
#[derive(Clone)]
pub struct EnrichmentHook {
    provider: Arc<dyn EnrichmentProvider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl EnrichmentHook {
    /// Build a hook around a provider supplied by the embedding caller
    ///
    /// The per-call timeout comes from `ENRICHMENT_TIMEOUT_SECONDS`.
    #[allow(dead_code)]
    pub fn new(provider: Arc<dyn EnrichmentProvider>, config: &Config) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(config.enrichment_timeout_seconds),
            retry: RetryPolicy::default(),
        }
    }

    /// Fetch enrichment for an identity; None when the hook cannot deliver
    pub async fn fetch(&self, identity: &ParsedMedia) -> Option<EnrichmentFields> {
        let result = with_retries(&self.retry, "enrichment", || async {
            tokio::time::timeout(self.timeout, self.provider.enrich(identity))
                .await
                .map_err(|_| anyhow::anyhow!("enrichment timed out after {:?}", self.timeout))?
        })
        .await;

        match result {
            Ok(fields) => Some(fields),
            Err(e) => {
                warn!(
                    title = ?identity.title,
                    error = %e,
                    "Enrichment callback failed; writing asset without enrichment"
                );
                None
            }
        }
    }
}
