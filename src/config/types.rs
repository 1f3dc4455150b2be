//! Audit run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one audit run.
///
/// Construct through [`AuditConfig::builder`]; the builder validates the
/// seed and fills defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Seed URL as given by the caller (scheme optional, defaults to https).
    pub(crate) seed_url: String,

    /// Root directory holding one subdirectory per audited domain.
    pub(crate) audits_root: PathBuf,

    /// Worker tasks fetching concurrently.
    pub(crate) workers: usize,

    /// Page budget: once this many pages have been processed, discoveries
    /// are still recorded but nothing further is fetched. `None` = no limit.
    pub(crate) max_internal_links: Option<usize>,

    /// Per-request deadline in seconds.
    pub(crate) request_timeout_secs: u64,

    /// Checkpoint the crawl state every N processed pages.
    pub(crate) checkpoint_interval: usize,

    pub(crate) user_agent: String,

    /// Start a fresh audit even when a resumable one exists.
    pub(crate) force_new: bool,

    /// Probe external links (HEAD, GET fallback) to fill their status.
    pub(crate) probe_external_links: bool,

    /// Per-response body ceiling in bytes; larger bodies are truncated.
    pub(crate) max_response_bytes: usize,

    /// Optional cap on queue growth; rejected discoveries are logged.
    pub(crate) max_queue: Option<usize>,

    /// Page-record cache capacity (records, not bytes).
    pub(crate) cache_capacity: usize,
}

impl AuditConfig {
    #[must_use]
    pub fn seed_url(&self) -> &str {
        &self.seed_url
    }

    #[must_use]
    pub fn audits_root(&self) -> &Path {
        &self.audits_root
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub fn max_internal_links(&self) -> Option<usize> {
        self.max_internal_links
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn checkpoint_interval(&self) -> usize {
        self.checkpoint_interval.max(1)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn force_new(&self) -> bool {
        self.force_new
    }

    #[must_use]
    pub fn probe_external_links(&self) -> bool {
        self.probe_external_links
    }

    #[must_use]
    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    #[must_use]
    pub fn max_queue(&self) -> Option<usize> {
        self.max_queue
    }

    #[must_use]
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }
}
