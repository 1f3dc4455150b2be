//! Resumable breadth-first domain auditor.
//!
//! Crawls a seed host over HTTP, runs every fetched page through an
//! extractor pipeline, and persists per-page records plus aggregated crawl
//! state under a per-domain audit directory. Interrupted runs resume from
//! the last checkpoint; audit history is retained for run-to-run
//! comparison.

pub mod audit;
pub mod config;
pub mod crawl_engine;
pub mod extractor;
pub mod page_store;
pub mod state_store;
pub mod url_norm;
pub mod utils;

pub use audit::{
    AuditHandle, AuditManager, AuditMetrics, AuditStatus, AuditSummary, CleanupReport,
    ComparisonReport, DomainStats,
};
pub use config::{AuditConfig, AuditConfigBuilder};
pub use crawl_engine::{
    AuditError, AuditOutcome, CrawlEngine, LogProgress, NoOpProgress, ProgressReporter,
    TerminationReason,
};
pub use extractor::{DefaultExtractor, ExtractorPipeline, PageRecord, RawLink, ResponseMeta};
pub use page_store::PageDataStore;
pub use state_store::{CrawlState, LinkStatus, StateStore};

use std::sync::Arc;

/// Run (or resume) an audit with the default extractor and no progress
/// output. Convenience wrapper over [`CrawlEngine::prepare`] + `run`.
pub async fn audit(config: AuditConfig) -> Result<AuditOutcome, AuditError> {
    let engine = CrawlEngine::prepare(config, Arc::new(DefaultExtractor)).await?;
    engine.run().await
}
