//! Audit lifecycle: directory layout, run history, retention, comparison.
//!
//! One directory per audited domain under the audits root, one timestamped
//! directory per run. Names sort lexicographically by creation time, which
//! is what every listing and retention decision relies on.
//!
//! ```text
//! audits/<domainSlug>/
//!   audit-YYYY-MM-DD-HH-MM-SS/
//!     <auditId>-crawl-state.json[.gz]
//!     page-data/
//!     comparisons/
//!     failed-urls.log
//!     status
//! ```

pub mod compare;

pub use compare::{AuditMetrics, ComparisonReport, MetricDelta};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::page_store::PageDataStore;
use crate::state_store::{StateStore, STATE_FILE_SUFFIX};
use crate::url_norm::domain_slug;
use crate::utils::atomic_write;

pub const AUDIT_DIR_PREFIX: &str = "audit-";
pub const PAGE_DATA_DIR: &str = "page-data";
pub const COMPARISONS_DIR: &str = "comparisons";
pub const FAILED_LOG_FILE: &str = "failed-urls.log";
const STATUS_FILE: &str = "status";
const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Lifecycle state of an audit. Transitions are monotonic: once terminal,
/// a status never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    InProgress,
    Completed,
    Failed,
}

impl AuditStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths and identity of one audit run.
#[derive(Debug, Clone)]
pub struct AuditHandle {
    pub id: String,
    pub dir: PathBuf,
    /// True when this handle points at a pre-existing in-progress audit.
    pub resumed: bool,
}

impl AuditHandle {
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{}{STATE_FILE_SUFFIX}", self.id))
    }

    #[must_use]
    pub fn page_data_dir(&self) -> PathBuf {
        self.dir.join(PAGE_DATA_DIR)
    }

    #[must_use]
    pub fn comparisons_dir(&self) -> PathBuf {
        self.dir.join(COMPARISONS_DIR)
    }

    #[must_use]
    pub fn failed_log_path(&self) -> PathBuf {
        self.dir.join(FAILED_LOG_FILE)
    }
}

/// One row of `list` output; counts are present when a snapshot is readable.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub id: String,
    pub status: AuditStatus,
    pub started_at: Option<DateTime<Local>>,
    pub pages: Option<u64>,
    pub internal_links: Option<usize>,
    pub external_links: Option<usize>,
    pub broken_links: Option<usize>,
    pub queue_remaining: Option<usize>,
    /// Wall-clock span from the audit's creation to its last checkpoint.
    pub duration_secs: Option<i64>,
}

/// Aggregate view over a domain's recent runs.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStats {
    pub audits: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub total_pages: u64,
    pub avg_pages: f64,
    /// `(audit id, page count)` newest first, for trend display.
    pub page_trend: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
}

/// Owner of the per-domain directory layout and run history.
pub struct AuditManager {
    root: PathBuf,
    state_store: StateStore,
}

impl AuditManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state_store: StateStore::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn domain_dir(&self, host: &str) -> PathBuf {
        self.root.join(domain_slug(host))
    }

    /// Resume the most recent in-progress audit, or create a fresh one.
    pub async fn create_or_resume(&self, host: &str, force_new: bool) -> Result<AuditHandle> {
        if !force_new {
            if let Some(id) = self.newest_in_progress(host).await? {
                let dir = self.domain_dir(host).join(&id);
                info!("resuming audit {id}");
                return Ok(AuditHandle {
                    id,
                    dir,
                    resumed: true,
                });
            }
        }
        self.create_new(host).await
    }

    /// Create a new timestamped audit directory with its skeleton.
    pub async fn create_new(&self, host: &str) -> Result<AuditHandle> {
        let domain_dir = self.domain_dir(host);
        let mut stamp = Local::now();
        let (id, dir) = loop {
            let id = format!("{AUDIT_DIR_PREFIX}{}", stamp.format(AUDIT_TIMESTAMP_FORMAT));
            let dir = domain_dir.join(&id);
            if !dir.exists() {
                break (id, dir);
            }
            // Same-second collision: advance the name, never reuse a dir.
            stamp += ChronoDuration::seconds(1);
        };

        tokio::fs::create_dir_all(dir.join(PAGE_DATA_DIR))
            .await
            .with_context(|| format!("create {}", dir.display()))?;
        tokio::fs::create_dir_all(dir.join(COMPARISONS_DIR)).await?;

        let handle = AuditHandle {
            id,
            dir,
            resumed: false,
        };
        self.write_status(&handle.dir, AuditStatus::InProgress)
            .await?;
        info!("created audit {} for {host}", handle.id);
        Ok(handle)
    }

    /// Set an audit's lifecycle status. Terminal states stick: marking a
    /// completed or failed audit again is a logged no-op.
    pub async fn mark(&self, handle: &AuditHandle, status: AuditStatus) -> Result<()> {
        let current = self.status_of(&handle.dir).await;
        if current.is_terminal() && current != status {
            warn!(
                "audit {} already {current}; ignoring transition to {status}",
                handle.id
            );
            return Ok(());
        }
        self.write_status(&handle.dir, status).await
    }

    async fn write_status(&self, dir: &Path, status: AuditStatus) -> Result<()> {
        let path = dir.join(STATUS_FILE);
        let line = format!("{status}\n");
        tokio::task::spawn_blocking(move || atomic_write(&path, line.as_bytes()))
            .await
            .context("status write task panicked")?
    }

    /// Current status of an audit directory; missing or garbled marker files
    /// read as in-progress, which errs on the side of never deleting data.
    pub async fn status_of(&self, dir: &Path) -> AuditStatus {
        match tokio::fs::read_to_string(dir.join(STATUS_FILE)).await {
            Ok(content) => AuditStatus::parse(&content).unwrap_or(AuditStatus::InProgress),
            Err(_) => AuditStatus::InProgress,
        }
    }

    /// All audit directory names for a domain, newest first.
    async fn audit_ids(&self, host: &str) -> Result<Vec<String>> {
        let dir = self.domain_dir(host);
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(AUDIT_DIR_PREFIX) && entry.path().is_dir() {
                ids.push(name.to_string());
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn newest_in_progress(&self, host: &str) -> Result<Option<String>> {
        for id in self.audit_ids(host).await? {
            let dir = self.domain_dir(host).join(&id);
            if self.status_of(&dir).await == AuditStatus::InProgress {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Handle for an existing audit; errors when the directory is missing.
    pub fn handle_for(&self, host: &str, id: &str) -> Result<AuditHandle> {
        let dir = self.domain_dir(host).join(id);
        if !dir.is_dir() {
            anyhow::bail!("no such audit: {id}");
        }
        Ok(AuditHandle {
            id: id.to_string(),
            dir,
            resumed: true,
        })
    }

    /// Summaries of all runs for a domain, newest first.
    pub async fn list(&self, host: &str) -> Result<Vec<AuditSummary>> {
        let mut out = Vec::new();
        for id in self.audit_ids(host).await? {
            let dir = self.domain_dir(host).join(&id);
            let status = self.status_of(&dir).await;
            let started_at = parse_audit_timestamp(&id);

            let state_path = dir.join(format!("{id}{STATE_FILE_SUFFIX}"));
            let snapshot = match self.state_store.load(&state_path).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("unreadable snapshot for {id}: {e:#}");
                    None
                }
            };

            let duration_secs = match (&snapshot, started_at) {
                (Some(s), Some(start)) => {
                    let span = s.meta.timestamp.signed_duration_since(start).num_seconds();
                    (span >= 0).then_some(span)
                }
                _ => None,
            };

            out.push(AuditSummary {
                id,
                status,
                started_at,
                pages: snapshot.as_ref().map(|s| s.page_data_size),
                internal_links: snapshot.as_ref().map(|s| s.stats.len()),
                external_links: snapshot.as_ref().map(|s| s.external_links.len()),
                broken_links: snapshot.as_ref().map(|s| s.broken_link_count()),
                queue_remaining: snapshot.as_ref().map(|s| s.queue.len()),
                duration_secs,
            });
        }
        Ok(out)
    }

    /// Aggregate stats across a domain's audit history.
    pub async fn stats(&self, host: &str) -> Result<DomainStats> {
        let summaries = self.list(host).await?;
        let mut stats = DomainStats {
            audits: summaries.len(),
            completed: 0,
            in_progress: 0,
            failed: 0,
            total_pages: 0,
            avg_pages: 0.0,
            page_trend: Vec::new(),
        };

        let mut counted = 0u64;
        for summary in &summaries {
            match summary.status {
                AuditStatus::Completed => stats.completed += 1,
                AuditStatus::InProgress => stats.in_progress += 1,
                AuditStatus::Failed => stats.failed += 1,
            }
            if let Some(pages) = summary.pages {
                stats.total_pages += pages;
                counted += 1;
                stats.page_trend.push((summary.id.clone(), pages));
            }
        }
        if counted > 0 {
            stats.avg_pages = stats.total_pages as f64 / counted as f64;
        }
        Ok(stats)
    }

    /// Delete all but the `keep` newest audits. In-progress audits are never
    /// deleted, whatever their age.
    pub async fn cleanup(&self, host: &str, keep: usize) -> Result<CleanupReport> {
        let ids = self.audit_ids(host).await?;
        let mut report = CleanupReport::default();

        for (index, id) in ids.iter().enumerate() {
            let dir = self.domain_dir(host).join(id);
            if index < keep {
                report.kept += 1;
                continue;
            }
            if self.status_of(&dir).await == AuditStatus::InProgress {
                debug!("cleanup sparing in-progress audit {id}");
                report.kept += 1;
                continue;
            }
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("remove {}", dir.display()))?;
            info!("cleanup removed audit {id}");
            report.removed += 1;
        }
        Ok(report)
    }

    /// Diff two audits along the fixed metric vector and write the report
    /// under the newer audit's comparisons directory. Read-only otherwise.
    pub async fn compare(&self, host: &str, a: &str, b: &str) -> Result<ComparisonReport> {
        let (older_id, newer_id) = if a <= b { (a, b) } else { (b, a) };
        let older = self.handle_for(host, older_id)?;
        let newer = self.handle_for(host, newer_id)?;

        let older_metrics = self.metrics_for(&older).await?;
        let newer_metrics = self.metrics_for(&newer).await?;

        let report = ComparisonReport::build(
            older.id.clone(),
            newer.id.clone(),
            older_metrics,
            newer_metrics,
        );

        let out_path = newer
            .comparisons_dir()
            .join(format!("{}-vs-{}.json", older.id, newer.id));
        let json = serde_json::to_vec_pretty(&report).context("serialize comparison report")?;
        tokio::task::spawn_blocking(move || atomic_write(&out_path, &json))
            .await
            .context("comparison write task panicked")??;

        Ok(report)
    }

    async fn metrics_for(&self, handle: &AuditHandle) -> Result<AuditMetrics> {
        let state = self
            .state_store
            .load(&handle.state_path())
            .await?
            .ok_or_else(|| anyhow::anyhow!("audit {} has no snapshot", handle.id))?;

        let store = PageDataStore::new(handle.page_data_dir());
        let avg = tokio::task::spawn_blocking(move || {
            let mut sum: u64 = 0;
            let mut n: u64 = 0;
            for (_, record) in store.iterate() {
                sum += record.response_time_ms;
                n += 1;
            }
            if n > 0 { sum as f64 / n as f64 } else { 0.0 }
        })
        .await
        .context("metrics task panicked")?;

        Ok(AuditMetrics::from_state(&state, avg))
    }
}

fn parse_audit_timestamp(id: &str) -> Option<DateTime<Local>> {
    let stamp = id.strip_prefix(AUDIT_DIR_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(stamp, AUDIT_TIMESTAMP_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            AuditStatus::InProgress,
            AuditStatus::Completed,
            AuditStatus::Failed,
        ] {
            assert_eq!(AuditStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuditStatus::parse("garbage"), None);
    }

    #[test]
    fn audit_names_parse_back_to_timestamps() {
        let parsed = parse_audit_timestamp("audit-2025-11-03-14-22-09");
        assert!(parsed.is_some());
        assert!(parse_audit_timestamp("audit-bogus").is_none());
        assert!(parse_audit_timestamp("not-an-audit").is_none());
    }
}
