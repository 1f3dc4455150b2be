//! Durable snapshot store for [`CrawlState`].
//!
//! One snapshot file per audit, named `<auditId>-crawl-state.json` (or
//! `.json.gz` once it outgrows the compression threshold). Saves go through
//! a temp file and rename, so an interrupted checkpoint never corrupts the
//! previous one; at rest exactly one of the two variants exists.

pub mod types;

pub use types::{
    BadRequest, CrawlState, ExternalLink, FunctionalLink, LinkStat, LinkStatus, SnapshotMeta,
    SNAPSHOT_VERSION,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{
    atomic_write, atomic_write_gzip, gzip_bytes, read_maybe_gzip, COMPRESSION_LEVEL,
    COMPRESSION_THRESHOLD,
};

/// Filename suffix identifying snapshot files during migration walks.
pub const STATE_FILE_SUFFIX: &str = "-crawl-state.json";

/// Summary of the snapshot files under a directory tree.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub compressed_count: usize,
    pub uncompressed_count: usize,
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
    /// Bytes a `migrate` pass would reclaim from oversized plain files.
    pub potential_savings: u64,
}

/// Outcome of a `migrate` pass.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub migrated: usize,
    pub errors: usize,
    pub bytes_saved: u64,
}

/// Snapshot reader/writer with a fixed compression policy.
#[derive(Debug, Clone)]
pub struct StateStore {
    threshold: usize,
    level: u32,
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            threshold: COMPRESSION_THRESHOLD,
            level: COMPRESSION_LEVEL,
        }
    }
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the compression threshold (tests exercise the boundary).
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Serialize and persist a snapshot. `path` is the logical plain-JSON
    /// path; the store decides which variant actually lands on disk and
    /// removes the sibling on success. A failed compressed write falls back
    /// to plain so a checkpoint is never silently lost.
    pub async fn save(&self, mut state: CrawlState, path: &Path) -> Result<()> {
        state.touch();
        let path = path.to_path_buf();
        let gz_path = gz_sibling(&path);
        let threshold = self.threshold;
        let level = self.level;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let json = serde_json::to_vec_pretty(&state).context("serialize crawl state")?;

            if json.len() > threshold {
                match atomic_write_gzip(&gz_path, &json, level) {
                    Ok(()) => {
                        remove_if_present(&path);
                        debug!(
                            "snapshot saved compressed: {} ({} bytes raw)",
                            gz_path.display(),
                            json.len()
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(
                            "compressed snapshot write failed, falling back to plain JSON: {e:#}"
                        );
                    }
                }
            }

            // Plain write, with one retry: a transient failure here would
            // otherwise drop a whole checkpoint.
            if let Err(first) = atomic_write(&path, &json) {
                warn!("snapshot write failed, retrying once: {first:#}");
                atomic_write(&path, &json).context("snapshot write retry")?;
            }
            remove_if_present(&gz_path);
            Ok(())
        })
        .await
        .context("snapshot save task panicked")?
    }

    /// Load a snapshot, trying the compressed variant first and falling back
    /// to the plain one if the first is missing or corrupt. `Ok(None)` means
    /// no snapshot exists; an error means both variants are unreadable.
    pub async fn load(&self, path: &Path) -> Result<Option<CrawlState>> {
        let path = path.to_path_buf();
        let gz_path = gz_sibling(&path);

        tokio::task::spawn_blocking(move || -> Result<Option<CrawlState>> {
            let mut found_any = false;
            for candidate in [&gz_path, &path] {
                if !candidate.exists() {
                    continue;
                }
                found_any = true;
                match read_snapshot(candidate) {
                    Ok(state) => return Ok(Some(state)),
                    Err(e) => {
                        warn!("snapshot variant unreadable: {}: {e:#}", candidate.display());
                    }
                }
            }
            if found_any {
                anyhow::bail!("snapshot unreadable in both variants: {}", path.display());
            }
            Ok(None)
        })
        .await
        .context("snapshot load task panicked")?
    }

    /// Rewrite oversized plain snapshots under `dir` as gzip. Idempotent:
    /// already-compressed files and small files are left alone.
    pub async fn migrate(&self, dir: &Path) -> Result<MigrationReport> {
        let dir = dir.to_path_buf();
        let threshold = self.threshold;
        let level = self.level;

        tokio::task::spawn_blocking(move || -> Result<MigrationReport> {
            let mut report = MigrationReport::default();
            for path in find_snapshot_files(&dir)? {
                let size = match fs::metadata(&path) {
                    Ok(m) => m.len(),
                    Err(e) => {
                        warn!("skipping {}: {e}", path.display());
                        report.errors += 1;
                        continue;
                    }
                };
                if size as usize <= threshold {
                    continue;
                }
                match migrate_one(&path, level) {
                    Ok(saved) => {
                        report.migrated += 1;
                        report.bytes_saved += saved;
                    }
                    Err(e) => {
                        warn!("migration failed for {}: {e:#}", path.display());
                        report.errors += 1;
                    }
                }
            }
            Ok(report)
        })
        .await
        .context("snapshot migration task panicked")?
    }

    /// Size summary over all snapshot files under `dir`.
    pub async fn stats(&self, dir: &Path) -> Result<SnapshotStats> {
        let dir = dir.to_path_buf();
        let threshold = self.threshold;
        let level = self.level;

        tokio::task::spawn_blocking(move || -> Result<SnapshotStats> {
            let mut stats = SnapshotStats::default();
            for path in find_snapshot_files_any_variant(&dir)? {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if path.extension().is_some_and(|e| e == "gz") {
                    stats.compressed_count += 1;
                    stats.compressed_bytes += size;
                } else {
                    stats.uncompressed_count += 1;
                    stats.uncompressed_bytes += size;
                    if size as usize > threshold {
                        if let Ok(raw) = fs::read(&path) {
                            if let Ok(packed) = gzip_bytes(&raw, level) {
                                stats.potential_savings +=
                                    size.saturating_sub(packed.len() as u64);
                            }
                        }
                    }
                }
            }
            Ok(stats)
        })
        .await
        .context("snapshot stats task panicked")?
    }

    /// Human-readable rendering of [`Self::stats`].
    pub async fn report(&self, dir: &Path) -> Result<String> {
        let stats = self.stats(dir).await?;
        Ok(format!(
            "snapshots: {} compressed ({} bytes), {} plain ({} bytes), {} bytes reclaimable",
            stats.compressed_count,
            stats.compressed_bytes,
            stats.uncompressed_count,
            stats.uncompressed_bytes,
            stats.potential_savings
        ))
    }
}

fn gz_sibling(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".gz");
    PathBuf::from(s)
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove stale variant {}: {e}", path.display()),
    }
}

fn read_snapshot(path: &Path) -> Result<CrawlState> {
    let bytes = read_maybe_gzip(path)?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

fn migrate_one(path: &Path, level: u32) -> Result<u64> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let gz_path = gz_sibling(path);
    atomic_write_gzip(&gz_path, &raw, level)?;
    let packed = fs::metadata(&gz_path).map(|m| m.len()).unwrap_or(0);
    fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    Ok((raw.len() as u64).saturating_sub(packed))
}

/// Plain snapshot files (`*-crawl-state.json`) under `dir`, recursively.
fn find_snapshot_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir, &mut |path| {
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(STATE_FILE_SUFFIX))
        {
            out.push(path.to_path_buf());
        }
    })?;
    Ok(out)
}

/// Snapshot files in either variant under `dir`, recursively.
fn find_snapshot_files_any_variant(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir, &mut |path| {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if name.ends_with(STATE_FILE_SUFFIX) || name.ends_with(&format!("{STATE_FILE_SUFFIX}.gz"))
        {
            out.push(path.to_path_buf());
        }
    })?;
    Ok(out)
}

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path)) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("read dir {}", dir.display())),
    };
    for entry in entries {
        let entry = entry.context("read dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, visit)?;
        } else {
            visit(&path);
        }
    }
    Ok(())
}
