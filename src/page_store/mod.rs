//! Per-page record store: one file per canonical URL under `page-data/`.
//!
//! Filenames are the URL-safe base64 of the canonical URL with a `.json` or
//! `.json.gz` extension. Records above the compression threshold are
//! gzipped; exactly one variant exists per key after any successful write.
//! A bounded LRU cache sits in front of the disk.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, warn};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::extractor::schema::PageRecord;
use crate::utils::{
    atomic_write, atomic_write_gzip, gzip_expanded_size, read_maybe_gzip, COMPRESSION_LEVEL,
    COMPRESSION_THRESHOLD,
};

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// On-disk footprint summary.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub compressed_count: usize,
    pub uncompressed_count: usize,
    pub compressed_bytes: u64,
    pub uncompressed_bytes: u64,
    /// Bytes saved by compression, against the records' expanded sizes.
    pub bytes_saved: u64,
    /// Compressed size over expanded size for the compressed records;
    /// `1.0` when nothing is compressed.
    pub ratio: f64,
}

/// Outcome of a `migrate` pass.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub migrated: usize,
    pub errors: usize,
    pub bytes_saved: u64,
}

/// Store for [`PageRecord`]s keyed by canonical URL.
pub struct PageDataStore {
    dir: PathBuf,
    threshold: usize,
    cache: Mutex<LruCache<String, Arc<PageRecord>>>,
}

impl PageDataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(dir, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: dir.into(),
            threshold: COMPRESSION_THRESHOLD,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Override the compression threshold (tests exercise the boundary).
    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn variant_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let name = URL_SAFE_NO_PAD.encode(url.as_bytes());
        (
            self.dir.join(format!("{name}.json")),
            self.dir.join(format!("{name}.json.gz")),
        )
    }

    /// Persist a record, overwriting any previous visit. Returns `true` when
    /// the key had no record before (in either variant).
    ///
    /// A failed compressed write degrades to a plain write with a warning;
    /// the stale sibling of the variant actually written is removed so only
    /// one file per key survives.
    pub async fn put(&self, url: &str, record: PageRecord) -> Result<bool> {
        let record = Arc::new(record);
        let (json_path, gz_path) = self.variant_paths(url);
        let threshold = self.threshold;
        let to_write = Arc::clone(&record);

        let is_new = tokio::task::spawn_blocking(move || -> Result<bool> {
            let was_present = json_path.exists() || gz_path.exists();
            let json = serde_json::to_vec(&*to_write).context("serialize page record")?;

            if json.len() > threshold {
                match atomic_write_gzip(&gz_path, &json, COMPRESSION_LEVEL) {
                    Ok(()) => {
                        remove_if_present(&json_path);
                        return Ok(!was_present);
                    }
                    Err(e) => {
                        warn!("compressed record write failed, storing plain: {e:#}");
                    }
                }
            }

            atomic_write(&json_path, &json)?;
            remove_if_present(&gz_path);
            Ok(!was_present)
        })
        .await
        .context("page record write task panicked")??;

        self.cache.lock().put(url.to_string(), record);
        Ok(is_new)
    }

    /// Fetch a record: cache first, then the compressed variant, then the
    /// plain one. An unreadable variant is only an error if the other one
    /// cannot serve the record either — then the answer is `None` with a
    /// warning, never a crash.
    pub async fn get(&self, url: &str) -> Option<Arc<PageRecord>> {
        if let Some(hit) = self.cache.lock().get(url) {
            return Some(Arc::clone(hit));
        }

        let (json_path, gz_path) = self.variant_paths(url);
        let key = url.to_string();
        let loaded = tokio::task::spawn_blocking(move || read_record(&gz_path, &json_path))
            .await
            .ok()
            .flatten()?;

        let record = Arc::new(loaded);
        self.cache.lock().put(key, Arc::clone(&record));
        Some(record)
    }

    /// Cheap existence check; no deserialization.
    pub async fn has(&self, url: &str) -> bool {
        if self.cache.lock().contains(url) {
            return true;
        }
        let (json_path, gz_path) = self.variant_paths(url);
        tokio::fs::try_exists(&gz_path).await.unwrap_or(false)
            || tokio::fs::try_exists(&json_path).await.unwrap_or(false)
    }

    /// Remove both variants and the cache entry.
    pub async fn delete(&self, url: &str) -> Result<()> {
        self.cache.lock().pop(url);
        let (json_path, gz_path) = self.variant_paths(url);
        for path in [json_path, gz_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
            }
        }
        Ok(())
    }

    /// Lazily walk all records: cached entries first, then the remaining
    /// files on disk. Order is unspecified; each call starts fresh. Reads
    /// block the calling thread — use from sync contexts or `spawn_blocking`.
    #[must_use]
    pub fn iterate(&self) -> PageIter {
        let cached: Vec<(String, Arc<PageRecord>)> = self
            .cache
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let seen = cached.iter().map(|(k, _)| k.clone()).collect();
        PageIter {
            cached: cached.into_iter(),
            disk: fs::read_dir(&self.dir).ok(),
            seen,
        }
    }

    /// Count records and bytes on disk; expanded sizes of compressed records
    /// come from the gzip ISIZE trailer, so nothing is decompressed.
    pub async fn stats(&self) -> Result<StoreStats> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<StoreStats> {
            let mut stats = StoreStats {
                ratio: 1.0,
                ..StoreStats::default()
            };
            let mut expanded_total: u64 = 0;

            for path in record_files(&dir)? {
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if path.extension().is_some_and(|e| e == "gz") {
                    stats.compressed_count += 1;
                    stats.compressed_bytes += size;
                    expanded_total += gzip_expanded_size(&path).unwrap_or(size);
                } else {
                    stats.uncompressed_count += 1;
                    stats.uncompressed_bytes += size;
                }
            }

            stats.bytes_saved = expanded_total.saturating_sub(stats.compressed_bytes);
            if expanded_total > 0 {
                stats.ratio = stats.compressed_bytes as f64 / expanded_total as f64;
            }
            Ok(stats)
        })
        .await
        .context("store stats task panicked")?
    }

    /// Compress every oversized plain record in place. Running it twice is a
    /// no-op the second time.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let dir = self.dir.clone();
        let threshold = self.threshold;

        tokio::task::spawn_blocking(move || -> Result<MigrationReport> {
            let mut report = MigrationReport::default();
            for path in record_files(&dir)? {
                if path.extension().is_some_and(|e| e == "gz") {
                    continue;
                }
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if size as usize <= threshold {
                    continue;
                }

                let result = (|| -> Result<u64> {
                    let raw = fs::read(&path)?;
                    let mut gz_path = path.as_os_str().to_owned();
                    gz_path.push(".gz");
                    let gz_path = PathBuf::from(gz_path);
                    atomic_write_gzip(&gz_path, &raw, COMPRESSION_LEVEL)?;
                    let packed = fs::metadata(&gz_path).map(|m| m.len()).unwrap_or(0);
                    fs::remove_file(&path)?;
                    Ok(size.saturating_sub(packed))
                })();

                match result {
                    Ok(saved) => {
                        report.migrated += 1;
                        report.bytes_saved += saved;
                    }
                    Err(e) => {
                        warn!("record migration failed for {}: {e:#}", path.display());
                        report.errors += 1;
                    }
                }
            }
            Ok(report)
        })
        .await
        .context("store migration task panicked")?
    }
}

/// Iterator over `(canonical_url, record)` pairs; see
/// [`PageDataStore::iterate`].
pub struct PageIter {
    cached: std::vec::IntoIter<(String, Arc<PageRecord>)>,
    disk: Option<fs::ReadDir>,
    seen: HashSet<String>,
}

impl Iterator for PageIter {
    type Item = (String, Arc<PageRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.cached.next() {
            return Some(entry);
        }

        let disk = self.disk.as_mut()?;
        for entry in disk.by_ref() {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            let Some(url) = decode_record_filename(&path) else {
                continue;
            };
            if !self.seen.insert(url.clone()) {
                continue;
            }
            match read_one(&path) {
                Some(record) => return Some((url, Arc::new(record))),
                None => continue,
            }
        }
        None
    }
}

fn decode_record_filename(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".json.gz")
        .or_else(|| name.strip_suffix(".json"))?;
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

fn read_record(gz_path: &Path, json_path: &Path) -> Option<PageRecord> {
    for candidate in [gz_path, json_path] {
        if !candidate.exists() {
            continue;
        }
        match read_one(candidate) {
            Some(record) => return Some(record),
            None => {
                debug!("trying sibling variant of {}", candidate.display());
            }
        }
    }
    None
}

fn read_one(path: &Path) -> Option<PageRecord> {
    match read_maybe_gzip(path).and_then(|bytes| {
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
    }) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("unreadable page record {}: {e:#}", path.display());
            None
        }
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove stale variant {}: {e}", path.display()),
    }
}

fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read dir {}", dir.display())),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.context("read dir entry")?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".json") || name.ends_with(".json.gz") {
            out.push(path);
        }
    }
    Ok(out)
}
