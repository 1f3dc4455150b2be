//! Gzip helpers shared by the page-data and state stores.
//!
//! All writes are atomic: the payload goes to a [`tempfile::NamedTempFile`]
//! in the target directory and is renamed into place, so a reader never
//! observes a partial file.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Compress `data` in memory at the given gzip level.
pub fn gzip_bytes(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).context("gzip write")?;
    encoder.finish().context("gzip finish")
}

/// Decompress a gzip payload fully into memory.
pub fn gunzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).context("gzip read")?;
    Ok(out)
}

/// Atomically write `data` to `path`, creating parent directories as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;

    let mut temp = NamedTempFile::new_in(parent).context("create temp file")?;
    temp.write_all(data).context("write temp file")?;
    temp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Atomically write `data` gzip-compressed to `path`.
pub fn atomic_write_gzip(path: &Path, data: &[u8], level: u32) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;

    let temp = NamedTempFile::new_in(parent).context("create temp file")?;
    let mut encoder = GzEncoder::new(temp, Compression::new(level));
    encoder.write_all(data).context("gzip write")?;
    let temp = encoder.finish().context("gzip finish")?;
    temp.persist(path)
        .with_context(|| format!("persist {}", path.display()))?;
    Ok(())
}

/// Read a file, transparently gunzipping when `path` ends in `.gz`.
pub fn read_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if path.extension().is_some_and(|e| e == "gz") {
        gunzip_bytes(&raw).with_context(|| format!("decompress {}", path.display()))
    } else {
        Ok(raw)
    }
}

/// Uncompressed size of a gzip file, read from the ISIZE trailer (last four
/// bytes, little-endian, modulo 2^32 — exact for anything we write).
pub fn gzip_expanded_size(path: &Path) -> Result<u64> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if raw.len() < 4 {
        anyhow::bail!("not a gzip file: {}", path.display());
    }
    let mut tail = [0u8; 4];
    tail.copy_from_slice(&raw[raw.len() - 4..]);
    Ok(u64::from(u32::from_le_bytes(tail)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let packed = gzip_bytes(&data, 6).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(gunzip_bytes(&packed).unwrap(), data);
    }

    #[test]
    fn isize_trailer_matches_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.gz");
        let data = vec![7u8; 12_345];
        atomic_write_gzip(&path, &data, 6).unwrap();
        assert_eq!(gzip_expanded_size(&path).unwrap(), 12_345);
    }
}
