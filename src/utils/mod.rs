//! Small shared helpers: gzip plumbing and atomic file writes.

pub mod compression;

pub use compression::{
    atomic_write, atomic_write_gzip, gunzip_bytes, gzip_bytes, gzip_expanded_size,
    read_maybe_gzip,
};

/// Size threshold above which serialized records and snapshots are gzipped.
pub const COMPRESSION_THRESHOLD: usize = 10 * 1024;

/// Mid-range gzip level: most of the win of level 9 at a fraction of the cost.
pub const COMPRESSION_LEVEL: u32 = 6;
