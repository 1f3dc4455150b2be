//! Fluent builder for [`AuditConfig`].

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use super::types::AuditConfig;
use crate::url_norm;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;
const DEFAULT_MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Builder with sensible defaults; only the seed URL is required.
pub struct AuditConfigBuilder {
    seed_url: Option<String>,
    audits_root: PathBuf,
    workers: usize,
    max_internal_links: Option<usize>,
    request_timeout_secs: u64,
    checkpoint_interval: usize,
    user_agent: String,
    force_new: bool,
    probe_external_links: bool,
    max_response_bytes: usize,
    max_queue: Option<usize>,
    cache_capacity: usize,
}

impl Default for AuditConfigBuilder {
    fn default() -> Self {
        Self {
            seed_url: None,
            audits_root: PathBuf::from("audits"),
            workers: num_cpus::get().clamp(4, 8),
            max_internal_links: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            user_agent: concat!("domain-audit/", env!("CARGO_PKG_VERSION")).to_string(),
            force_new: false,
            probe_external_links: true,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_queue: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl AuditConfig {
    #[must_use]
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::default()
    }
}

impl AuditConfigBuilder {
    pub fn seed_url(mut self, seed: impl Into<String>) -> Self {
        self.seed_url = Some(seed.into());
        self
    }

    pub fn audits_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.audits_root = root.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn max_internal_links(mut self, limit: Option<usize>) -> Self {
        self.max_internal_links = limit;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs.max(1);
        self
    }

    pub fn checkpoint_interval(mut self, every: usize) -> Self {
        self.checkpoint_interval = every.max(1);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn force_new(mut self, force: bool) -> Self {
        self.force_new = force;
        self
    }

    pub fn probe_external_links(mut self, probe: bool) -> Self {
        self.probe_external_links = probe;
        self
    }

    pub fn max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes.max(1024);
        self
    }

    pub fn max_queue(mut self, cap: Option<usize>) -> Self {
        self.max_queue = cap;
        self
    }

    pub fn cache_capacity(mut self, records: usize) -> Self {
        self.cache_capacity = records.max(1);
        self
    }

    /// Validate and build. The seed must parse as an http(s) URL with a
    /// host; the builder rejects anything else before a crawl starts.
    pub fn build(self) -> Result<AuditConfig> {
        let seed_url = self
            .seed_url
            .ok_or_else(|| anyhow!("seed URL is required"))?;
        url_norm::seed_url(&seed_url).map_err(|e| anyhow!("invalid seed: {e}"))?;

        Ok(AuditConfig {
            seed_url,
            audits_root: self.audits_root,
            workers: self.workers,
            max_internal_links: self.max_internal_links,
            request_timeout_secs: self.request_timeout_secs,
            checkpoint_interval: self.checkpoint_interval,
            user_agent: self.user_agent,
            force_new: self.force_new,
            probe_external_links: self.probe_external_links,
            max_response_bytes: self.max_response_bytes,
            max_queue: self.max_queue,
            cache_capacity: self.cache_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_seed() {
        assert!(AuditConfig::builder().build().is_err());
    }

    #[test]
    fn build_rejects_non_http_seed() {
        let result = AuditConfig::builder().seed_url("ftp://example.com").build();
        assert!(result.is_err());
    }

    #[test]
    fn defaults_are_applied() {
        let config = AuditConfig::builder()
            .seed_url("example.com")
            .build()
            .unwrap();
        assert_eq!(config.request_timeout_secs, 10);
        assert!(config.probe_external_links);
        assert!(config.workers >= 4);
    }
}
