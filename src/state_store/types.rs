//! Crawl-wide aggregate state: the unit of checkpointing and resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Serializer version tag stamped into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Outcome of the last request to a URL: an HTTP status code or a symbolic
/// marker such as `TIMEOUT` when no response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkStatus {
    Code(u16),
    Symbol(String),
}

impl LinkStatus {
    pub const TIMEOUT: &'static str = "TIMEOUT";
    pub const ERROR: &'static str = "ERROR";

    pub fn timeout() -> Self {
        Self::Symbol(Self::TIMEOUT.to_string())
    }

    pub fn error() -> Self {
        Self::Symbol(Self::ERROR.to_string())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Code(c) if (200..300).contains(c))
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(c) => write!(f, "{c}"),
            Self::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// Occurrence record for an internal link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStat {
    /// Total occurrences, counting repeats on the same source page.
    pub count: u64,
    /// Distinct anchor texts seen for this target.
    pub anchors: HashSet<String>,
    /// Canonical URLs of the pages linking here.
    pub sources: HashSet<String>,
}

/// Last non-2xx outcome for an internal URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadRequest {
    pub status: LinkStatus,
    pub sources: HashSet<String>,
}

/// An off-host link and what we know about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLink {
    /// `None` until a probe fills it in.
    pub status: Option<LinkStatus>,
    pub sources: HashSet<String>,
    /// Response headers from the probe, case-folded keys.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Hops followed by the probe; ends with `"loop"` when the chain cycles.
    pub redirect_chain: Option<Vec<String>>,
    /// First time this link was seen.
    pub timestamp: DateTime<Utc>,
}

/// Sink for `mailto:` / `tel:` links: just who references them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionalLink {
    pub sources: HashSet<String>,
}

/// Snapshot metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// The full crawl state: everything needed to resume after an interruption.
///
/// `visited` and `queue` are sets; queue pick order is deliberately
/// unspecified and not preserved across resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlState {
    pub visited: HashSet<String>,
    pub queue: HashSet<String>,
    pub stats: HashMap<String, LinkStat>,
    pub bad_requests: HashMap<String, BadRequest>,
    pub external_links: HashMap<String, ExternalLink>,
    pub mailto_links: HashMap<String, FunctionalLink>,
    pub tel_links: HashMap<String, FunctionalLink>,
    /// Number of page records written by the run(s) of this audit.
    pub page_data_size: u64,
    #[serde(rename = "_compression")]
    pub meta: SnapshotMeta,
}

impl CrawlState {
    /// Fresh state with the seed as the only queued URL.
    #[must_use]
    pub fn seeded(seed: &str) -> Self {
        let mut queue = HashSet::new();
        queue.insert(seed.to_string());
        Self {
            visited: HashSet::new(),
            queue,
            stats: HashMap::new(),
            bad_requests: HashMap::new(),
            external_links: HashMap::new(),
            mailto_links: HashMap::new(),
            tel_links: HashMap::new(),
            page_data_size: 0,
            meta: SnapshotMeta {
                version: SNAPSHOT_VERSION.to_string(),
                timestamp: Utc::now(),
            },
        }
    }

    /// Record one occurrence of an internal link.
    pub fn record_internal_link(&mut self, target: &str, anchor: &str, source: &str) {
        let entry = self.stats.entry(target.to_string()).or_default();
        entry.count += 1;
        let anchor = anchor.trim();
        if !anchor.is_empty() {
            entry.anchors.insert(anchor.to_string());
        }
        entry.sources.insert(source.to_string());
    }

    /// Record the last non-2xx outcome for an internal URL. Sources are
    /// inherited from the link stats so the overlay stays consistent with
    /// current `stats` membership.
    pub fn record_bad_request(&mut self, url: &str, status: LinkStatus) {
        let sources = self
            .stats
            .get(url)
            .map(|s| s.sources.clone())
            .unwrap_or_default();
        self.bad_requests
            .insert(url.to_string(), BadRequest { status, sources });
    }

    /// Record a sighting of an external link, creating the entry on first
    /// sight. Returns `true` when the entry is new (and thus unprobed).
    pub fn record_external_link(&mut self, url: &str, source: &str) -> bool {
        match self.external_links.get_mut(url) {
            Some(existing) => {
                existing.sources.insert(source.to_string());
                false
            }
            None => {
                let mut sources = HashSet::new();
                sources.insert(source.to_string());
                self.external_links.insert(
                    url.to_string(),
                    ExternalLink {
                        status: None,
                        sources,
                        headers: HashMap::new(),
                        redirect_chain: None,
                        timestamp: Utc::now(),
                    },
                );
                true
            }
        }
    }

    pub fn record_mailto(&mut self, key: &str, source: &str) {
        self.mailto_links
            .entry(key.to_string())
            .or_default()
            .sources
            .insert(source.to_string());
    }

    pub fn record_tel(&mut self, key: &str, source: &str) {
        self.tel_links
            .entry(key.to_string())
            .or_default()
            .sources
            .insert(source.to_string());
    }

    /// Count of internal URLs whose last outcome was not a 2xx.
    #[must_use]
    pub fn broken_link_count(&self) -> usize {
        self.bad_requests.len()
    }

    /// `queue` and `visited` must never overlap; a claimed URL leaves the
    /// queue in the same critical section that marks it visited.
    #[must_use]
    pub fn queue_visited_disjoint(&self) -> bool {
        let (small, large) = if self.queue.len() <= self.visited.len() {
            (&self.queue, &self.visited)
        } else {
            (&self.visited, &self.queue)
        };
        small.iter().all(|u| !large.contains(u))
    }

    /// Refresh the metadata block ahead of a save.
    pub fn touch(&mut self) {
        self.meta.version = SNAPSHOT_VERSION.to_string();
        self.meta.timestamp = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_status_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&LinkStatus::Code(404)).unwrap(),
            "404"
        );
        assert_eq!(
            serde_json::to_string(&LinkStatus::timeout()).unwrap(),
            "\"TIMEOUT\""
        );
        let back: LinkStatus = serde_json::from_str("500").unwrap();
        assert_eq!(back, LinkStatus::Code(500));
    }

    #[test]
    fn bad_request_inherits_stat_sources() {
        let mut state = CrawlState::seeded("https://a.test/");
        state.record_internal_link("https://a.test/x", "X", "https://a.test/");
        state.record_bad_request("https://a.test/x", LinkStatus::Code(500));
        let bad = &state.bad_requests["https://a.test/x"];
        assert!(bad.sources.contains("https://a.test/"));
    }

    #[test]
    fn count_never_below_source_cardinality() {
        let mut state = CrawlState::seeded("https://a.test/");
        state.record_internal_link("https://a.test/x", "one", "https://a.test/");
        state.record_internal_link("https://a.test/x", "two", "https://a.test/");
        let stat = &state.stats["https://a.test/x"];
        assert_eq!(stat.count, 2);
        assert_eq!(stat.sources.len(), 1);
        assert!(stat.count >= stat.sources.len() as u64);
    }
}
