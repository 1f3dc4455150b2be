//! Run-to-run comparison: the diff math over two snapshots.
//!
//! Rendering (HTML or otherwise) happens elsewhere; this module only
//! computes the metric vector and its deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::state_store::CrawlState;

/// The fixed metric vector extracted from one audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetrics {
    pub pages: u64,
    pub internal_links: u64,
    pub external_links: u64,
    pub broken_links: u64,
    pub functional_links: u64,
    pub queue_remaining: u64,
    pub avg_response_time_ms: f64,
}

impl AuditMetrics {
    #[must_use]
    pub fn from_state(state: &CrawlState, avg_response_time_ms: f64) -> Self {
        Self {
            pages: state.page_data_size,
            internal_links: state.stats.len() as u64,
            external_links: state.external_links.len() as u64,
            broken_links: state.broken_link_count() as u64,
            functional_links: (state.mailto_links.len() + state.tel_links.len()) as u64,
            queue_remaining: state.queue.len() as u64,
            avg_response_time_ms,
        }
    }
}

/// Before/after pair for a single metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricDelta {
    pub before: f64,
    pub after: f64,
    pub change: f64,
    /// Relative change in percent; `None` when the baseline is zero.
    pub percent: Option<f64>,
}

impl MetricDelta {
    fn new(before: f64, after: f64) -> Self {
        let change = after - before;
        let percent = if before != 0.0 {
            Some(change / before * 100.0)
        } else {
            None
        };
        Self {
            before,
            after,
            change,
            percent,
        }
    }
}

/// Full comparison between two runs, keyed by metric name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub older: String,
    pub newer: String,
    pub generated_at: DateTime<Utc>,
    pub older_metrics: AuditMetrics,
    pub newer_metrics: AuditMetrics,
    pub deltas: BTreeMap<String, MetricDelta>,
}

impl ComparisonReport {
    #[must_use]
    pub fn build(older: String, newer: String, a: AuditMetrics, b: AuditMetrics) -> Self {
        let mut deltas = BTreeMap::new();
        deltas.insert("pages".into(), MetricDelta::new(a.pages as f64, b.pages as f64));
        deltas.insert(
            "internalLinks".into(),
            MetricDelta::new(a.internal_links as f64, b.internal_links as f64),
        );
        deltas.insert(
            "externalLinks".into(),
            MetricDelta::new(a.external_links as f64, b.external_links as f64),
        );
        deltas.insert(
            "brokenLinks".into(),
            MetricDelta::new(a.broken_links as f64, b.broken_links as f64),
        );
        deltas.insert(
            "functionalLinks".into(),
            MetricDelta::new(a.functional_links as f64, b.functional_links as f64),
        );
        deltas.insert(
            "queueRemaining".into(),
            MetricDelta::new(a.queue_remaining as f64, b.queue_remaining as f64),
        );
        deltas.insert(
            "avgResponseTimeMs".into(),
            MetricDelta::new(a.avg_response_time_ms, b.avg_response_time_ms),
        );

        Self {
            older,
            newer,
            generated_at: Utc::now(),
            older_metrics: a,
            newer_metrics: b,
            deltas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pages: u64, broken: u64) -> AuditMetrics {
        AuditMetrics {
            pages,
            internal_links: 10,
            external_links: 3,
            broken_links: broken,
            functional_links: 1,
            queue_remaining: 0,
            avg_response_time_ms: 120.0,
        }
    }

    #[test]
    fn deltas_carry_sign_and_percent() {
        let report = ComparisonReport::build(
            "audit-2025-01-01-00-00-00".into(),
            "audit-2025-02-01-00-00-00".into(),
            metrics(100, 4),
            metrics(150, 2),
        );
        let pages = &report.deltas["pages"];
        assert_eq!(pages.change, 50.0);
        assert_eq!(pages.percent, Some(50.0));

        let broken = &report.deltas["brokenLinks"];
        assert_eq!(broken.change, -2.0);
    }

    #[test]
    fn zero_baseline_has_no_percent() {
        let mut a = metrics(0, 0);
        a.avg_response_time_ms = 0.0;
        let report = ComparisonReport::build("a".into(), "b".into(), a, metrics(5, 1));
        assert_eq!(report.deltas["pages"].percent, None);
    }
}
