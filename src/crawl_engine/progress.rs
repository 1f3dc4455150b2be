//! Progress reporting abstraction for crawl runs.
//!
//! Implementations can log to the console, feed a UI, or stay silent. The
//! engine calls these at lifecycle points; none of them may block.

use super::types::TerminationReason;
use log::{info, warn};

/// Lifecycle event sink for a crawl run.
pub trait ProgressReporter: Send + Sync {
    /// The run is starting, fresh or resumed.
    fn report_started(&self, seed: &str, resumed: bool);

    /// A page finished processing.
    fn report_page(&self, url: &str, status: u16, queue_len: usize, processed: usize);

    /// A URL failed and was written to the failure log.
    fn report_failure(&self, url: &str, reason: &str);

    /// A checkpoint was written.
    fn report_checkpoint(&self, processed: usize);

    /// The run stopped.
    fn report_finished(&self, reason: TerminationReason, processed: usize);

    /// A recoverable error worth surfacing.
    fn report_error(&self, error: &str);
}

/// Progress reporter that does nothing.
#[derive(Debug, Clone, Copy)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    #[inline(always)]
    fn report_started(&self, _seed: &str, _resumed: bool) {}

    #[inline(always)]
    fn report_page(&self, _url: &str, _status: u16, _queue_len: usize, _processed: usize) {}

    #[inline(always)]
    fn report_failure(&self, _url: &str, _reason: &str) {}

    #[inline(always)]
    fn report_checkpoint(&self, _processed: usize) {}

    #[inline(always)]
    fn report_finished(&self, _reason: TerminationReason, _processed: usize) {}

    #[inline(always)]
    fn report_error(&self, _error: &str) {}
}

/// Progress reporter that narrates the run through the `log` facade.
#[derive(Debug, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report_started(&self, seed: &str, resumed: bool) {
        if resumed {
            info!("resuming crawl of {seed}");
        } else {
            info!("starting crawl of {seed}");
        }
    }

    fn report_page(&self, url: &str, status: u16, queue_len: usize, processed: usize) {
        info!("[{processed}] {status} {url} (queue: {queue_len})");
    }

    fn report_failure(&self, url: &str, reason: &str) {
        warn!("failed: {url} ({reason})");
    }

    fn report_checkpoint(&self, processed: usize) {
        info!("checkpoint at {processed} pages");
    }

    fn report_finished(&self, reason: TerminationReason, processed: usize) {
        info!("crawl finished: {reason} ({processed} pages)");
    }

    fn report_error(&self, error: &str) {
        warn!("{error}");
    }
}
