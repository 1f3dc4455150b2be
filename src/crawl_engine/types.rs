//! Error and outcome types for audit runs.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Library-boundary error for audit operations.
///
/// Per-URL trouble (network errors, timeouts, bad statuses, unparseable
/// bodies) never surfaces here — it is recorded in the crawl state and the
/// run continues. These variants are the failures that end or prevent a run.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Bad caller input; nothing was started.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A page record or snapshot could not be written after retry+fallback.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Snapshot unreadable in both variants; the caller starts fresh.
    #[error("crawl state unreadable: {0}")]
    CorruptState(String),

    /// Cooperative stop observed; the audit stays resumable.
    #[error("run cancelled")]
    Cancelled,

    /// A programmer invariant was violated; the audit is marked failed and
    /// its state preserved for inspection.
    #[error("internal invariant violated: {0}")]
    FatalInternal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The queue drained; the audit is complete.
    QueueDrained,
    /// The page budget was hit; the audit is complete, the queue may remain.
    BudgetReached,
    /// A stop was requested; the audit stays in progress for resume.
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueDrained => write!(f, "queue drained"),
            Self::BudgetReached => write!(f, "page budget reached"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary returned from a finished (or stopped) run.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub audit_id: String,
    pub audit_dir: PathBuf,
    pub reason: TerminationReason,
    pub pages_processed: usize,
    pub duration: Duration,
}
