//! Error taxonomy for the insight pipeline.
//!
//! Per-log errors ([`SanitizationError`], [`EndpointError`],
//! [`SchemaViolation`]) are contained and recorded on the log's
//! result. Window-level errors ([`PipelineError`]) abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// The raw log could not be turned into a sanitized excerpt.
///
/// Never retried and never sent over the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizationError {
    #[error("log is empty")]
    Empty,

    #[error("missing title heading (a line starting with '# ')")]
    MissingTitle,

    #[error("missing required section '## {0}'")]
    MissingSection(String),

    #[error("unknown redaction rule set '{0}'")]
    UnknownRuleSet(String),
}

/// Classification of a failed endpoint call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, DNS failure, reset.
    Network,
    /// Request timed out (client side or HTTP 408).
    Timeout,
    /// HTTP 429.
    RateLimit,
    /// HTTP 5xx.
    ServerError,
}

/// A failed call to the analysis endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Retryable network, rate-limit or server condition.
    #[error("transient {kind:?} error: {message}")]
    Transient { kind: FailureKind, message: String },

    /// The endpoint refused the request (auth, bad request, unknown model).
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// A success status whose envelope could not be decoded.
    #[error("malformed response envelope: {0}")]
    Malformed(String),
}

impl EndpointError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EndpointError::Transient { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = truncate(body, 300);
        match status {
            408 => EndpointError::Transient {
                kind: FailureKind::Timeout,
                message,
            },
            429 => EndpointError::Transient {
                kind: FailureKind::RateLimit,
                message,
            },
            500..=599 => EndpointError::Transient {
                kind: FailureKind::ServerError,
                message: format!("HTTP {}: {}", status, message),
            },
            _ => EndpointError::Rejected { status, message },
        }
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        body.to_string()
    } else {
        let cut: String = body.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// A response arrived but did not satisfy the output schema.
///
/// Not retried: the call already succeeded and consumed quota.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schema violation: {0}")]
pub struct SchemaViolation(pub String);

/// The goal source is missing or malformed; the run cannot start.
#[derive(Debug, Error)]
pub enum GoalSourceError {
    #[error("goal file missing at {0}")]
    Missing(PathBuf),

    #[error("failed to read goal file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed goal file {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("no goal ids found in {0}")]
    NoGoals(PathBuf),
}

/// Persisting or loading an analysis artifact failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact encoding error at {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Appending to the usage ledger failed.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("usage ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("usage ledger encoding error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Run-level failures. Every aborted run ends with one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("goal source unavailable: {0}")]
    GoalSourceUnavailable(#[from] GoalSourceError),

    #[error("insufficient data for {week_id}: no successful analyses ({failed} failed)")]
    InsufficientData { week_id: String, failed: usize },

    #[error("run cancelled: {completed} log(s) completed, {abandoned} abandoned")]
    Cancelled { completed: usize, abandoned: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}
