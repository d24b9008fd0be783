use thiserror::Error;
use tracing::error;

use crate::monitoring::metrics::{MetricKind, MetricSelector};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Analysis Error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Source Error: {0}")]
    Source(#[from] SourceError),

    #[error("Alert Error: {0}")]
    Alert(#[from] AlertError),

    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Errors the analysis engine can hand back. None of them are fatal; the
/// caller decides whether to skip the series or report it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Insufficient data: need at least {required} samples, got {actual}")]
    InsufficientData {
        required: usize,
        actual: usize,
    },

    #[error("Invalid analyzer parameter '{name}': {reason}")]
    InvalidConfig {
        name: &'static str,
        reason: String,
    },

    #[error("Selector {selector:?} does not belong to metric kind {kind}")]
    SelectorMismatch {
        selector: MetricSelector,
        kind: MetricKind,
    },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read metrics for {kind}: {source}")]
    Io {
        kind: MetricKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed metrics payload for {kind}: {message}")]
    Malformed {
        kind: MetricKind,
        message: String,
    },

    #[error("Time series '{key}' missing from {kind} metrics")]
    MissingSeries {
        kind: MetricKind,
        key: &'static str,
    },

    #[error("Lookback of {lookback_seconds}s is outside 1..={max}s")]
    InvalidWindow {
        lookback_seconds: u64,
        max: u64,
    },

    #[error("Metrics source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to deliver alert for {selector}: {message}")]
    Delivery {
        selector: MetricSelector,
        message: String,
    },
}

impl MonitorError {
    /// Log the error with its chain and keep going.
    pub fn log(&self, operation: &str) {
        error!(
            error = %self,
            operation = operation,
            "Operation failed"
        );
    }
}

// Result type alias for convenience
pub type MonitorResult<T> = Result<T, MonitorError>;
