//! Structured error types for the acquisition pipeline.
//!
//! Payloads are plain strings so errors stay `Clone` (single-flight waiters
//! receive a copy of the leader's failure) and render cleanly in the CLI.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Fatal pipeline errors. These propagate to the caller unmodified.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid range: start {start} must be before end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("invalid row cap {0}: must be at least 1")]
    InvalidRowCap(usize),

    #[error("bin size '{bin_size}' is not supported by source '{source_name}'")]
    UnsupportedBinSize {
        source_name: String,
        bin_size: String,
    },

    #[error("no data collected for {request}: every window failed or returned nothing")]
    NoDataCollected { request: String },

    #[error("need at least 2 datasets to join, got {got}")]
    InsufficientInputs { got: usize },

    #[error("join key '{key}' not found in dataset '{dataset}'")]
    MissingJoinKey { dataset: String, key: String },

    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("request cancelled before any window completed")]
    Cancelled,

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("frame error: {0}")]
    Frame(String),

    #[error("join error: {0}")]
    Join(String),

    #[error("in-flight request failed: {0}")]
    Flight(String),
}

impl From<polars::prelude::PolarsError> for PipelineError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        PipelineError::Frame(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

/// Per-window fetch failures.
///
/// The fetch executor catches these, logs them with the window bounds, and
/// treats the window as empty. They never reach the pipeline caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowFetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("window fetch cancelled")]
    Cancelled,
}

impl WindowFetchError {
    /// Whether another attempt at the same window could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WindowFetchError::NetworkUnreachable(_)
                | WindowFetchError::Timeout(_)
                | WindowFetchError::RateLimited { .. }
                | WindowFetchError::Http { status: 500..=599, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server = WindowFetchError::Http {
            status: 503,
            message: "unavailable".into(),
        };
        let client = WindowFetchError::Http {
            status: 400,
            message: "bad request".into(),
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert!(!WindowFetchError::CircuitBreakerTripped.is_retryable());
        assert!(WindowFetchError::RateLimited { retry_after_secs: 1 }.is_retryable());
    }

    #[test]
    fn pipeline_errors_render_for_users() {
        let e = PipelineError::InsufficientInputs { got: 1 };
        assert_eq!(e.to_string(), "need at least 2 datasets to join, got 1");
    }
}
