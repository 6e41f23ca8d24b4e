//! Typed errors for the aggregation engine.
//!
//! Only `PipelineError` terminates a query. Source and listing failures are
//! absorbed by the pipeline and reported as data (`source_errors`, counters).

use serde::Serialize;
use thiserror::Error;

/// Query-level outcomes that stop the pipeline early.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Bad input, rejected before any fetch.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Caller cancelled the query; no partial result is returned.
    #[error("query cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }
}

/// Per-adapter failures. Recorded in `PipelineResult::source_errors`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceError {
    #[error("source unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("source timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The source answered but its payload no longer matches the expected shape.
    #[error("source format changed: {reason}")]
    FormatChanged { reason: String },
}

impl SourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn format_changed(reason: impl Into<String>) -> Self {
        Self::FormatChanged {
            reason: reason.into(),
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::FormatChanged { .. } => "format_changed",
        }
    }
}

/// Why a raw listing could not be normalized. Counted and dropped, never surfaced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedListing {
    #[error("missing source listing id")]
    MissingListingId,

    #[error("missing address")]
    MissingAddress,

    #[error("missing price")]
    MissingPrice,

    #[error("invalid price: {0:?}")]
    InvalidPrice(String),

    #[error("invalid bedroom count: {0:?}")]
    InvalidBedrooms(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_serializes_with_kind_tag() {
        let v = serde_json::to_value(SourceError::Timeout { after_ms: 250 }).unwrap();
        assert_eq!(v["kind"], "timeout");
        assert_eq!(v["after_ms"], 250);
    }

    #[test]
    fn display_messages_are_readable() {
        assert_eq!(
            PipelineError::invalid("empty postcode").to_string(),
            "invalid query: empty postcode"
        );
        assert_eq!(
            MalformedListing::InvalidPrice("POA".into()).to_string(),
            "invalid price: \"POA\""
        );
    }
}
