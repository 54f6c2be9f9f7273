//! Error taxonomy for the ingestion pipeline (see spec §7).
//!
//! Each variant corresponds to one row of the error-handling table and
//! carries enough context for a useful log line. `.retryable()` is what the
//! Orchestrator consults instead of matching on error text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transient I/O error: {0}")]
    Transient(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("decompression error: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("malformed record{}: {reason}", member.as_ref().map(|m| format!(" in {m}")).unwrap_or_default())]
    RecordMalformed { member: Option<String>, reason: String },

    #[error("sink batch failure ({kind}, {count} rows): {source}")]
    SinkBatch {
        kind: &'static str,
        count: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("sink fatal error: {0}")]
    SinkFatal(#[source] anyhow::Error),

    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestError {
    /// Whether the Orchestrator's retry/backoff loop should re-enter the
    /// session for this error, assuming the retry budget is not exhausted.
    pub fn retryable(&self) -> bool {
        matches!(self, IngestError::Transient(_) | IngestError::Protocol(_))
    }

    /// Whether this error should surface to the caller as a hard failure
    /// rather than being absorbed into a counter (spec §7 propagation rule).
    pub fn fatal(&self) -> bool {
        matches!(self, IngestError::SinkFatal(_) | IngestError::Decompression(_))
    }
}
