use std::fmt;

use crate::cdc::envelope::DecodeError;
use crate::enrichment::EnrichmentError;
use crate::store::StoreError;

/// Failure raised while applying a single change event.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Whether another delivery attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Decode(_) => false,
            PipelineError::Enrichment(e) => e.is_transient(),
            PipelineError::Store(e) => e.is_transient(),
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            PipelineError::Decode(_) => FailureReason::Decode,
            _ if self.is_retryable() => FailureReason::Transient,
            _ => FailureReason::NonRetryable,
        }
    }
}

/// Reason attached to dead letters and failure metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Decode,
    Transient,
    NonRetryable,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Decode => "decode-error",
            FailureReason::Transient => "transient-error",
            FailureReason::NonRetryable => "non-retryable-error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "decode-error" => Some(FailureReason::Decode),
            "transient-error" => Some(FailureReason::Transient),
            "non-retryable-error" => Some(FailureReason::NonRetryable),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to hand a message off to the retry or dead-letter topics.
///
/// The source offset must not be stored when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Kafka error: {0}")]
    Kafka(String),
}

impl From<rdkafka::error::KafkaError> for DispatchError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        DispatchError::Kafka(err.to_string())
    }
}
