//! CDC ingestion pipeline
//!
//! decode -> classify -> (delete | enrich + upsert), with failures handed to
//! the retry/escalation controller.

pub mod consumer;
pub mod dead_letter;
pub mod envelope;
pub mod message;
pub mod operation;
pub mod retry;

pub use consumer::{CdcConsumer, Disposition, ProcessingOutcome};
pub use dead_letter::{DeadLetterOrigin, DeadLetterRecord};
pub use envelope::{ChangeEnvelope, ChangePayload, ChangeSnapshot, DecodeError, EnvelopeCodec};
pub use message::{InboundMessage, MessageMetadata};
pub use operation::{Operation, OperationClassifier};
pub use retry::{
    DeliveryState, Escalation, RetryDispatcher, RetryPolicy, RetryPolicyError, RetryRequest,
};
