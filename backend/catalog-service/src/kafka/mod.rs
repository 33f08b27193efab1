//! Kafka transport for the CDC pipeline
//!
//! - Consumer: per-partition lanes feeding each stream's `CdcConsumer`
//! - Producer: retry and dead-letter topic publishing

pub mod consumer;
pub mod producer;

pub use consumer::{CdcListener, ListenerConfig, ListenerError};
pub use producer::KafkaRetryDispatcher;
