//! Catalog Service - read model kept in sync with upstream via CDC
//!
//! This service provides:
//! - Debezium envelope decoding and operation classification
//! - Enrichment of creates/updates from the canonical entity API
//! - An idempotent, id-keyed read-model store for categories and genres
//! - Non-blocking retries over delayed retry topics, with a dead-letter topic
//! - One sequential Kafka lane per partition driving the pipeline

pub mod cdc;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod models;
pub mod store;

pub use cdc::{
    CdcConsumer, ChangeEnvelope, DecodeError, DeadLetterRecord, Disposition, EnvelopeCodec,
    InboundMessage, MessageMetadata, Operation, OperationClassifier, ProcessingOutcome,
    RetryDispatcher, RetryPolicy, RetryRequest,
};
pub use config::Config;
pub use enrichment::{EnrichmentClient, EnrichmentError, HttpEnrichmentClient};
pub use error::{DispatchError, FailureReason, PipelineError};
pub use kafka::{CdcListener, KafkaRetryDispatcher, ListenerConfig};
pub use metrics::CdcMetrics;
pub use models::{CatalogEntity, EntityKind, Pagination, SearchQuery, SortDirection, SortField};
pub use store::{InMemoryReadModelStore, ReadModelStore, StoreError};
