//! Test doubles for driving the CDC pipeline without Kafka or HTTP
#![allow(dead_code)]

use async_trait::async_trait;
use catalog_service::cdc::retry::{RETRY_ATTEMPT_HEADER, RETRY_NOT_BEFORE_HEADER, RETRY_ORIGINAL_TOPIC_HEADER};
use catalog_service::{
    CatalogEntity, CdcConsumer, DeadLetterRecord, DispatchError, EnrichmentClient,
    EnrichmentError, EntityKind, InMemoryReadModelStore, InboundMessage, MessageMetadata,
    RetryDispatcher, RetryRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CATEGORIES_TOPIC: &str = "catalog.categories";

/// Enrichment client answering from a canonical map, with scripted
/// failures served first.
#[derive(Default)]
pub struct ScriptedEnrichment {
    canonical: Mutex<HashMap<String, CatalogEntity>>,
    script: Mutex<VecDeque<EnrichmentError>>,
    calls: AtomicU32,
}

impl ScriptedEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, entity: CatalogEntity) -> Self {
        self.put(entity);
        self
    }

    pub fn put(&self, entity: CatalogEntity) {
        self.canonical
            .lock()
            .unwrap()
            .insert(entity.id.clone(), entity);
    }

    pub fn remove(&self, id: &str) {
        self.canonical.lock().unwrap().remove(id);
    }

    /// Fail the next `n` calls with a timeout.
    pub fn fail_with_timeouts(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.push_back(EnrichmentError::Timeout(Duration::from_secs(5)));
        }
    }

    pub fn fail_next(&self, error: EnrichmentError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentClient for ScriptedEnrichment {
    async fn fetch_by_id(
        &self,
        _kind: EntityKind,
        id: &str,
    ) -> Result<Option<CatalogEntity>, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.canonical.lock().unwrap().get(id).cloned())
    }
}

/// Dispatcher that records hand-offs and can be told to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub retries: Mutex<Vec<RetryRequest>>,
    pub dead_letters: Mutex<Vec<DeadLetterRecord>>,
    failures_left: AtomicU32,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn retries(&self) -> Vec<RetryRequest> {
        self.retries.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.lock().unwrap().clone()
    }

    fn maybe_fail(&self) -> Result<(), DispatchError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(DispatchError::Kafka("broker unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RetryDispatcher for RecordingDispatcher {
    async fn schedule_retry(&self, request: RetryRequest) -> Result<(), DispatchError> {
        self.maybe_fail()?;
        self.retries.lock().unwrap().push(request);
        Ok(())
    }

    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), DispatchError> {
        self.maybe_fail()?;
        self.dead_letters.lock().unwrap().push(record);
        Ok(())
    }
}

pub struct Harness {
    pub consumer: CdcConsumer,
    pub enrichment: Arc<ScriptedEnrichment>,
    pub store: Arc<InMemoryReadModelStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

pub fn harness(enrichment: ScriptedEnrichment) -> Harness {
    let enrichment = Arc::new(enrichment);
    let store = Arc::new(InMemoryReadModelStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let consumer = CdcConsumer::new(
        EntityKind::Category,
        CATEGORIES_TOPIC,
        enrichment.clone(),
        store.clone(),
        dispatcher.clone(),
    );

    Harness {
        consumer,
        enrichment,
        store,
        dispatcher,
    }
}

pub fn envelope(operation: &str, before: Option<&str>, after: Option<&str>) -> Vec<u8> {
    let snapshot = |id: Option<&str>| match id {
        Some(id) => serde_json::json!({ "id": id }),
        None => serde_json::Value::Null,
    };
    serde_json::json!({
        "payload": {
            "before": snapshot(before),
            "after": snapshot(after),
            "operation": operation,
        }
    })
    .to_string()
    .into_bytes()
}

pub fn delivery(topic: &str, offset: i64, payload: Vec<u8>) -> InboundMessage {
    InboundMessage::new(MessageMetadata::new(topic, 0, offset), Some(payload))
}

/// The message Kafka would deliver from the retry topic.
pub fn redeliver(request: &RetryRequest, offset: i64) -> InboundMessage {
    let mut message = delivery(&request.topic, offset, request.payload.clone());
    for (name, value) in request.headers() {
        message = message.with_header(name, value);
    }
    message
}

/// The message Kafka would deliver from the dead-letter topic.
pub fn redeliver_dead_letter(record: &DeadLetterRecord, offset: i64) -> InboundMessage {
    let mut message = InboundMessage::new(
        MessageMetadata::new(&record.topic, 0, offset),
        record.payload.clone(),
    );
    for (name, value) in record.headers() {
        message = message.with_header(name, value);
    }
    message
}

pub fn retry_headers_present(message: &InboundMessage) -> bool {
    message.header(RETRY_ATTEMPT_HEADER).is_some()
        && message.header(RETRY_ORIGINAL_TOPIC_HEADER).is_some()
        && message.header(RETRY_NOT_BEFORE_HEADER).is_some()
}
