use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::dead_letter::{DeadLetterOrigin, DeadLetterRecord};
use super::envelope::{is_empty_payload, ChangeEnvelope, DecodeError, EnvelopeCodec};
use super::message::InboundMessage;
use super::operation::{Operation, OperationClassifier};
use super::retry::{
    dead_letter_topic, is_dead_letter_topic, DeliveryState, Escalation, RetryDispatcher,
    RetryPolicy, RetryRequest,
};
use crate::enrichment::EnrichmentClient;
use crate::error::{DispatchError, FailureReason, PipelineError};
use crate::metrics::CdcMetrics;
use crate::models::EntityKind;
use crate::store::ReadModelStore;

/// Result of successfully applying one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Upserted { id: String },
    Deleted { id: String },
    /// Entity gone upstream by the time the event was processed
    SkippedNotFound { id: String },
    SkippedUnknownOperation { code: String },
}

impl ProcessingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingOutcome::Upserted { .. } => "upserted",
            ProcessingOutcome::Deleted { .. } => "deleted",
            ProcessingOutcome::SkippedNotFound { .. } => "skipped_not_found",
            ProcessingOutcome::SkippedUnknownOperation { .. } => "skipped_unknown_operation",
        }
    }
}

/// How a delivered message was settled. Every variant allows the source
/// offset to be stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Empty payload; acknowledged without processing
    Heartbeat,
    Applied(ProcessingOutcome),
    RetryScheduled {
        topic: String,
        attempt: u32,
        delay: Duration,
    },
    DeadLettered {
        reason: FailureReason,
    },
    /// Dead letter re-run succeeded
    Recovered(ProcessingOutcome),
    /// Dead letter re-run failed; nothing further is attempted
    Abandoned {
        reason: FailureReason,
    },
}

impl Disposition {
    /// Final delivery state, `None` for heartbeats.
    pub fn state(&self) -> Option<DeliveryState> {
        match self {
            Disposition::Heartbeat => None,
            Disposition::Applied(_) | Disposition::Recovered(_) => Some(DeliveryState::Applied),
            Disposition::RetryScheduled { .. } => Some(DeliveryState::RetryScheduled),
            Disposition::DeadLettered { .. } | Disposition::Abandoned { .. } => {
                Some(DeliveryState::DeadLettered)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Heartbeat => "heartbeat",
            Disposition::Applied(_) => "applied",
            Disposition::RetryScheduled { .. } => "retry_scheduled",
            Disposition::DeadLettered { .. } => "dead_lettered",
            Disposition::Recovered(_) => "recovered",
            Disposition::Abandoned { .. } => "abandoned",
        }
    }
}

/// CDC consumer for one entity stream.
///
/// Transport-agnostic: the Kafka layer feeds it [`InboundMessage`]s from
/// the base topic, its retry topics and its dead-letter topic, and stores
/// the offset once `on_message` returns `Ok`.
pub struct CdcConsumer {
    kind: EntityKind,
    topic: String,
    codec: EnvelopeCodec,
    enrichment: Arc<dyn EnrichmentClient>,
    store: Arc<dyn ReadModelStore>,
    dispatcher: Arc<dyn RetryDispatcher>,
    policy: RetryPolicy,
    metrics: Option<CdcMetrics>,
}

impl CdcConsumer {
    pub fn new(
        kind: EntityKind,
        topic: impl Into<String>,
        enrichment: Arc<dyn EnrichmentClient>,
        store: Arc<dyn ReadModelStore>,
        dispatcher: Arc<dyn RetryDispatcher>,
    ) -> Self {
        Self {
            kind,
            topic: topic.into(),
            codec: EnvelopeCodec::default(),
            enrichment,
            store,
            dispatcher,
            policy: RetryPolicy::default(),
            metrics: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classifier(mut self, classifier: OperationClassifier) -> Self {
        self.codec = EnvelopeCodec::new(classifier);
        self
    }

    pub fn with_metrics(mut self, metrics: CdcMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Base topic this consumer owns.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Base, retry and dead-letter topics, in subscription order.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![self.topic.clone()];
        topics.extend(self.policy.retry_topics(&self.topic));
        topics.push(dead_letter_topic(&self.topic));
        topics
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Settle one delivered message.
    ///
    /// Processing failures never escape: they become a retry or a dead
    /// letter. `Err` only means the hand-off itself failed, in which case
    /// the offset must not be stored.
    pub async fn on_message(&self, message: &InboundMessage) -> Result<Disposition, DispatchError> {
        let started = Instant::now();
        let meta = &message.metadata;
        let stream = self.kind.as_str();

        let payload = match message.payload.as_deref() {
            Some(payload) if !is_empty_payload(Some(payload)) => payload,
            _ => {
                info!(
                    stream,
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    payload = "EMPTY",
                    "Received CDC heartbeat"
                );
                self.record_received("empty");
                let disposition = Disposition::Heartbeat;
                self.record_processed(&disposition, started);
                return Ok(disposition);
            }
        };

        let disposition = if is_dead_letter_topic(&meta.topic) {
            self.on_dead_letter(message, payload).await
        } else {
            let attempt = message.attempt();
            debug!(
                stream,
                topic = %meta.topic,
                partition = meta.partition,
                offset = meta.offset,
                attempt,
                "Processing CDC message"
            );

            match self.process(payload).await {
                Ok(outcome) => Disposition::Applied(outcome),
                Err(err) => self.escalate(message, payload, attempt, err).await?,
            }
        };

        self.record_processed(&disposition, started);
        Ok(disposition)
    }

    /// Decode, classify, then apply.
    pub async fn process(&self, payload: &[u8]) -> Result<ProcessingOutcome, PipelineError> {
        let envelope = match self.codec.decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.record_received("invalid");
                return Err(err.into());
            }
        };
        self.record_received(envelope.operation().as_str());
        self.apply(&envelope).await
    }

    /// Apply a decoded change to the read model.
    ///
    /// Deletes go straight to the store; creates and updates re-read the
    /// entity upstream and upsert what comes back.
    pub async fn apply(&self, envelope: &ChangeEnvelope) -> Result<ProcessingOutcome, PipelineError> {
        let operation = envelope.operation();
        let stream = self.kind.as_str();

        match operation {
            Operation::Delete => {
                let id = required_id(envelope, operation, "before")?;
                self.store.delete(id).await?;
                info!(stream, entity_id = id, "Deleted entity from read model");
                Ok(ProcessingOutcome::Deleted { id: id.to_string() })
            }
            Operation::Create | Operation::Update => {
                let id = required_id(envelope, operation, "after")?;
                match self.enrichment.fetch_by_id(self.kind, id).await? {
                    Some(entity) => {
                        self.store.upsert(entity).await?;
                        info!(stream, entity_id = id, %operation, "Upserted entity into read model");
                        Ok(ProcessingOutcome::Upserted { id: id.to_string() })
                    }
                    None => {
                        warn!(
                            stream,
                            entity_id = id,
                            %operation,
                            "Entity not found upstream, dropping change"
                        );
                        Ok(ProcessingOutcome::SkippedNotFound { id: id.to_string() })
                    }
                }
            }
            Operation::Unknown => {
                let code = envelope.raw_operation();
                warn!(stream, operation_code = code, "Unknown CDC operation, skipping");
                Ok(ProcessingOutcome::SkippedUnknownOperation {
                    code: code.to_string(),
                })
            }
        }
    }

    async fn escalate(
        &self,
        message: &InboundMessage,
        payload: &[u8],
        attempt: u32,
        err: PipelineError,
    ) -> Result<Disposition, DispatchError> {
        let meta = &message.metadata;
        let stream = self.kind.as_str();

        match self.policy.escalate(attempt, &err, &self.topic) {
            Escalation::Retry {
                topic,
                delay,
                next_attempt,
            } => {
                let not_before = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let request = RetryRequest {
                    topic: topic.clone(),
                    original_topic: self.topic.clone(),
                    source: meta.clone(),
                    key: message.key.clone(),
                    payload: payload.to_vec(),
                    attempt: next_attempt,
                    delay,
                    not_before,
                    error: err.to_string(),
                };
                self.dispatcher.schedule_retry(request).await?;

                info!(
                    stream,
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    attempt,
                    retry_topic = %topic,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Processing failed, retry scheduled"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry(stream, &topic);
                }

                Ok(Disposition::RetryScheduled {
                    topic,
                    attempt: next_attempt,
                    delay,
                })
            }
            Escalation::DeadLetter { reason } => {
                let record = DeadLetterRecord {
                    topic: dead_letter_topic(&self.topic),
                    source: meta.clone(),
                    key: message.key.clone(),
                    payload: Some(payload.to_vec()),
                    reason,
                    error: err.to_string(),
                    attempts: attempt,
                    failed_at: Utc::now(),
                };
                self.dispatcher.dead_letter(record).await?;

                warn!(
                    stream,
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    attempt,
                    reason = %reason,
                    error = %err,
                    "Processing failed, message dead-lettered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_dead_letter(stream, reason.as_str());
                }

                Ok(Disposition::DeadLettered { reason })
            }
        }
    }

    /// Dead-letter handler: one more run of the same pipeline, then stop.
    async fn on_dead_letter(&self, message: &InboundMessage, payload: &[u8]) -> Disposition {
        let meta = &message.metadata;
        let stream = self.kind.as_str();
        let origin = DeadLetterOrigin::from_message(message);

        warn!(
            stream,
            topic = %meta.topic,
            partition = meta.partition,
            offset = meta.offset,
            original_topic = origin.topic.as_deref().unwrap_or("unknown"),
            original_partition = ?origin.partition,
            original_offset = ?origin.offset,
            reason = origin.reason.map(|r| r.as_str()).unwrap_or("unknown"),
            error = origin.error.as_deref().unwrap_or(""),
            attempts = ?origin.attempts,
            "Re-running dead-lettered message"
        );

        match self.process(payload).await {
            Ok(outcome) => {
                info!(
                    stream,
                    offset = meta.offset,
                    outcome = outcome.as_str(),
                    "Dead-lettered message recovered"
                );
                Disposition::Recovered(outcome)
            }
            Err(err) => {
                error!(
                    stream,
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    error = %err,
                    "Dead-lettered message failed again, giving up"
                );
                Disposition::Abandoned {
                    reason: err.reason(),
                }
            }
        }
    }

    fn record_received(&self, operation: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_received(self.kind.as_str(), operation);
        }
    }

    fn record_processed(&self, disposition: &Disposition, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_processed(self.kind.as_str(), disposition.as_str(), started.elapsed());
        }
    }
}

fn required_id<'a>(
    envelope: &'a ChangeEnvelope,
    operation: Operation,
    field: &'static str,
) -> Result<&'a str, PipelineError> {
    envelope
        .entity_id()
        .ok_or_else(|| DecodeError::MissingSnapshot { operation, field }.into())
}
