//! Retry and dead-letter publishing.

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cdc::{DeadLetterRecord, RetryDispatcher, RetryRequest};
use crate::error::DispatchError;

/// Publishes failed CDC messages to their retry and dead-letter topics.
///
/// Idempotent producer with `acks=all`: a successful send means the
/// hand-off is durable and the source offset may be committed.
pub struct KafkaRetryDispatcher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaRetryDispatcher {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "3")
            .set("compression.type", "lz4")
            .set("linger.ms", "5")
            .set("message.timeout.ms", "30000")
            .create()?;

        info!("Retry/DLT producer initialized with brokers: {}", brokers);

        Ok(Self {
            producer,
            delivery_timeout: Duration::from_secs(30),
        })
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
        headers: &[(&'static str, String)],
    ) -> Result<(i32, i64), DispatchError> {
        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(topic).headers(to_owned_headers(headers));
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(payload) = payload {
            record = record.payload(payload);
        }

        self.producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| {
                error!(topic, error = %err, "Failed to publish to Kafka");
                DispatchError::from(err)
            })
    }
}

#[async_trait]
impl RetryDispatcher for KafkaRetryDispatcher {
    async fn schedule_retry(&self, request: RetryRequest) -> Result<(), DispatchError> {
        let (partition, offset) = self
            .publish(
                &request.topic,
                request.key.as_deref(),
                Some(request.payload.as_slice()),
                &request.headers(),
            )
            .await?;

        debug!(
            topic = %request.topic,
            partition,
            offset,
            attempt = request.attempt,
            "Published retry message"
        );
        Ok(())
    }

    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), DispatchError> {
        let (partition, offset) = self
            .publish(
                &record.topic,
                record.key.as_deref(),
                record.payload.as_deref(),
                &record.headers(),
            )
            .await?;

        info!(
            topic = %record.topic,
            partition,
            offset,
            source = %record.source,
            reason = %record.reason,
            "Published dead letter"
        );
        Ok(())
    }
}

fn to_owned_headers(headers: &[(&'static str, String)]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (name, value)| {
            acc.insert(Header {
                key: *name,
                value: Some(value.as_str()),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;

    #[test]
    fn test_owned_headers_preserve_order_and_values() {
        let headers = to_owned_headers(&[
            ("retry-attempt", "2".to_string()),
            ("retry-original-topic", "catalog.categories".to_string()),
        ]);

        assert_eq!(headers.count(), 2);
        let first = headers.get(0);
        assert_eq!(first.key, "retry-attempt");
        assert_eq!(first.value, Some("2".as_bytes()));
        let second = headers.get(1);
        assert_eq!(second.value, Some("catalog.categories".as_bytes()));
    }
}
