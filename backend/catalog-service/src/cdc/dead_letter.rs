//! Dead-letter records.
//!
//! A dead letter carries the original payload unchanged as its value; the
//! failure context travels in headers so the record stays replayable.
use chrono::{DateTime, TimeZone, Utc};

use super::message::{InboundMessage, MessageMetadata};
use crate::error::FailureReason;

pub const DLT_ORIGINAL_TOPIC_HEADER: &str = "dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION_HEADER: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET_HEADER: &str = "dlt-original-offset";
pub const DLT_REASON_HEADER: &str = "dlt-reason";
pub const DLT_ERROR_HEADER: &str = "dlt-error";
pub const DLT_ATTEMPTS_HEADER: &str = "dlt-attempts";
pub const DLT_FAILED_AT_HEADER: &str = "dlt-failed-at";

/// Longest error message carried in the `dlt-error` header
const MAX_ERROR_HEADER_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRecord {
    /// Dead-letter topic to publish to
    pub topic: String,
    /// Where the failing delivery was read from
    pub source: MessageMetadata,
    pub key: Option<Vec<u8>>,
    /// Original payload, possibly undecodable
    pub payload: Option<Vec<u8>>,
    pub reason: FailureReason,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let error: String = self.error.chars().take(MAX_ERROR_HEADER_LEN).collect();
        vec![
            (DLT_ORIGINAL_TOPIC_HEADER, self.source.topic.clone()),
            (DLT_ORIGINAL_PARTITION_HEADER, self.source.partition.to_string()),
            (DLT_ORIGINAL_OFFSET_HEADER, self.source.offset.to_string()),
            (DLT_REASON_HEADER, self.reason.as_str().to_string()),
            (DLT_ERROR_HEADER, error),
            (DLT_ATTEMPTS_HEADER, self.attempts.to_string()),
            (
                DLT_FAILED_AT_HEADER,
                self.failed_at.timestamp_millis().to_string(),
            ),
        ]
    }
}

/// Failure context recovered from a delivered dead letter's headers.
///
/// Every field is optional: records produced by other tooling may carry
/// none of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeadLetterOrigin {
    pub topic: Option<String>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub reason: Option<FailureReason>,
    pub error: Option<String>,
    pub attempts: Option<u32>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl DeadLetterOrigin {
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            topic: message.header(DLT_ORIGINAL_TOPIC_HEADER).map(str::to_string),
            partition: message
                .header(DLT_ORIGINAL_PARTITION_HEADER)
                .and_then(|v| v.parse().ok()),
            offset: message
                .header(DLT_ORIGINAL_OFFSET_HEADER)
                .and_then(|v| v.parse().ok()),
            reason: message.header(DLT_REASON_HEADER).and_then(FailureReason::parse),
            error: message.header(DLT_ERROR_HEADER).map(str::to_string),
            attempts: message
                .header(DLT_ATTEMPTS_HEADER)
                .and_then(|v| v.parse().ok()),
            failed_at: message
                .header(DLT_FAILED_AT_HEADER)
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeadLetterRecord {
        DeadLetterRecord {
            topic: "catalog.categories-dlt".into(),
            source: MessageMetadata::new("catalog.categories-retry-1", 3, 120),
            key: Some(b"42".to_vec()),
            payload: Some(br#"{"payload":{}}"#.to_vec()),
            reason: FailureReason::Transient,
            error: "request timed out after 5s".into(),
            attempts: 3,
            failed_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_headers_describe_the_failure() {
        let headers = record().headers();

        assert!(headers.contains(&(
            DLT_ORIGINAL_TOPIC_HEADER,
            "catalog.categories-retry-1".to_string()
        )));
        assert!(headers.contains(&(DLT_ORIGINAL_PARTITION_HEADER, "3".to_string())));
        assert!(headers.contains(&(DLT_ORIGINAL_OFFSET_HEADER, "120".to_string())));
        assert!(headers.contains(&(DLT_REASON_HEADER, "transient-error".to_string())));
        assert!(headers.contains(&(DLT_ATTEMPTS_HEADER, "3".to_string())));
    }

    #[test]
    fn test_long_errors_are_truncated() {
        let mut record = record();
        record.error = "x".repeat(5000);

        let error = record
            .headers()
            .into_iter()
            .find(|(name, _)| *name == DLT_ERROR_HEADER)
            .map(|(_, v)| v)
            .unwrap();
        assert_eq!(error.len(), MAX_ERROR_HEADER_LEN);
    }

    #[test]
    fn test_origin_recovered_from_delivered_headers() {
        let record = record();
        let mut message = InboundMessage::new(
            MessageMetadata::new("catalog.categories-dlt", 0, 7),
            record.payload.clone(),
        );
        for (name, value) in record.headers() {
            message = message.with_header(name, value);
        }

        let origin = DeadLetterOrigin::from_message(&message);
        assert_eq!(origin.topic.as_deref(), Some("catalog.categories-retry-1"));
        assert_eq!(origin.partition, Some(3));
        assert_eq!(origin.offset, Some(120));
        assert_eq!(origin.reason, Some(FailureReason::Transient));
        assert_eq!(origin.attempts, Some(3));
        assert_eq!(origin.failed_at, Some(record.failed_at));
    }

    #[test]
    fn test_origin_without_headers() {
        let message = InboundMessage::new(MessageMetadata::new("t-dlt", 0, 0), None);
        assert_eq!(DeadLetterOrigin::from_message(&message), DeadLetterOrigin::default());
    }
}
