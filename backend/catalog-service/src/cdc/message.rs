use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;

use super::retry::{retry_index, RETRY_ATTEMPT_HEADER, RETRY_NOT_BEFORE_HEADER};

/// Where a message was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl MessageMetadata {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for MessageMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A delivered message, detached from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub metadata: MessageMetadata,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// UTF-8 headers; non-UTF-8 values are dropped by the transport
    pub headers: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(metadata: MessageMetadata, payload: Option<Vec<u8>>) -> Self {
        Self {
            metadata,
            key: None,
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// 1-based delivery attempt.
    ///
    /// Taken from the retry header when present; otherwise reconstructed
    /// from the topic: `<base>-retry-N` is attempt `N + 2`, anything else 1.
    pub fn attempt(&self) -> u32 {
        self.header(RETRY_ATTEMPT_HEADER)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n >= 1)
            .or_else(|| retry_index(&self.metadata.topic).map(|n| n.saturating_add(2)))
            .unwrap_or(1)
    }

    /// Earliest time a retry delivery may be processed.
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.header(RETRY_NOT_BEFORE_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}
