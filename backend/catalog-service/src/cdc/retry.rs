//! Retry/escalation control.
//!
//! Each processed message settles as APPLIED, RETRY_SCHEDULED or
//! DEAD_LETTERED. Retries are non-blocking: a failed
//! message is republished to a delayed retry topic and the source offset is
//! acknowledged, so the partition keeps moving.
//!
//! Topic layout for a base topic `T` and `max_attempts = n`:
//! `T` (attempt 1), `T-retry-0` .. `T-retry-{n-2}` (attempts 2..n), `T-dlt`.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resilience::backoff::{BackoffConfig, BackoffError};
use std::fmt;
use std::time::Duration;

use super::dead_letter::DeadLetterRecord;
use super::message::MessageMetadata;
use crate::error::{DispatchError, FailureReason, PipelineError};

pub const RETRY_TOPIC_INFIX: &str = "-retry-";
pub const DEAD_LETTER_TOPIC_SUFFIX: &str = "-dlt";

pub const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";
pub const RETRY_ORIGINAL_TOPIC_HEADER: &str = "retry-original-topic";
pub const RETRY_NOT_BEFORE_HEADER: &str = "retry-not-before";

pub fn retry_topic(base: &str, index: u32) -> String {
    format!("{}{}{}", base, RETRY_TOPIC_INFIX, index)
}

pub fn dead_letter_topic(base: &str) -> String {
    format!("{}{}", base, DEAD_LETTER_TOPIC_SUFFIX)
}

/// Index `N` of a `<base>-retry-N` topic.
pub fn retry_index(topic: &str) -> Option<u32> {
    let (_, index) = topic.rsplit_once(RETRY_TOPIC_INFIX)?;
    index.parse().ok()
}

pub fn is_dead_letter_topic(topic: &str) -> bool {
    topic.ends_with(DEAD_LETTER_TOPIC_SUFFIX)
}

/// Terminal state of a processed message; the source offset may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Applied,
    RetryScheduled,
    DeadLettered,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Applied => "applied",
            DeliveryState::RetryScheduled => "retry_scheduled",
            DeliveryState::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a message whose processing failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Escalation {
    Retry {
        topic: String,
        delay: Duration,
        next_attempt: u32,
    },
    DeadLetter {
        reason: FailureReason,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("max attempts must be at least 1")]
    ZeroAttempts,

    #[error("invalid backoff: {0}")]
    Backoff(#[from] BackoffError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    /// 3 attempts, 1s doubling.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        backoff.validate()?;
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the delivery that follows failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt.saturating_sub(1))
    }

    /// Longest delay any retry topic of this policy carries; zero when the
    /// policy never retries.
    pub fn max_retry_delay(&self) -> Duration {
        match self.max_attempts {
            0 | 1 => Duration::ZERO,
            n => self.backoff.ceiling(n - 2),
        }
    }

    /// Every retry topic this policy can publish to, in escalation order.
    pub fn retry_topics(&self, base: &str) -> Vec<String> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|index| retry_topic(base, index))
            .collect()
    }

    pub fn escalate(&self, attempt: u32, error: &PipelineError, base: &str) -> Escalation {
        if !error.is_retryable() {
            return Escalation::DeadLetter {
                reason: error.reason(),
            };
        }

        let attempt = attempt.max(1);
        if attempt >= self.max_attempts {
            return Escalation::DeadLetter {
                reason: FailureReason::Transient,
            };
        }

        Escalation::Retry {
            topic: retry_topic(base, attempt - 1),
            delay: self.delay_after(attempt),
            next_attempt: attempt + 1,
        }
    }
}

/// A failed message to be republished on a delayed retry topic.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRequest {
    /// Retry topic to publish to
    pub topic: String,
    pub original_topic: String,
    pub source: MessageMetadata,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    /// Attempt number of the redelivery
    pub attempt: u32,
    pub delay: Duration,
    pub not_before: DateTime<Utc>,
    pub error: String,
}

impl RetryRequest {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (RETRY_ATTEMPT_HEADER, self.attempt.to_string()),
            (RETRY_ORIGINAL_TOPIC_HEADER, self.original_topic.clone()),
            (
                RETRY_NOT_BEFORE_HEADER,
                self.not_before.timestamp_millis().to_string(),
            ),
        ]
    }
}

/// Hands failed messages to the retry and dead-letter topics.
///
/// Returning `Ok` means the message is durably handed off and the source
/// offset may be acknowledged.
#[async_trait]
pub trait RetryDispatcher: Send + Sync {
    async fn schedule_retry(&self, request: RetryRequest) -> Result<(), DispatchError>;

    async fn dead_letter(&self, record: DeadLetterRecord) -> Result<(), DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::envelope::DecodeError;
    use crate::enrichment::EnrichmentError;

    fn transient() -> PipelineError {
        EnrichmentError::Timeout(Duration::from_secs(5)).into()
    }

    #[test]
    fn test_topic_naming() {
        assert_eq!(retry_topic("cats", 0), "cats-retry-0");
        assert_eq!(dead_letter_topic("cats"), "cats-dlt");
        assert_eq!(retry_index("cats-retry-1"), Some(1));
        assert_eq!(retry_index("cats"), None);
        assert_eq!(retry_index("cats-retry-x"), None);
        assert!(is_dead_letter_topic("cats-dlt"));
        assert!(!is_dead_letter_topic("cats-retry-0"));
    }

    #[test]
    fn test_transient_failures_escalate_through_retry_topics() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.escalate(1, &transient(), "cats"),
            Escalation::Retry {
                topic: "cats-retry-0".into(),
                delay: Duration::from_millis(1000),
                next_attempt: 2,
            }
        );
        assert_eq!(
            policy.escalate(2, &transient(), "cats"),
            Escalation::Retry {
                topic: "cats-retry-1".into(),
                delay: Duration::from_millis(2000),
                next_attempt: 3,
            }
        );
        assert_eq!(
            policy.escalate(3, &transient(), "cats"),
            Escalation::DeadLetter {
                reason: FailureReason::Transient
            }
        );
    }

    #[test]
    fn test_permanent_failures_skip_retries() {
        let policy = RetryPolicy::default();
        let decode = PipelineError::from(DecodeError::MissingPayload);
        let invalid = PipelineError::from(EnrichmentError::InvalidResponse("bad".into()));

        assert_eq!(
            policy.escalate(1, &decode, "cats"),
            Escalation::DeadLetter {
                reason: FailureReason::Decode
            }
        );
        assert_eq!(
            policy.escalate(1, &invalid, "cats"),
            Escalation::DeadLetter {
                reason: FailureReason::NonRetryable
            }
        );
    }

    #[test]
    fn test_single_attempt_policy_has_no_retry_topics() {
        let policy = RetryPolicy::new(1, BackoffConfig::default()).unwrap();

        assert!(policy.retry_topics("cats").is_empty());
        assert!(matches!(
            policy.escalate(1, &transient(), "cats"),
            Escalation::DeadLetter { .. }
        ));
    }

    #[test]
    fn test_max_retry_delay_is_the_last_rung() {
        assert_eq!(RetryPolicy::default().max_retry_delay(), Duration::from_millis(2000));

        let single = RetryPolicy::new(1, BackoffConfig::default()).unwrap();
        assert_eq!(single.max_retry_delay(), Duration::ZERO);

        let five = RetryPolicy::new(5, BackoffConfig::default()).unwrap();
        assert_eq!(five.max_retry_delay(), five.delay_after(4));
    }

    #[test]
    fn test_policy_validation() {
        assert!(matches!(
            RetryPolicy::new(0, BackoffConfig::default()),
            Err(RetryPolicyError::ZeroAttempts)
        ));

        let shrinking = BackoffConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(matches!(
            RetryPolicy::new(3, shrinking),
            Err(RetryPolicyError::Backoff(_))
        ));

        assert_eq!(
            RetryPolicy::default().retry_topics("cats"),
            vec!["cats-retry-0".to_string(), "cats-retry-1".to_string()]
        );
    }

    #[test]
    fn test_retry_headers() {
        let not_before = Utc::now();
        let request = RetryRequest {
            topic: "cats-retry-0".into(),
            original_topic: "cats".into(),
            source: MessageMetadata::new("cats", 2, 41),
            key: None,
            payload: b"{}".to_vec(),
            attempt: 2,
            delay: Duration::from_secs(1),
            not_before,
            error: "timeout".into(),
        };

        let headers = request.headers();
        assert!(headers.contains(&(RETRY_ATTEMPT_HEADER, "2".to_string())));
        assert!(headers.contains(&(RETRY_ORIGINAL_TOPIC_HEADER, "cats".to_string())));
        assert!(headers.contains(&(
            RETRY_NOT_BEFORE_HEADER,
            not_before.timestamp_millis().to_string()
        )));
    }
}
