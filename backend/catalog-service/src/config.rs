//! Configuration for the catalog service
use resilience::backoff::BackoffConfig;
use serde::Deserialize;
use std::time::Duration;

use crate::cdc::{RetryPolicy, RetryPolicyError};
use crate::kafka::ListenerConfig;

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kafka broker addresses
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// Where to start when the group has no committed offset
    #[serde(default = "default_auto_offset_reset")]
    pub kafka_auto_offset_reset: String,

    /// CDC topic for the categories table
    #[serde(default = "default_categories_topic")]
    pub categories_topic: String,

    /// CDC topic for the genres table
    #[serde(default = "default_genres_topic")]
    pub genres_topic: String,

    /// Messages processed at once across all partition lanes
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,

    /// Deliveries per message, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Base URL of the canonical entity API
    #[serde(default = "default_enrichment_base_url")]
    pub enrichment_base_url: String,

    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,

    /// Bearer token for the entity API (optional)
    #[serde(default)]
    pub enrichment_api_token: Option<String>,

    /// Queued messages per partition before it is paused
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Port for /health and /metrics
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_group_id() -> String {
    "catalog-service".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_categories_topic() -> String {
    "adm_videos_mysql.adm_videos.categories".to_string()
}

fn default_genres_topic() -> String {
    "adm_videos_mysql.adm_videos.genres".to_string()
}

fn default_consumer_concurrency() -> usize {
    8
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_enrichment_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_enrichment_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    64
}

fn default_http_port() -> u16 {
    8090
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.kafka_brokers.trim().is_empty() {
            anyhow::bail!("KAFKA_BROKERS must not be empty");
        }
        if self.kafka_group_id.trim().is_empty() {
            anyhow::bail!("KAFKA_GROUP_ID must not be empty");
        }
        if self.categories_topic.trim().is_empty() || self.genres_topic.trim().is_empty() {
            anyhow::bail!("CATEGORIES_TOPIC and GENRES_TOPIC must not be empty");
        }
        if self.categories_topic == self.genres_topic {
            anyhow::bail!("CATEGORIES_TOPIC and GENRES_TOPIC must differ");
        }
        if self.consumer_concurrency == 0 {
            anyhow::bail!("CONSUMER_CONCURRENCY must be at least 1");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("CHANNEL_CAPACITY must be at least 1");
        }
        if self.enrichment_base_url.trim().is_empty() {
            anyhow::bail!("ENRICHMENT_BASE_URL must not be empty");
        }
        if self.enrichment_timeout_ms == 0 {
            anyhow::bail!("ENRICHMENT_TIMEOUT_MS must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", self.log_format);
        }
        self.retry_policy()?;
        Ok(())
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.backoff_delay_ms),
            multiplier: self.backoff_multiplier,
            max_delay: None,
            jitter: false,
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, RetryPolicyError> {
        RetryPolicy::new(self.max_attempts, self.backoff())
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            brokers: self.kafka_brokers.clone(),
            group_id: self.kafka_group_id.clone(),
            auto_offset_reset: self.kafka_auto_offset_reset.clone(),
            concurrency: self.consumer_concurrency,
            channel_capacity: self.channel_capacity,
            ..Default::default()
        }
    }
}
