/// CDC pipeline metrics, registered against a caller-supplied registry
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Collectors shared by every stream; the `stream` label tells them apart.
#[derive(Clone)]
pub struct CdcMetrics {
    /// labels: stream, operation (create/update/delete/unknown/empty/invalid)
    messages_received: IntCounterVec,
    /// labels: stream, outcome
    messages_processed: IntCounterVec,
    /// labels: stream, topic
    retries_scheduled: IntCounterVec,
    /// labels: stream, reason
    dead_letters: IntCounterVec,
    /// labels: stream
    processing_duration: HistogramVec,
}

impl CdcMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_received = IntCounterVec::new(
            Opts::new(
                "catalog_cdc_messages_received_total",
                "Total CDC messages received, by decoded operation",
            ),
            &["stream", "operation"],
        )?;
        let messages_processed = IntCounterVec::new(
            Opts::new(
                "catalog_cdc_messages_processed_total",
                "Total CDC messages that reached a disposition",
            ),
            &["stream", "outcome"],
        )?;
        let retries_scheduled = IntCounterVec::new(
            Opts::new(
                "catalog_cdc_retries_scheduled_total",
                "Total CDC messages redispatched to a retry topic",
            ),
            &["stream", "topic"],
        )?;
        let dead_letters = IntCounterVec::new(
            Opts::new(
                "catalog_cdc_dead_letters_total",
                "Total CDC messages routed to the dead-letter topic",
            ),
            &["stream", "reason"],
        )?;
        // 5ms ~ 10s: enrichment is a network round trip
        let processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "catalog_cdc_processing_duration_seconds",
                "Time spent processing a single CDC message",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["stream"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_processed.clone()))?;
        registry.register(Box::new(retries_scheduled.clone()))?;
        registry.register(Box::new(dead_letters.clone()))?;
        registry.register(Box::new(processing_duration.clone()))?;

        Ok(Self {
            messages_received,
            messages_processed,
            retries_scheduled,
            dead_letters,
            processing_duration,
        })
    }

    pub fn record_received(&self, stream: &str, operation: &str) {
        self.messages_received
            .with_label_values(&[stream, operation])
            .inc();
    }

    pub fn record_processed(&self, stream: &str, outcome: &str, elapsed: Duration) {
        self.messages_processed
            .with_label_values(&[stream, outcome])
            .inc();
        self.processing_duration
            .with_label_values(&[stream])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_retry(&self, stream: &str, topic: &str) {
        self.retries_scheduled
            .with_label_values(&[stream, topic])
            .inc();
    }

    pub fn record_dead_letter(&self, stream: &str, reason: &str) {
        self.dead_letters.with_label_values(&[stream, reason]).inc();
    }
}
