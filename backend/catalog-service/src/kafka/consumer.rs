//! CDC Kafka listener
//!
//! One `StreamConsumer` subscribed to every stream's base, retry and
//! dead-letter topics. Each (topic, partition) gets its own sequential lane,
//! spawned the first time the partition delivers, so per-partition order is
//! preserved and a retry partition holding for its `retry-not-before` never
//! delays a base partition. A lane whose backlog reaches the channel
//! capacity has its partition paused until it drains.

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::{ClientConfig, Offset};
use resilience::backoff::BackoffConfig;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cdc::{CdcConsumer, InboundMessage, MessageMetadata};

/// CDC listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Kafka brokers (comma-separated)
    pub brokers: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    /// Messages processed at once across all partition lanes
    pub concurrency: usize,
    /// Queued messages per partition before the partition is paused
    pub channel_capacity: usize,
    /// Backoff for re-running a message whose retry/DLT hand-off failed
    pub dispatch_backoff: BackoffConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "catalog-service".to_string(),
            auto_offset_reset: "earliest".to_string(),
            concurrency: 1,
            channel_capacity: 64,
            dispatch_backoff: BackoffConfig {
                initial_delay: Duration::from_millis(500),
                multiplier: 2.0,
                max_delay: Some(Duration::from_secs(30)),
                jitter: true,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("No CDC consumers registered")]
    NoConsumers,
}

/// Offset and flow control for assigned partitions.
pub trait PartitionControl: Send + Sync {
    /// Store `next_offset` as the position to resume from.
    fn commit(&self, topic: &str, partition: i32, next_offset: i64);

    fn pause(&self, topic: &str, partition: i32);

    fn resume(&self, topic: &str, partition: i32);
}

fn partition_list(topic: &str, partition: i32) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, partition);
    tpl
}

impl PartitionControl for StreamConsumer {
    fn commit(&self, topic: &str, partition: i32, next_offset: i64) {
        let mut tpl = TopicPartitionList::new();
        if let Err(e) = tpl.add_partition_offset(topic, partition, Offset::Offset(next_offset)) {
            warn!(topic, error = %e, "Failed to build commit list");
            return;
        }
        if let Err(e) = Consumer::commit(self, &tpl, CommitMode::Async) {
            warn!(topic, partition, error = %e, "Failed to commit offset");
        }
    }

    fn pause(&self, topic: &str, partition: i32) {
        match Consumer::pause(self, &partition_list(topic, partition)) {
            Ok(()) => debug!(topic, partition, "Partition paused, lane backlog full"),
            Err(e) => warn!(topic, partition, error = %e, "Failed to pause partition"),
        }
    }

    fn resume(&self, topic: &str, partition: i32) {
        match Consumer::resume(self, &partition_list(topic, partition)) {
            Ok(()) => debug!(topic, partition, "Partition resumed"),
            Err(e) => warn!(topic, partition, error = %e, "Failed to resume partition"),
        }
    }
}

#[derive(Debug, Default)]
struct GaugeState {
    depth: usize,
    paused: bool,
}

/// Backlog of one lane.
///
/// Pauses the partition once `high` messages are queued and resumes it when
/// the lane has drained to `low`.
#[derive(Debug)]
pub struct LaneGauge {
    topic: String,
    partition: i32,
    high: usize,
    low: usize,
    state: Mutex<GaugeState>,
}

impl LaneGauge {
    pub fn new(topic: impl Into<String>, partition: i32, capacity: usize) -> Self {
        let high = capacity.max(1);
        Self {
            topic: topic.into(),
            partition,
            high,
            low: high / 2,
            state: Mutex::new(GaugeState::default()),
        }
    }

    pub fn enqueued(&self, control: &dyn PartitionControl) {
        let mut state = self.state.lock();
        state.depth += 1;
        if state.depth >= self.high && !state.paused {
            state.paused = true;
            control.pause(&self.topic, self.partition);
        }
    }

    pub fn settled(&self, control: &dyn PartitionControl) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.paused && state.depth <= self.low {
            state.paused = false;
            control.resume(&self.topic, self.partition);
        }
    }
}

/// Sequential worker for a single (topic, partition).
pub struct Lane {
    tx: mpsc::UnboundedSender<InboundMessage>,
    gauge: Arc<LaneGauge>,
    handle: JoinHandle<()>,
}

impl Lane {
    pub fn spawn(
        metadata: &MessageMetadata,
        handler: Arc<CdcConsumer>,
        control: Arc<dyn PartitionControl>,
        permits: Arc<Semaphore>,
        config: &ListenerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let gauge = Arc::new(LaneGauge::new(
            metadata.topic.clone(),
            metadata.partition,
            config.channel_capacity,
        ));
        let worker = LaneWorker {
            handler,
            control,
            gauge: Arc::clone(&gauge),
            permits,
            dispatch_backoff: config.dispatch_backoff.clone(),
        };
        debug!(topic = %metadata.topic, partition = metadata.partition, "Partition lane started");

        Self {
            tx,
            gauge,
            handle: tokio::spawn(worker.run(rx, shutdown)),
        }
    }

    /// Queue a message; `false` if the lane has stopped.
    pub fn push(&self, message: InboundMessage, control: &dyn PartitionControl) -> bool {
        self.gauge.enqueued(control);
        self.tx.send(message).is_ok()
    }

    /// Close the queue and wait for queued messages to settle.
    pub async fn drain(self) {
        let Lane { tx, handle, .. } = self;
        drop(tx);
        if let Err(e) = handle.await {
            error!(error = %e, "Partition lane panicked");
        }
    }
}

struct LaneWorker {
    handler: Arc<CdcConsumer>,
    control: Arc<dyn PartitionControl>,
    gauge: Arc<LaneGauge>,
    permits: Arc<Semaphore>,
    dispatch_backoff: BackoffConfig,
}

impl LaneWorker {
    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let max_hold = self.handler.policy().max_retry_delay();

        while let Some(message) = rx.recv().await {
            let meta = &message.metadata;

            let wait = hold_for(&message, max_hold);
            if !wait.is_zero() {
                debug!(topic = %meta.topic, partition = meta.partition, offset = meta.offset, ?wait, "Holding retry until due");
                if !sleep_unless_shutdown(wait, &mut shutdown).await {
                    break;
                }
            }

            if !self.settle(&message, &mut shutdown).await {
                break;
            }
            self.control.commit(&meta.topic, meta.partition, meta.offset + 1);
            self.gauge.settled(self.control.as_ref());
        }

        debug!(topic = %self.gauge.topic, partition = self.gauge.partition, "Partition lane stopped");
    }

    /// Run the message until it settles; `false` if shutdown came first.
    async fn settle(&self, message: &InboundMessage, shutdown: &mut watch::Receiver<bool>) -> bool {
        let meta = &message.metadata;
        let mut backoff = self.dispatch_backoff.iter();

        loop {
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return false;
                };
                self.handler.on_message(message).await
            };

            match result {
                Ok(disposition) => {
                    debug!(
                        topic = %meta.topic,
                        partition = meta.partition,
                        offset = meta.offset,
                        disposition = disposition.as_str(),
                        state = disposition.state().map_or("acknowledged", |s| s.as_str()),
                        "Message settled"
                    );
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(
                        topic = %meta.topic,
                        partition = meta.partition,
                        offset = meta.offset,
                        error = %e,
                        ?delay,
                        "Failed to hand off message, re-running in place"
                    );
                    if !sleep_unless_shutdown(delay, shutdown).await {
                        return false;
                    }
                }
            }
        }
    }
}

pub struct CdcListener {
    consumer: Arc<StreamConsumer>,
    routes: Arc<HashMap<String, Arc<CdcConsumer>>>,
    config: ListenerConfig,
}

impl CdcListener {
    pub fn new(config: ListenerConfig, consumers: Vec<Arc<CdcConsumer>>) -> Result<Self, ListenerError> {
        if consumers.is_empty() {
            return Err(ListenerError::NoConsumers);
        }

        let routes: HashMap<String, Arc<CdcConsumer>> = consumers
            .iter()
            .flat_map(|c| c.topics().into_iter().map(move |t| (t, Arc::clone(c))))
            .collect();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false") // commit after each message settles
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()?;

        let topics: Vec<&str> = routes.keys().map(String::as_str).collect();
        consumer.subscribe(&topics)?;

        info!(
            topics = ?topics,
            concurrency = config.concurrency,
            "CDC listener subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            routes: Arc::new(routes),
            config,
        })
    }

    /// Consume until `shutdown` flips to `true`, then drain the lanes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ListenerError> {
        let control: Arc<dyn PartitionControl> = self.consumer.clone();
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut lanes: HashMap<(String, i32), Lane> = HashMap::new();

        info!("Starting CDC listener loop");

        let mut stream = self.consumer.stream();
        let mut error_backoff = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Some(Duration::from_secs(30)),
            jitter: false,
        }
        .iter();

        loop {
            // Detach inside the select so no borrowed message lives across an await
            let next = tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping CDC listener");
                    break;
                }
                next = stream.next() => next.map(|result| result.map(|message| detach(&message))),
            };

            match next {
                Some(Ok(inbound)) => {
                    error_backoff.reset();
                    let meta = inbound.metadata.clone();
                    let lane = match lanes.entry((meta.topic.clone(), meta.partition)) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let Some(handler) = self.routes.get(&meta.topic) else {
                                warn!(topic = %meta.topic, "No CDC consumer for topic, skipping");
                                control.commit(&meta.topic, meta.partition, meta.offset + 1);
                                continue;
                            };
                            entry.insert(Lane::spawn(
                                &meta,
                                Arc::clone(handler),
                                Arc::clone(&control),
                                Arc::clone(&permits),
                                &self.config,
                                shutdown.clone(),
                            ))
                        }
                    };
                    if !lane.push(inbound, control.as_ref()) {
                        error!(topic = %meta.topic, partition = meta.partition, "Partition lane stopped unexpectedly");
                        break;
                    }
                }
                Some(Err(e)) => {
                    let delay = error_backoff.next_delay();
                    error!(error = %e, ?delay, "Kafka consumer error");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!("Message stream ended, reconnecting...");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        drop(stream);
        for lane in lanes.into_values() {
            lane.drain().await;
        }

        info!("CDC listener stopped");
        Ok(())
    }
}

/// Time a retry delivery must still wait, never more than `max_hold`.
pub fn hold_for(message: &InboundMessage, max_hold: Duration) -> Duration {
    message
        .not_before()
        .and_then(|not_before| (not_before - Utc::now()).to_std().ok())
        .map_or(Duration::ZERO, |wait| wait.min(max_hold))
}

/// Sleep for `delay`; returns `false` if shutdown was signalled first.
async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}

/// Copy a delivered message out of the consumer's buffer.
///
/// Header values that are not UTF-8 are dropped.
pub fn detach<M: Message>(message: &M) -> InboundMessage {
    let metadata = MessageMetadata::new(message.topic(), message.partition(), message.offset());
    let mut inbound = InboundMessage::new(metadata, message.payload().map(<[u8]>::to_vec));
    inbound.key = message.key().map(<[u8]>::to_vec);

    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            if let Some(Ok(value)) = header.value.map(std::str::from_utf8) {
                inbound
                    .headers
                    .insert(header.key.to_string(), value.to_string());
            }
        }
    }

    inbound
}
