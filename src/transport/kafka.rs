//! Kafka binding of the stream transport.
//!
//! A stream maps to a single-partition topic (offset checkpointing needs
//! one total order per stream) and the subscriber name maps to the
//! consumer group id, so the cursor lives in the broker's committed-offset
//! storage. Commits are manual and issued only by `store_offset`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use tracing::{debug, error, info};

use super::{RawMessage, StartPosition, StreamSpec, StreamSubscription, StreamTransport};
use crate::config::KafkaConfig;
use crate::error::{Result, SyncError};

const PARTITION: i32 = 0;

pub struct KafkaStreamTransport {
    brokers: String,
    /// One consumer per (stream, subscriber): the same handle carries the
    /// subscription and its offset commits.
    consumers: DashMap<(String, String), Arc<StreamConsumer>>,
}

impl KafkaStreamTransport {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            brokers: config.brokers.clone(),
            consumers: DashMap::new(),
        }
    }

    fn consumer_for(&self, stream: &str, subscriber: &str) -> Result<Arc<StreamConsumer>> {
        let key = (stream.to_string(), subscriber.to_string());
        if let Some(existing) = self.consumers.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", subscriber)
            .set("bootstrap.servers", &self.brokers)
            .set("enable.auto.commit", "false") // cursor moves only after apply
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create consumer for {}/{}: {}", stream, subscriber, e);
                SyncError::Transport(e.to_string())
            })?;

        let consumer = Arc::new(consumer);
        self.consumers.insert(key, Arc::clone(&consumer));
        Ok(consumer)
    }
}

#[async_trait]
impl StreamTransport for KafkaStreamTransport {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| SyncError::StreamSetup(format!("admin client: {e}")))?;

        let retention = spec.max_length_bytes.to_string();
        let segment = spec.max_segment_bytes.to_string();
        let topic = NewTopic::new(&spec.name, 1, TopicReplication::Fixed(1))
            .set("retention.bytes", &retention)
            .set("segment.bytes", &segment);

        let results = admin
            .create_topics([&topic], &AdminOptions::new())
            .await
            .map_err(|e| SyncError::StreamSetup(format!("create stream {}: {e}", spec.name)))?;

        for result in results {
            match result {
                Ok(name) => info!(stream = %name, "Stream created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(stream = %name, "Stream already exists")
                }
                Err((name, code)) => {
                    return Err(SyncError::StreamSetup(format!(
                        "create stream {name}: {code}"
                    )))
                }
            }
        }

        // Partition leadership is broker policy here; the requested
        // placement is recorded in config, not applied.
        debug!(
            stream = %spec.name,
            leader_locator = %spec.leader_locator,
            "Leader placement left to the broker"
        );
        Ok(())
    }

    async fn query_offset(&self, stream: &str, subscriber: &str) -> Result<Option<i64>> {
        let consumer = self.consumer_for(stream, subscriber)?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition(stream, PARTITION);

        let committed = consumer
            .committed_offsets(assignment, Duration::from_secs(10))
            .map_err(|e| {
                SyncError::Transport(format!(
                    "query committed offset for {stream}/{subscriber}: {e}"
                ))
            })?;

        // The broker stores the next offset to consume; the cursor contract
        // is the last applied offset.
        match committed.elements().first().map(|e| e.offset()) {
            Some(Offset::Offset(next)) if next > 0 => Ok(Some(next - 1)),
            _ => Ok(None),
        }
    }

    async fn store_offset(&self, stream: &str, subscriber: &str, offset: i64) -> Result<()> {
        let consumer = self.consumer_for(stream, subscriber)?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(stream, PARTITION, Offset::Offset(offset + 1))
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        consumer.commit(&tpl, CommitMode::Async).map_err(|e| {
            SyncError::Transport(format!("commit offset {offset} for {stream}/{subscriber}: {e}"))
        })?;

        debug!(stream, subscriber, offset, "Offset committed");
        Ok(())
    }

    async fn subscribe(
        &self,
        stream: &str,
        subscriber: &str,
        start: StartPosition,
    ) -> Result<Box<dyn StreamSubscription>> {
        let consumer = self.consumer_for(stream, subscriber)?;

        let offset = match start {
            StartPosition::Beginning => Offset::Beginning,
            StartPosition::Offset(o) => Offset::Offset(o),
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(stream, PARTITION, offset)
            .map_err(|e| SyncError::StreamSetup(e.to_string()))?;

        consumer
            .assign(&tpl)
            .map_err(|e| SyncError::StreamSetup(format!("assign {stream}: {e}")))?;

        info!(stream, subscriber, start = ?start, "Subscribed to stream");
        Ok(Box::new(KafkaSubscription { consumer }))
    }
}

struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl StreamSubscription for KafkaSubscription {
    async fn next(&mut self) -> Result<Option<RawMessage>> {
        match self.consumer.recv().await {
            Ok(msg) => Ok(Some(RawMessage {
                payload: msg.payload().unwrap_or_default().to_vec(),
                offset: msg.offset(),
            })),
            Err(e) => Err(SyncError::Transport(e.to_string())),
        }
    }
}
