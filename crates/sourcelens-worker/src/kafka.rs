//! Kafka-backed job queue
//!
//! Jobs travel as JSON envelopes keyed by `project_id`, so a topic partition
//! carries a project's jobs in order. Offsets are committed on ack; an
//! uncommitted message returns after the consumer session times out, which is
//! the broker-side equivalent of the in-memory visibility timeout.

use crate::queue::{Delivery, JobQueue};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, TopicPartitionList};
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::AnalysisJob;
use std::time::Duration;
use tracing::debug;

/// Kafka connection settings
#[derive(Debug, Clone)]
pub struct KafkaQueueConfig {
    /// Broker list, e.g. `localhost:9092`
    pub brokers: String,
    /// Topic carrying analysis jobs
    pub topic: String,
    /// Consumer group id
    pub group_id: String,
}

impl KafkaQueueConfig {
    /// Read `KAFKA_BROKERS`, `KAFKA_TOPIC`, `KAFKA_GROUP_ID`
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            brokers: std::env::var("KAFKA_BROKERS")
                .map_err(|_| Error::validation("KAFKA_BROKERS", "environment variable not set"))?,
            topic: std::env::var("KAFKA_TOPIC").unwrap_or_else(|_| "analysis-jobs".to_string()),
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "sourcelens-workers".to_string()),
        })
    }
}

/// Kafka [`JobQueue`] implementation
pub struct KafkaJobQueue {
    producer: FutureProducer,
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaJobQueue {
    /// Connect producer and consumer and subscribe to the jobs topic
    pub fn connect(config: &KafkaQueueConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| Error::queue(format!("producer setup failed: {e}")))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| Error::queue(format!("consumer setup failed: {e}")))?;
        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| Error::queue(format!("subscribe failed: {e}")))?;

        Ok(Self {
            producer,
            consumer,
            topic: config.topic.clone(),
        })
    }

    fn parse_receipt(receipt: &str) -> Result<(i32, i64)> {
        let (partition, offset) = receipt
            .split_once(':')
            .ok_or_else(|| Error::queue(format!("bad receipt: {receipt}")))?;
        Ok((
            partition
                .parse()
                .map_err(|_| Error::queue(format!("bad receipt partition: {receipt}")))?,
            offset
                .parse()
                .map_err(|_| Error::queue(format!("bad receipt offset: {receipt}")))?,
        ))
    }
}

#[async_trait]
impl JobQueue for KafkaJobQueue {
    async fn enqueue(&self, job: AnalysisJob) -> Result<()> {
        let payload = serde_json::to_string(&job)?;
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(&job.project_id)
                    .payload(&payload),
                Duration::from_secs(10),
            )
            .await
            .map_err(|(e, _)| Error::queue(format!("produce failed: {e}")))?;
        debug!(job_id = %job.job_id, "job produced");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        match tokio::time::timeout(Duration::from_millis(500), self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(Error::queue(format!("consume failed: {e}"))),
            Ok(Ok(message)) => {
                let payload = message
                    .payload()
                    .ok_or_else(|| Error::queue("message without payload"))?;
                let job: AnalysisJob = serde_json::from_slice(payload)?;
                Ok(Some(Delivery {
                    job,
                    receipt: format!("{}:{}", message.partition(), message.offset()),
                }))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let (partition, offset) = Self::parse_receipt(&delivery.receipt)?;
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(
            &self.topic,
            partition,
            rdkafka::Offset::Offset(offset + 1),
        )
        .map_err(|e| Error::queue(format!("offset build failed: {e}")))?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| Error::queue(format!("commit failed: {e}")))
    }

    async fn nack(&self, _delivery: &Delivery) -> Result<()> {
        // Leaving the offset uncommitted is the redelivery mechanism
        Ok(())
    }
}
