use std::collections::HashMap;
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::info;

use crate::config::Config;
use crate::error::PipelineError;

/// How long to wait for broker metadata when discovering partitions.
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// One record pulled off the input topic, detached from the consumer.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Assign-only consumer over every partition of the input topic.
///
/// Partition start offsets come from the restored checkpoint where one
/// exists, otherwise from the configured reset policy. The consumer group
/// never drives assignment; it only receives progress commits after a
/// checkpoint is durable, so group offsets stay at or behind the state
/// that produced them.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    pub async fn connect(
        config: &Config,
        start_positions: &HashMap<i32, i64>,
    ) -> Result<Self, PipelineError> {
        let consumer: StreamConsumer = config.consumer_client_config().create()?;

        let metadata = consumer.fetch_metadata(Some(&config.input_topic), METADATA_TIMEOUT)?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .find(|topic| topic.name() == config.input_topic)
            .map(|topic| topic.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default();

        if partitions.is_empty() {
            return Err(PipelineError::TopicNotFound(config.input_topic.clone()));
        }

        let mut assignment = TopicPartitionList::new();
        for partition in &partitions {
            let start = match start_positions.get(partition) {
                Some(&next_offset) => Offset::Offset(next_offset),
                None => config.reset_offset(),
            };
            assignment.add_partition_offset(&config.input_topic, *partition, start)?;
        }
        consumer.assign(&assignment)?;

        info!(
            topic = %config.input_topic,
            partitions = partitions.len(),
            restored = start_positions.len(),
            "Assigned input partitions"
        );

        Ok(Self {
            consumer,
            topic: config.input_topic.clone(),
        })
    }

    /// Wait for the next record.
    pub async fn recv(&self) -> Result<SourceRecord, KafkaError> {
        let message = self.consumer.recv().await?;
        Ok(detach(&message))
    }

    /// Publish checkpointed positions to the consumer group.
    ///
    /// Positions already hold the next offset to read, which is exactly
    /// what Kafka expects in a commit.
    pub fn commit_positions(&self, positions: &HashMap<i32, i64>) -> Result<(), PipelineError> {
        if positions.is_empty() {
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for (&partition, &next_offset) in positions {
            list.add_partition_offset(&self.topic, partition, Offset::Offset(next_offset))?;
        }
        self.consumer.commit(&list, CommitMode::Sync)?;
        Ok(())
    }
}

fn detach(message: &BorrowedMessage<'_>) -> SourceRecord {
    SourceRecord {
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: message.partition(),
        offset: message.offset(),
    }
}
