use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::SinkError;

/// Destination for encoded output records.
///
/// Every delivery is awaited before the caller takes its next work item,
/// so a checkpoint barrier always finds previously emitted records on the
/// wire.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, key: &str, payload: Vec<u8>) -> Result<(), SinkError>;
}

/// Create the output producer and ping the brokers by requesting metadata.
pub async fn create_producer(config: &Config) -> Result<FutureProducer, SinkError> {
    let producer: FutureProducer = config.producer_client_config().create()?;

    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                topics = metadata.topics().len(),
                "Connected to Kafka brokers"
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {error:?}");
            return Err(SinkError::Create(error));
        }
    }

    Ok(producer)
}

/// Kafka-backed sink producing to a fixed topic.
#[derive(Clone)]
pub struct KafkaRecordSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaRecordSink {
    pub fn new(producer: FutureProducer, topic: String, send_timeout: Duration) -> Self {
        Self {
            producer,
            topic,
            send_timeout,
        }
    }
}

#[async_trait]
impl RecordSink for KafkaRecordSink {
    async fn deliver(&self, key: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok(_) => {
                debug!(topic = %self.topic, key, "Delivered output record");
                Ok(())
            }
            Err((error, _)) => Err(SinkError::Produce {
                topic: self.topic.clone(),
                error,
            }),
        }
    }
}
