//! Test doubles and payload builders shared by unit and integration tests.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value, Schema};
use async_trait::async_trait;

use crate::config::Config;
use crate::context::JobListener;
use crate::error::{LineageError, SinkError};
use crate::event::{InputEvent, OutputEvent, INPUT_EVENT_SCHEMA, OUTPUT_EVENT_SCHEMA};
use crate::kafka::sink::RecordSink;
use crate::lineage::facts::JobRun;
use crate::lineage::sink::LineageSink;

/// Collects delivered records instead of producing them.
#[derive(Default)]
pub struct CapturingSink {
    pub delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl CapturingSink {
    /// The captured payloads decoded back into output events, in delivery
    /// order.
    pub fn outputs(&self) -> Vec<OutputEvent> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| decode_framed_output(payload))
            .collect()
    }
}

#[async_trait]
impl RecordSink for CapturingSink {
    async fn deliver(&self, key: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .unwrap()
            .push((key.to_string(), payload));
        Ok(())
    }
}

/// Records every lineage fact it receives.
#[derive(Default)]
pub struct RecordingLineageSink {
    pub facts: Mutex<Vec<JobRun>>,
}

#[async_trait]
impl LineageSink for RecordingLineageSink {
    async fn emit(&self, run: &JobRun) -> Result<(), LineageError> {
        self.facts.lock().unwrap().push(run.clone());
        Ok(())
    }
}

/// Fails every emission.
pub struct FailingLineageSink;

#[async_trait]
impl LineageSink for FailingLineageSink {
    async fn emit(&self, _run: &JobRun) -> Result<(), LineageError> {
        Err(LineageError::Sink("sink is down".to_string()))
    }
}

/// Remembers every lifecycle fact fired through a job context.
#[derive(Clone, Default)]
pub struct RecordingListener {
    pub seen: Arc<Mutex<Vec<JobRun>>>,
}

#[async_trait]
impl JobListener for RecordingListener {
    async fn on_job_started(&self, run: &JobRun) {
        self.seen.lock().unwrap().push(run.clone());
    }

    async fn on_job_finished(&self, run: &JobRun) {
        self.seen.lock().unwrap().push(run.clone());
    }
}

/// A configuration that passes validation and never reaches a real broker
/// or collector, checkpointing under the given directory.
pub fn test_config(checkpoint_dir: &std::path::Path) -> Config {
    Config {
        kafka_hosts: "localhost:9092".to_string(),
        kafka_consumer_group: "kafka-tally".to_string(),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_tls: false,
        input_topic: "events-input".to_string(),
        output_topic: Some("events-output".to_string()),
        job_name: "kafka-tally".to_string(),
        input_format: "generic".to_string(),
        schema_registry_framing: true,
        output_schema_id: 1,
        kafka_producer_linger_ms: 20,
        kafka_producer_queue_mib: 400,
        kafka_producer_queue_messages: 10_000_000,
        kafka_message_timeout_ms: 20_000,
        kafka_compression_codec: "snappy".to_string(),
        producer_send_timeout_secs: 10,
        worker_count: 4,
        worker_channel_size: 64,
        checkpoint_dir: checkpoint_dir.to_string_lossy().into_owned(),
        checkpoint_interval_secs: 30,
        max_local_checkpoints: 5,
        barrier_timeout_secs: 5,
        lineage_url: None,
        lineage_namespace: "default".to_string(),
        lineage_timeout_secs: 1,
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_timeout_secs: 5,
    }
}

/// A raw input datum for one event.
pub fn input_datum(id: &str, version: i64) -> Vec<u8> {
    let schema = Schema::parse_str(INPUT_EVENT_SCHEMA).expect("input schema parses");
    let event = InputEvent {
        id: id.to_string(),
        version,
    };
    to_avro_datum(&schema, to_value(&event).expect("event serializes"))
        .expect("datum encodes")
}

/// A registry-framed payload for one input event.
pub fn framed_input(id: &str, version: i64, schema_id: u32) -> Vec<u8> {
    let datum = input_datum(id, version);
    let mut framed = vec![0x00];
    framed.extend_from_slice(&schema_id.to_be_bytes());
    framed.extend_from_slice(&datum);
    framed
}

/// Decode a registry-framed output payload back into an event.
pub fn decode_framed_output(payload: &[u8]) -> OutputEvent {
    let schema = Schema::parse_str(OUTPUT_EVENT_SCHEMA).expect("output schema parses");
    let mut reader = Cursor::new(&payload[5..]);
    let value = from_avro_datum(&schema, &mut reader, None).expect("datum decodes");
    from_value(&value).expect("output event deserializes")
}
