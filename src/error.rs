use std::time::Duration;

use thiserror::Error;

/// Rejected configuration. Always fatal at startup: the job must never
/// reach its run loop with one of these outstanding.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required parameter {0}")]
    MissingParameter(&'static str),

    #[error("invalid value '{value}' for {param}: {reason}")]
    InvalidParameter {
        param: &'static str,
        value: String,
        reason: String,
    },
}

/// A payload that could not be turned into an input event.
///
/// Malformed input is fatal by policy: the run stops and restarts from the
/// last checkpoint rather than skipping records.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("payload truncated: framing needs {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("bad magic byte {0:#04x} in registry framing")]
    BadMagic(u8),

    #[error("record field '{0}' is missing")]
    MissingField(&'static str),

    #[error("record field '{0}' has an unexpected type")]
    FieldType(&'static str),

    #[error("avro: {0}")]
    Avro(#[from] apache_avro::Error),
}

/// Snapshot, restore or checkpoint persistence failure.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to serialize state snapshot: {0}")]
    Serialize(#[source] bincode::Error),

    #[error("failed to decode state snapshot: {0}")]
    Deserialize(#[source] bincode::Error),

    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("checkpoint {id} is not compatible: {reason}")]
    Incompatible { id: String, reason: String },

    #[error("checkpoint {id} is missing shard file {file}")]
    MissingShard { id: String, file: String },
}

/// Output delivery failure. Fatal: a record counted into state must reach
/// the output topic before its offset can ever be committed.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to produce to '{topic}': {error}")]
    Produce {
        topic: String,
        #[source]
        error: rdkafka::error::KafkaError,
    },

    #[error("producer creation failed: {0}")]
    Create(#[from] rdkafka::error::KafkaError),
}

/// Lineage reporting failure. Recovered locally: logged, counted, dropped.
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("run is already in a terminal state")]
    AlreadyTerminal,

    #[error("lifecycle transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("lineage sink: {0}")]
    Sink(String),
}

/// Anything that stops the run loop.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("input topic '{0}' not found in cluster metadata")]
    TopicNotFound(String),

    #[error("worker {0} stopped unexpectedly")]
    WorkerStopped(usize),

    #[error("checkpoint barrier timed out after {0:?}")]
    BarrierTimeout(Duration),
}
