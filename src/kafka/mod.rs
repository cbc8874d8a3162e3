// Kafka module - assign-only source and delivery-awaited sink
pub mod sink;
pub mod source;

// Public API
pub use sink::{create_producer, KafkaRecordSink, RecordSink};
pub use source::{KafkaEventSource, SourceRecord};
