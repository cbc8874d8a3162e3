use serde::{Deserialize, Serialize};

/// Writer/reader schema for records arriving on the input topic.
pub const INPUT_EVENT_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "InputEvent",
    "namespace": "kafkatally.events",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "version", "type": "long"}
    ]
}
"#;

/// Schema for records produced to the output topic.
pub const OUTPUT_EVENT_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "OutputEvent",
    "namespace": "kafkatally.events",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "version", "type": "long"},
        {"name": "count", "type": "long"}
    ]
}
"#;

/// One decoded input record. Immutable once decoded; `id` is the
/// partitioning key for all downstream state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub id: String,
    pub version: i64,
}

/// The derived record emitted for every counted input: the key, the
/// version carried through untouched, and the updated count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub id: String,
    pub version: i64,
    pub count: i64,
}

/// Persistent per-key state. Created lazily on a key's first event and
/// carried across restarts through checkpoint snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub key: String,
    pub count: i64,
}

impl KeyState {
    pub fn new(key: String) -> Self {
        Self { key, count: 0 }
    }
}
