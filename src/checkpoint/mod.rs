// Checkpoint module - durable snapshots of keyed state plus source positions
pub mod manifest;
pub mod store;

pub use manifest::{CheckpointManifest, MANIFEST_FILENAME};
pub use store::{Checkpoint, CheckpointStore};
