use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StateError;

/// Filename of the manifest inside each checkpoint directory. Writing it is
/// the commit point: a directory without a manifest is an aborted attempt.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Checkpoint id timestamp element, e.g. "2025-10-14T16-00-05Z".
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Everything needed to judge and rebuild one checkpoint.
///
/// Stage identifiers are recorded so that a redeployment with a different
/// pipeline shape refuses to restore state it would misinterpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Checkpoint id: sortable timestamp plus the barrier sequence.
    pub id: String,
    /// Monotonic barrier round number, continued across restarts.
    pub sequence: u64,
    pub job_name: String,
    /// Stable stage uids of the pipeline that wrote this checkpoint.
    pub stages: Vec<String>,
    pub input_topic: String,
    /// Next offset to read, per input partition.
    pub source_positions: HashMap<i32, i64>,
    /// Shard filenames inside the checkpoint directory, one per worker.
    pub shard_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckpointManifest {
    pub fn new(
        sequence: u64,
        job_name: String,
        stages: Vec<String>,
        input_topic: String,
        source_positions: HashMap<i32, i64>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Self::generate_id(created_at, sequence),
            sequence,
            job_name,
            stages,
            input_topic,
            source_positions,
            shard_files: Vec::new(),
            created_at,
        }
    }

    /// Ids sort lexically in creation order; the sequence suffix breaks ties
    /// within one second.
    pub fn generate_id(created_at: DateTime<Utc>, sequence: u64) -> String {
        format!("{}-{:08}", created_at.format(TIMESTAMP_FORMAT), sequence)
    }

    /// Load a manifest from its JSON file.
    pub async fn load_from_file(path: &Path) -> Result<Self, StateError> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save the manifest to a JSON file. Callers write this last.
    pub async fn save_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(checkpoint_id = %self.id, "Saved checkpoint manifest to {path:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(sequence: u64) -> CheckpointManifest {
        CheckpointManifest::new(
            sequence,
            "kafka-tally".to_string(),
            vec!["kafka-source".to_string(), "process".to_string()],
            "events-input".to_string(),
            HashMap::from([(0, 42)]),
        )
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let earlier = CheckpointManifest::generate_id(
            "2025-10-14T16:00:05Z".parse().unwrap(),
            7,
        );
        let later = CheckpointManifest::generate_id(
            "2025-10-14T16:00:05Z".parse().unwrap(),
            8,
        );
        let much_later = CheckpointManifest::generate_id(
            "2025-10-14T17:00:00Z".parse().unwrap(),
            9,
        );

        assert!(earlier < later);
        assert!(later < much_later);
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILENAME);
        let original = manifest(3);

        original.save_to_file(&path).await.unwrap();
        let loaded = CheckpointManifest::load_from_file(&path).await.unwrap();

        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.sequence, 3);
        assert_eq!(loaded.source_positions.get(&0), Some(&42));
        assert_eq!(loaded.stages, original.stages);
    }

    #[tokio::test]
    async fn loading_a_missing_manifest_is_an_io_error() {
        let dir = TempDir::new().unwrap();

        let err = CheckpointManifest::load_from_file(&dir.path().join(MANIFEST_FILENAME))
            .await
            .unwrap_err();

        assert!(matches!(err, StateError::Io(_)));
    }
}
