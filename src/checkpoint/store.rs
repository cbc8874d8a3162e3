use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::manifest::{CheckpointManifest, MANIFEST_FILENAME};
use crate::error::StateError;
use crate::event::KeyState;
use crate::state::{ShardSnapshot, StateShard};

/// A checkpoint read back from disk: the manifest plus every shard's bytes.
#[derive(Debug)]
pub struct Checkpoint {
    pub manifest: CheckpointManifest,
    pub shards: Vec<Vec<u8>>,
}

impl Checkpoint {
    /// All key states across shards, ready to be re-routed onto however
    /// many workers the restoring pipeline runs.
    pub fn entries(&self) -> Result<Vec<KeyState>, StateError> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            entries.extend(StateShard::entries_from_snapshot(shard)?);
        }
        Ok(entries)
    }
}

/// Local checkpoint persistence.
///
/// Layout: `<dir>/<checkpoint-id>/shard-N.bin` plus `manifest.json`, written
/// last. A crash mid-write leaves a directory without a manifest, which
/// restore skips and the next prune removes.
pub struct CheckpointStore {
    dir: PathBuf,
    max_local_checkpoints: usize,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, max_local_checkpoints: usize) -> Self {
        Self {
            dir,
            max_local_checkpoints,
        }
    }

    fn shard_filename(index: usize) -> String {
        format!("shard-{index}.bin")
    }

    /// Persist one checkpoint: shard files first, manifest last, then prune
    /// old checkpoints down to the retention limit.
    pub async fn persist(
        &self,
        mut manifest: CheckpointManifest,
        snapshots: &[ShardSnapshot],
    ) -> Result<CheckpointManifest, StateError> {
        let checkpoint_dir = self.dir.join(&manifest.id);
        tokio::fs::create_dir_all(&checkpoint_dir).await?;

        for snapshot in snapshots {
            let filename = Self::shard_filename(snapshot.index);
            tokio::fs::write(checkpoint_dir.join(&filename), &snapshot.bytes).await?;
            manifest.shard_files.push(filename);
        }

        manifest
            .save_to_file(&checkpoint_dir.join(MANIFEST_FILENAME))
            .await?;

        self.prune().await?;
        Ok(manifest)
    }

    /// Load the most recent complete checkpoint, or None on a fresh start.
    ///
    /// A manifest whose stage uids differ from `expected_stages` was written
    /// by a different pipeline shape and is rejected rather than skipped:
    /// restoring nothing on top of it would silently reset every count.
    pub async fn load_latest(
        &self,
        expected_stages: &[String],
    ) -> Result<Option<Checkpoint>, StateError> {
        for id in self.checkpoint_ids_newest_first().await? {
            let checkpoint_dir = self.dir.join(&id);
            let manifest_path = checkpoint_dir.join(MANIFEST_FILENAME);
            if !manifest_path.exists() {
                warn!(checkpoint_id = %id, "Skipping checkpoint without a manifest");
                continue;
            }

            let manifest = CheckpointManifest::load_from_file(&manifest_path).await?;
            if manifest.stages != expected_stages {
                return Err(StateError::Incompatible {
                    id,
                    reason: format!(
                        "checkpoint stages {:?} do not match pipeline stages {:?}",
                        manifest.stages, expected_stages
                    ),
                });
            }

            let mut shards = Vec::with_capacity(manifest.shard_files.len());
            for file in &manifest.shard_files {
                let path = checkpoint_dir.join(file);
                if !path.exists() {
                    return Err(StateError::MissingShard {
                        id,
                        file: file.clone(),
                    });
                }
                shards.push(tokio::fs::read(&path).await?);
            }

            info!(
                checkpoint_id = %manifest.id,
                sequence = manifest.sequence,
                shards = shards.len(),
                "Restoring from checkpoint"
            );
            return Ok(Some(Checkpoint { manifest, shards }));
        }

        Ok(None)
    }

    /// Remove checkpoints beyond the retention limit, oldest first.
    async fn prune(&self) -> Result<(), StateError> {
        let ids = self.checkpoint_ids_newest_first().await?;
        for id in ids.iter().skip(self.max_local_checkpoints) {
            let path = self.dir.join(id);
            tokio::fs::remove_dir_all(&path).await?;
            info!(checkpoint_id = %id, "Pruned old checkpoint");
        }
        Ok(())
    }

    async fn checkpoint_ids_newest_first(&self) -> Result<Vec<String>, StateError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        // Ids embed the creation timestamp and sequence, so name order is
        // creation order.
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
