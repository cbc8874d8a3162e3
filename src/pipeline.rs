//! Pipeline assembly and the consumption/checkpoint run loop.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use siphasher::sip::SipHasher13;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::checkpoint::manifest::CheckpointManifest;
use crate::checkpoint::store::{Checkpoint, CheckpointStore};
use crate::codec::RecordCodec;
use crate::config::Config;
use crate::error::PipelineError;
use crate::kafka::sink::RecordSink;
use crate::kafka::source::{KafkaEventSource, SourceRecord};
use crate::metrics_const::{
    CHECKPOINTS_COMPLETED_COUNTER, CHECKPOINT_DURATION_HISTOGRAM, DECODE_FAILURES_COUNTER,
    EVENTS_CONSUMED_COUNTER, KEYS_TRACKED_GAUGE, OFFSET_COMMITS_COUNTER,
};
use crate::state::StateShard;
use crate::worker::Worker;

// Stable stage identifiers, recorded in every checkpoint manifest. Renaming
// one orphans existing checkpoints, so treat these as part of the state
// format.
pub const SOURCE_STAGE_UID: &str = "kafka-source";
pub const PROCESS_STAGE_UID: &str = "process";
pub const SINK_STAGE_UID: &str = "kafka-sink";

pub fn stage_uids() -> Vec<String> {
    vec![
        SOURCE_STAGE_UID.to_string(),
        PROCESS_STAGE_UID.to_string(),
        SINK_STAGE_UID.to_string(),
    ]
}

/// Worker index for a key. SipHash-1-3 with fixed keys, so the routing is
/// stable across processes and a checkpoint written under one worker count
/// restores correctly under another.
pub fn route(key: &str, workers: usize) -> usize {
    let mut hasher = SipHasher13::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// The assembled dataflow: decode, key-route, count, encode, deliver, with
/// checkpoint barriers woven through the worker channels.
pub struct Pipeline {
    config: Config,
    codec: Arc<RecordCodec>,
    workers: Vec<Worker>,
    store: CheckpointStore,
    /// Next offset to read per partition, advanced as records are routed.
    positions: HashMap<i32, i64>,
    sequence: u64,
}

impl Pipeline {
    /// Build the dataflow from configuration, seeding worker shards from a
    /// restored checkpoint when one is supplied. Configuration problems
    /// surface here, before anything touches a broker.
    pub fn assemble(
        config: &Config,
        sink: Arc<dyn RecordSink>,
        store: CheckpointStore,
        restored: Option<Checkpoint>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let codec = Arc::new(RecordCodec::new(
            config.record_format()?,
            config.schema_registry_framing,
            config.output_schema_id,
        )?);

        let mut shards: Vec<StateShard> = (0..config.worker_count)
            .map(|_| StateShard::new())
            .collect();
        let mut positions = HashMap::new();
        let mut sequence = 0;

        if let Some(checkpoint) = restored {
            // Re-route restored entries by the stable key hash; the worker
            // count that wrote the snapshot does not have to match ours.
            for entry in checkpoint.entries()? {
                shards[route(&entry.key, config.worker_count)].put(entry);
            }
            positions = checkpoint.manifest.source_positions.clone();
            sequence = checkpoint.manifest.sequence;
            info!(
                checkpoint_id = %checkpoint.manifest.id,
                partitions = positions.len(),
                "Seeded worker shards from checkpoint"
            );
        }

        let workers = shards
            .into_iter()
            .enumerate()
            .map(|(index, shard)| {
                Worker::spawn(
                    index,
                    shard,
                    codec.clone(),
                    sink.clone(),
                    config.worker_channel_size,
                )
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            codec,
            workers,
            store,
            positions,
            sequence,
        })
    }

    /// Where the source should start reading each partition.
    pub fn start_positions(&self) -> &HashMap<i32, i64> {
        &self.positions
    }

    /// Consume until shutdown, checkpointing on the configured interval and
    /// committing source offsets only after each checkpoint is durable.
    pub async fn run(
        mut self,
        source: KafkaEventSource,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.checkpoint_interval(),
            self.config.checkpoint_interval(),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopping consumption");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.checkpoint_and_commit(&source).await {
                        break Err(e);
                    }
                }
                received = source.recv() => {
                    let outcome = match received {
                        Ok(record) => self.process_record(record).await,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = outcome {
                        break Err(e);
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                // One final barrier round so a clean shutdown loses nothing.
                self.checkpoint_and_commit(&source).await?;
                self.drain().await
            }
            Err(e) => {
                if let Err(drain_err) = self.drain().await {
                    warn!("Worker drain after failure also failed: {drain_err}");
                }
                Err(e)
            }
        }
    }

    /// Decode one source record and hand it to the worker that owns its key.
    pub async fn process_record(&mut self, record: SourceRecord) -> Result<(), PipelineError> {
        metrics::counter!(EVENTS_CONSUMED_COUNTER).increment(1);

        let event = match self.codec.decode(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!(DECODE_FAILURES_COUNTER).increment(1);
                return Err(e.into());
            }
        };

        self.positions.insert(record.partition, record.offset + 1);
        let index = route(&event.id, self.workers.len());
        self.workers[index].submit(event).await
    }

    /// One full barrier round: snapshot every shard, persist the checkpoint,
    /// and return its manifest. Offsets are not committed here; callers do
    /// that once the checkpoint is durable.
    pub async fn snapshot_and_persist(&mut self) -> Result<CheckpointManifest, PipelineError> {
        let started = Instant::now();

        // Inject all barriers before awaiting any reply, so workers snapshot
        // the same stream cut instead of serializing behind each other.
        let mut replies = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            replies.push(worker.barrier().await?);
        }

        let mut snapshots = Vec::with_capacity(replies.len());
        let mut keys_total = 0;
        for (index, reply) in replies.into_iter().enumerate() {
            let snapshot = match tokio::time::timeout(self.config.barrier_timeout(), reply).await {
                Err(_) => {
                    return Err(PipelineError::BarrierTimeout(self.config.barrier_timeout()))
                }
                Ok(Err(_)) => return Err(PipelineError::WorkerStopped(index)),
                Ok(Ok(result)) => result?,
            };
            keys_total += snapshot.keys;
            snapshots.push(snapshot);
        }

        self.sequence += 1;
        let manifest = CheckpointManifest::new(
            self.sequence,
            self.config.job_name.clone(),
            stage_uids(),
            self.config.input_topic.clone(),
            self.positions.clone(),
        );
        let manifest = self.store.persist(manifest, &snapshots).await?;

        metrics::counter!(CHECKPOINTS_COMPLETED_COUNTER).increment(1);
        metrics::histogram!(CHECKPOINT_DURATION_HISTOGRAM).record(started.elapsed().as_secs_f64());
        metrics::gauge!(KEYS_TRACKED_GAUGE).set(keys_total as f64);
        info!(
            checkpoint_id = %manifest.id,
            sequence = manifest.sequence,
            keys = keys_total,
            "Completed checkpoint"
        );
        Ok(manifest)
    }

    async fn checkpoint_and_commit(
        &mut self,
        source: &KafkaEventSource,
    ) -> Result<(), PipelineError> {
        let manifest = self.snapshot_and_persist().await?;
        source.commit_positions(&manifest.source_positions)?;
        metrics::counter!(OFFSET_COMMITS_COUNTER).increment(1);
        Ok(())
    }

    /// Close the worker channels and wait for every worker to finish.
    pub async fn drain(&mut self) -> Result<(), PipelineError> {
        let mut result = Ok(());
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = worker.join().await {
                result = Err(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_deterministic() {
        assert_eq!(route("user-1", 4), route("user-1", 4));
        assert_eq!(route("user-1", 7), route("user-1", 7));
    }

    #[test]
    fn routing_stays_in_bounds() {
        for workers in 1..=8 {
            for key in ["a", "b", "user-42", ""] {
                assert!(route(key, workers) < workers);
            }
        }
    }

    #[test]
    fn routing_spreads_keys_across_workers() {
        let mut hit = [false; 4];
        for i in 0..100 {
            hit[route(&format!("key-{i}"), 4)] = true;
        }
        assert!(hit.iter().all(|&used| used));
    }

    #[test]
    fn stage_uids_are_stable() {
        assert_eq!(stage_uids(), ["kafka-source", "process", "kafka-sink"]);
    }
}
