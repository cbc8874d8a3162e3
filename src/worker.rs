//! Worker tasks owning disjoint shards of the keyed state.
//!
//! Each worker drains a bounded channel, so ordering is preserved within a
//! key, backpressure applies when processing falls behind, and a barrier
//! answered through the same channel reflects exactly the records enqueued
//! before it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::RecordCodec;
use crate::error::{PipelineError, StateError};
use crate::event::InputEvent;
use crate::kafka::sink::RecordSink;
use crate::metrics_const::{EVENTS_PROCESSED_COUNTER, RECORDS_EMITTED_COUNTER};
use crate::processor::TallyProcessor;
use crate::state::{ShardSnapshot, StateShard};

/// One unit of work routed to a worker.
pub enum WorkItem {
    /// Count one event and emit its derived record.
    Record(InputEvent),
    /// Snapshot the shard as of everything enqueued before this item.
    Barrier {
        reply: oneshot::Sender<Result<ShardSnapshot, StateError>>,
    },
}

/// Handle to one spawned worker task.
pub struct Worker {
    index: usize,
    sender: mpsc::Sender<WorkItem>,
    handle: JoinHandle<Result<(), PipelineError>>,
}

impl Worker {
    pub fn spawn(
        index: usize,
        shard: StateShard,
        codec: Arc<RecordCodec>,
        sink: Arc<dyn RecordSink>,
        channel_size: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(channel_size);
        let handle =
            tokio::spawn(async move { run_worker(index, shard, codec, sink, receiver).await });

        Self {
            index,
            sender,
            handle,
        }
    }

    /// Queue an event for this worker. Awaits channel capacity; fails only
    /// if the worker has stopped.
    pub async fn submit(&self, event: InputEvent) -> Result<(), PipelineError> {
        self.sender
            .send(WorkItem::Record(event))
            .await
            .map_err(|_| PipelineError::WorkerStopped(self.index))
    }

    /// Inject a barrier and return the channel the snapshot arrives on.
    pub async fn barrier(
        &self,
    ) -> Result<oneshot::Receiver<Result<ShardSnapshot, StateError>>, PipelineError> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(WorkItem::Barrier { reply })
            .await
            .map_err(|_| PipelineError::WorkerStopped(self.index))?;
        Ok(receiver)
    }

    /// Close the channel and wait for the worker to drain and stop.
    pub async fn join(self) -> Result<(), PipelineError> {
        drop(self.sender);
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::WorkerStopped(self.index)),
        }
    }
}

async fn run_worker(
    index: usize,
    mut shard: StateShard,
    codec: Arc<RecordCodec>,
    sink: Arc<dyn RecordSink>,
    mut receiver: mpsc::Receiver<WorkItem>,
) -> Result<(), PipelineError> {
    let processor = TallyProcessor::new();

    while let Some(item) = receiver.recv().await {
        match item {
            WorkItem::Record(event) => {
                let state = shard.entry(&event.id);
                let outputs = processor.process(&event, state);
                metrics::counter!(EVENTS_PROCESSED_COUNTER).increment(1);

                // Delivery is awaited per record: when a barrier arrives,
                // everything this shard has counted is already on the wire.
                for output in outputs {
                    let payload = codec.encode(&output)?;
                    sink.deliver(&output.id, payload).await?;
                    metrics::counter!(RECORDS_EMITTED_COUNTER).increment(1);
                }
            }
            WorkItem::Barrier { reply } => {
                let snapshot = shard.snapshot().map(|bytes| ShardSnapshot {
                    index,
                    keys: shard.len(),
                    bytes,
                });
                // The barrier initiator may already have given up; that is
                // its problem, not the worker's.
                let _ = reply.send(snapshot);
            }
        }
    }

    debug!(worker = index, keys = shard.len(), "Worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordFormat;
    use crate::test_utils::CapturingSink;

    fn codec() -> Arc<RecordCodec> {
        Arc::new(RecordCodec::new(RecordFormat::Generic, true, 1).unwrap())
    }

    fn event(id: &str, version: i64) -> InputEvent {
        InputEvent {
            id: id.to_string(),
            version,
        }
    }

    #[tokio::test]
    async fn processes_records_in_submission_order() {
        let sink = Arc::new(CapturingSink::default());
        let worker = Worker::spawn(0, StateShard::new(), codec(), sink.clone(), 8);

        worker.submit(event("a", 1)).await.unwrap();
        worker.submit(event("b", 1)).await.unwrap();
        worker.submit(event("a", 2)).await.unwrap();
        worker.join().await.unwrap();

        let outputs = sink.outputs();
        assert_eq!(outputs.len(), 3);
        assert_eq!((outputs[0].id.as_str(), outputs[0].count), ("a", 1));
        assert_eq!((outputs[1].id.as_str(), outputs[1].count), ("b", 1));
        assert_eq!((outputs[2].id.as_str(), outputs[2].count), ("a", 2));
    }

    #[tokio::test]
    async fn barrier_snapshot_reflects_prior_records_only() {
        let sink = Arc::new(CapturingSink::default());
        let worker = Worker::spawn(0, StateShard::new(), codec(), sink, 8);

        worker.submit(event("a", 1)).await.unwrap();
        worker.submit(event("a", 2)).await.unwrap();
        let receiver = worker.barrier().await.unwrap();
        worker.submit(event("a", 3)).await.unwrap();

        let snapshot = receiver.await.unwrap().unwrap();
        let shard = StateShard::restore(&snapshot.bytes).unwrap();
        assert_eq!(shard.get("a").unwrap().count, 2);
        assert_eq!(snapshot.keys, 1);

        worker.join().await.unwrap();
    }

    #[tokio::test]
    async fn restored_shard_continues_counting() {
        let mut seeded = StateShard::new();
        seeded.entry("a").count = 41;

        let sink = Arc::new(CapturingSink::default());
        let worker = Worker::spawn(3, seeded, codec(), sink.clone(), 8);

        worker.submit(event("a", 9)).await.unwrap();
        worker.join().await.unwrap();

        assert_eq!(sink.outputs()[0].count, 42);
    }
}
