use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::checkpoint::store::CheckpointStore;
use crate::config::Config;
use crate::context::JobContext;
use crate::kafka::sink::{create_producer, KafkaRecordSink, RecordSink};
use crate::kafka::source::KafkaEventSource;
use crate::lineage::facts::{Dataset, RunOutcome};
use crate::lineage::sink::{HttpLineageSink, LineageSink, LogLineageSink};
use crate::lineage::JobLifecycleReporter;
use crate::pipeline::{stage_uids, Pipeline};

/// The main kafka-tally service that wires configuration, checkpoint
/// restore, pipeline assembly and the lineage lifecycle together.
pub struct TallyService {
    config: Config,
    output_topic: String,
    context: JobContext,
    pipeline: Option<Pipeline>,
    source: Option<KafkaEventSource>,
}

impl TallyService {
    /// Create a new service from configuration, connecting the output
    /// producer and choosing the lineage sink from the environment.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().with_context(|| {
            format!(
                "Configuration validation failed for input topic '{}' and group '{}'",
                config.input_topic, config.kafka_consumer_group
            )
        })?;

        let lineage_sink: Arc<dyn LineageSink> = match &config.lineage_url {
            Some(url) => Arc::new(
                HttpLineageSink::new(url.clone(), config.lineage_timeout())
                    .context("Failed to build lineage HTTP client")?,
            ),
            None => Arc::new(LogLineageSink),
        };

        let producer = create_producer(&config)
            .await
            .context("Failed to create Kafka producer. Check your Kafka connection.")?;
        let record_sink = Arc::new(KafkaRecordSink::new(
            producer,
            config.output_topic()?.to_string(),
            config.producer_send_timeout(),
        ));

        Self::with_sinks(config, record_sink, lineage_sink).await
    }

    /// Create a service with custom record and lineage sinks (useful for
    /// testing without a broker or collector).
    pub async fn with_sinks(
        config: Config,
        record_sink: Arc<dyn RecordSink>,
        lineage_sink: Arc<dyn LineageSink>,
    ) -> Result<Self> {
        config
            .validate()
            .context("Configuration validation failed for service with custom sinks")?;
        let output_topic = config.output_topic()?.to_string();

        // The reporter attaches before the pipeline is assembled, so a run
        // that dies during startup can still report Failed.
        let reporter = JobLifecycleReporter::new(lineage_sink, config.lineage_timeout());
        reporter
            .register()
            .context("Failed to register lifecycle reporter")?;

        let mut context = JobContext::new(
            config.job_name.clone(),
            config.lineage_namespace.clone(),
            vec![Dataset::kafka(&config.kafka_hosts, &config.input_topic)],
            vec![Dataset::kafka(&config.kafka_hosts, &output_topic)],
        );
        context.add_listener(Box::new(reporter));

        let store = CheckpointStore::new(config.checkpoint_dir_buf(), config.max_local_checkpoints);
        let assembled: Result<Pipeline> = match store.load_latest(&stage_uids()).await {
            Ok(restored) => {
                Pipeline::assemble(&config, record_sink, store, restored).map_err(Into::into)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to load latest checkpoint")),
        };

        let pipeline = match assembled {
            Ok(pipeline) => pipeline,
            Err(e) => {
                // The reporter is already attached, so a run that dies here
                // still surfaces as a Failed fact before the error does.
                context.fire_finished(RunOutcome::Failed).await;
                return Err(e);
            }
        };

        Ok(Self {
            config,
            output_topic,
            context,
            pipeline: Some(pipeline),
            source: None,
        })
    }

    /// Connect the input consumer, starting each partition at its restored
    /// checkpoint position where one exists.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.source.is_some() {
            return Err(anyhow!("Service already initialized"));
        }
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| anyhow!("Pipeline not assembled"))?;

        let source = KafkaEventSource::connect(&self.config, pipeline.start_positions())
            .await
            .with_context(|| {
                format!(
                    "Failed to create consumer for topic '{}' with group '{}'",
                    self.config.input_topic, self.config.kafka_consumer_group
                )
            })?;

        info!(
            "Initialized consumer for topic '{}', publishing to '{}'",
            self.config.input_topic, self.output_topic
        );
        self.source = Some(source);
        Ok(())
    }

    /// Run the service (blocking until ctrl-c or a fatal error).
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl+c signal");
        })
        .await
    }

    /// Run the service with a custom shutdown signal (useful for testing).
    ///
    /// Whatever happens to the pipeline, the lifecycle reporter observes the
    /// terminal outcome before this returns.
    pub async fn run_with_shutdown(
        mut self,
        shutdown_signal: impl std::future::Future<Output = ()>,
    ) -> Result<()> {
        let run_result = self.drive(shutdown_signal).await;

        let outcome = if run_result.is_ok() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };
        self.context.fire_finished(outcome).await;

        info!("kafka-tally service stopped");
        run_result
    }

    /// Initialize and run the pipeline. Kept separate from
    /// [`Self::run_with_shutdown`] so every early return, including a
    /// consumer that never connects, still passes through the terminal
    /// lifecycle report.
    async fn drive(&mut self, shutdown_signal: impl std::future::Future<Output = ()>) -> Result<()> {
        if self.source.is_none() {
            self.initialize().await?;
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow!("Source not initialized"))?;
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| anyhow!("Pipeline not assembled"))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        info!("Starting kafka-tally service");
        self.context.fire_started().await;

        let mut pipeline_handle = tokio::spawn(pipeline.run(source, shutdown_rx));

        tokio::select! {
            joined = &mut pipeline_handle => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("Pipeline stopped with error: {e:#}");
                    Err(e.into())
                }
                Err(e) => Err(anyhow!("Pipeline task panicked: {e:#}")),
            },
            _ = shutdown_signal => {
                info!("Received shutdown signal, shutting down gracefully...");
                let _ = shutdown_tx.send(());

                match tokio::time::timeout(self.config.shutdown_timeout(), &mut pipeline_handle).await {
                    Ok(Ok(Ok(()))) => {
                        info!("Pipeline stopped normally");
                        Ok(())
                    }
                    Ok(Ok(Err(e))) => {
                        error!("Pipeline stopped with error: {e:#}");
                        Err(e.into())
                    }
                    Ok(Err(e)) => Err(anyhow!("Pipeline task panicked: {e:#}")),
                    Err(_) => Err(anyhow!(
                        "Pipeline shutdown timed out after {:?}",
                        self.config.shutdown_timeout()
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::checkpoint::manifest::CheckpointManifest;
    use crate::state::{ShardSnapshot, StateShard};
    use crate::test_utils::{test_config, CapturingSink, RecordingLineageSink};
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_output_topic_fails_before_any_sink_is_touched() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.output_topic = None;

        let result = TallyService::with_sinks(
            config,
            Arc::new(CapturingSink::default()),
            Arc::new(RecordingLineageSink::default()),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn constructs_with_custom_sinks_and_no_broker() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let service = TallyService::with_sinks(
            config,
            Arc::new(CapturingSink::default()),
            Arc::new(RecordingLineageSink::default()),
        )
        .await
        .unwrap();

        assert!(service.pipeline.is_some());
        assert!(service.source.is_none());
    }

    #[tokio::test]
    async fn consumer_that_never_connects_still_reports_failed() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        // Nothing listens here; initialize() fails before the run starts.
        config.kafka_hosts = "127.0.0.1:1".to_string();

        let lineage = Arc::new(RecordingLineageSink::default());
        let service = TallyService::with_sinks(
            config,
            Arc::new(CapturingSink::default()),
            lineage.clone(),
        )
        .await
        .unwrap();

        let result = service.run_with_shutdown(std::future::pending()).await;
        assert!(result.is_err());

        let facts = lineage.facts.lock().unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].outcome, RunOutcome::Failed);
        assert!(facts[0].ended_at.is_some());
    }

    #[tokio::test]
    async fn incompatible_checkpoint_reports_failed_during_construction() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        // A checkpoint written by a pipeline with a different stage layout.
        let store = CheckpointStore::new(config.checkpoint_dir_buf(), 5);
        let foreign = CheckpointManifest::new(
            1,
            "some-other-job".to_string(),
            vec!["kafka-source".to_string(), "dedup".to_string()],
            config.input_topic.clone(),
            HashMap::new(),
        );
        let snapshot = ShardSnapshot {
            index: 0,
            keys: 0,
            bytes: StateShard::new().snapshot().unwrap(),
        };
        store.persist(foreign, &[snapshot]).await.unwrap();

        let lineage = Arc::new(RecordingLineageSink::default());
        let result = TallyService::with_sinks(
            config,
            Arc::new(CapturingSink::default()),
            lineage.clone(),
        )
        .await;
        assert!(result.is_err());

        let facts = lineage.facts.lock().unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].outcome, RunOutcome::Failed);
    }
}
