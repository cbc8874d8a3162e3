use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::lineage::facts::{Dataset, JobRun, RunOutcome};

/// Anything that wants to observe the run lifecycle.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_job_started(&self, run: &JobRun);
    async fn on_job_finished(&self, run: &JobRun);
}

/// Explicit execution context for one job run.
///
/// Owns the run identity, the dataset identities and the registered
/// listeners. The service fires lifecycle events through it; nothing in
/// the process reaches for a global registry.
pub struct JobContext {
    run: JobRun,
    listeners: Vec<Box<dyn JobListener>>,
}

impl JobContext {
    pub fn new(
        job_name: impl Into<String>,
        job_namespace: impl Into<String>,
        inputs: Vec<Dataset>,
        outputs: Vec<Dataset>,
    ) -> Self {
        Self {
            run: JobRun::new(job_namespace.into(), job_name.into(), inputs, outputs),
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn JobListener>) {
        self.listeners.push(listener);
    }

    pub fn job_name(&self) -> &str {
        &self.run.job_name
    }

    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    pub fn run(&self) -> &JobRun {
        &self.run
    }

    /// Stamp the start of execution and notify listeners.
    pub async fn fire_started(&mut self) {
        self.run.started_at = Utc::now();
        self.run.outcome = RunOutcome::Running;
        for listener in &self.listeners {
            listener.on_job_started(&self.run).await;
        }
    }

    /// Stamp the terminal outcome and notify listeners.
    pub async fn fire_finished(&mut self, outcome: RunOutcome) {
        self.run.ended_at = Some(Utc::now());
        self.run.outcome = outcome;
        for listener in &self.listeners {
            listener.on_job_finished(&self.run).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingListener;

    fn context() -> JobContext {
        JobContext::new(
            "kafka-tally",
            "default",
            vec![Dataset::kafka("localhost:9092", "events-input")],
            vec![Dataset::kafka("localhost:9092", "events-output")],
        )
    }

    #[tokio::test]
    async fn notifies_every_listener_in_order() {
        let first = RecordingListener::default();
        let second = RecordingListener::default();

        let mut context = context();
        context.add_listener(Box::new(first.clone()));
        context.add_listener(Box::new(second.clone()));

        context.fire_started().await;
        context.fire_finished(RunOutcome::Succeeded).await;

        for listener in [first, second] {
            let seen = listener.seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0].outcome, RunOutcome::Running);
            assert_eq!(seen[1].outcome, RunOutcome::Succeeded);
        }
    }

    #[tokio::test]
    async fn terminal_outcome_carries_an_end_timestamp() {
        let listener = RecordingListener::default();
        let mut context = context();
        context.add_listener(Box::new(listener.clone()));

        context.fire_started().await;
        context.fire_finished(RunOutcome::Failed).await;

        let seen = listener.seen.lock().unwrap();
        assert!(seen[0].ended_at.is_none());
        assert!(seen[1].ended_at.is_some());
        assert!(seen[1].ended_at.unwrap() >= seen[1].started_at);
    }

    #[tokio::test]
    async fn firing_with_no_listeners_is_a_no_op() {
        let mut context = context();

        context.fire_started().await;
        context.fire_finished(RunOutcome::Succeeded).await;

        assert_eq!(context.run().outcome, RunOutcome::Succeeded);
    }

    #[test]
    fn datasets_come_from_configuration_not_records() {
        let context = context();

        assert_eq!(context.run().inputs[0].name, "events-input");
        assert_eq!(context.run().outputs[0].name, "events-output");
        assert_eq!(context.job_name(), "kafka-tally");
    }
}
