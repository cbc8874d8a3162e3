use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a dataset the run reads or writes.
///
/// Kafka datasets are named by broker list and topic, never by anything
/// found inside the records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub namespace: String,
    pub name: String,
}

impl Dataset {
    /// Dataset identity for a Kafka topic: `kafka://<brokers>/<topic>`.
    pub fn kafka(brokers: &str, topic: &str) -> Self {
        Self {
            namespace: format!("kafka://{brokers}"),
            name: topic.to_string(),
        }
    }

    pub fn uri(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Failed,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunOutcome::Succeeded | RunOutcome::Failed)
    }
}

/// The lineage fact describing one run of the job. Emitted once when the
/// run starts and once more with the terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub job_namespace: String,
    pub job_name: String,
    pub inputs: Vec<Dataset>,
    pub outputs: Vec<Dataset>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
}

impl JobRun {
    pub fn new(
        job_namespace: String,
        job_name: String,
        inputs: Vec<Dataset>,
        outputs: Vec<Dataset>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_namespace,
            job_name,
            inputs,
            outputs,
            started_at: Utc::now(),
            ended_at: None,
            outcome: RunOutcome::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_dataset_identity_is_brokers_plus_topic() {
        let dataset = Dataset::kafka("broker-1:9092,broker-2:9092", "events-output");

        assert_eq!(dataset.namespace, "kafka://broker-1:9092,broker-2:9092");
        assert_eq!(dataset.name, "events-output");
        assert_eq!(
            dataset.uri(),
            "kafka://broker-1:9092,broker-2:9092/events-output"
        );
    }

    #[test]
    fn outcomes_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&RunOutcome::Succeeded).unwrap(),
            "\"SUCCEEDED\""
        );
        assert_eq!(
            serde_json::to_string(&RunOutcome::Running).unwrap(),
            "\"RUNNING\""
        );
    }

    #[test]
    fn only_succeeded_and_failed_are_terminal() {
        assert!(!RunOutcome::Running.is_terminal());
        assert!(RunOutcome::Succeeded.is_terminal());
        assert!(RunOutcome::Failed.is_terminal());
    }

    #[test]
    fn fresh_runs_start_without_an_end_timestamp() {
        let run = JobRun::new(
            "default".to_string(),
            "kafka-tally".to_string(),
            vec![Dataset::kafka("localhost:9092", "in")],
            vec![Dataset::kafka("localhost:9092", "out")],
        );

        assert!(run.ended_at.is_none());
        assert_eq!(run.outcome, RunOutcome::Running);
        assert_eq!(run.inputs.len(), 1);
        assert_eq!(run.outputs.len(), 1);
    }
}
