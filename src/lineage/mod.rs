pub mod facts;
pub mod sink;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::JobListener;
use crate::error::LineageError;
use crate::metrics_const::{LINEAGE_DROPPED_COUNTER, LINEAGE_EMITTED_COUNTER};
use facts::{JobRun, RunOutcome};
use sink::LineageSink;

/// Where the reporter is in its single-use lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Registered,
    Running,
    Succeeded,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Created => "Created",
            RunPhase::Registered => "Registered",
            RunPhase::Running => "Running",
            RunPhase::Succeeded => "Succeeded",
            RunPhase::Failed => "Failed",
        }
    }
}

/// Reports run lifecycle facts to a lineage sink.
///
/// Single-use: one reporter accompanies one run and reaches exactly one
/// terminal phase. Emission is best-effort with a hard timeout; a collector
/// that is down, slow or misconfigured costs lineage, never the run.
pub struct JobLifecycleReporter {
    phase: Mutex<RunPhase>,
    sink: Arc<dyn LineageSink>,
    emit_timeout: Duration,
}

impl JobLifecycleReporter {
    pub fn new(sink: Arc<dyn LineageSink>, emit_timeout: Duration) -> Self {
        Self {
            phase: Mutex::new(RunPhase::Created),
            sink,
            emit_timeout,
        }
    }

    /// Attach the reporter to a run. Must happen exactly once, before the
    /// job starts executing; a second registration is a wiring bug and
    /// fails pipeline assembly.
    pub fn register(&self) -> Result<(), LineageError> {
        let mut phase = self.lock_phase();
        if *phase != RunPhase::Created {
            return Err(LineageError::InvalidTransition {
                from: phase.as_str(),
                to: RunPhase::Registered.as_str(),
            });
        }
        *phase = RunPhase::Registered;
        Ok(())
    }

    pub fn phase(&self) -> RunPhase {
        *self.lock_phase()
    }

    /// Record the Running phase and emit the start fact.
    pub async fn job_started(&self, run: &JobRun) {
        {
            let mut phase = self.lock_phase();
            if *phase != RunPhase::Registered {
                warn!(
                    phase = phase.as_str(),
                    "ignoring start report for a reporter that is not registered"
                );
                return;
            }
            *phase = RunPhase::Running;
        }
        self.emit(run).await;
    }

    /// Record the terminal phase and emit the final fact. At most one
    /// terminal report ever reaches the sink, whatever the caller does.
    pub async fn job_finished(&self, run: &JobRun) {
        let to = match run.outcome {
            RunOutcome::Succeeded => RunPhase::Succeeded,
            RunOutcome::Failed => RunPhase::Failed,
            RunOutcome::Running => {
                warn!("ignoring finish report with a non-terminal outcome");
                return;
            }
        };

        if let Err(e) = self.terminal_transition(to) {
            warn!(outcome = ?run.outcome, "ignoring finish report: {e}");
            return;
        }
        self.emit(run).await;
    }

    fn terminal_transition(&self, to: RunPhase) -> Result<(), LineageError> {
        let mut phase = self.lock_phase();
        if phase.is_terminal() {
            return Err(LineageError::AlreadyTerminal);
        }
        // A run that dies during startup may go Registered -> Failed without
        // ever running; Succeeded always requires Running first.
        let allowed = *phase == RunPhase::Running
            || (*phase == RunPhase::Registered && to == RunPhase::Failed);
        if !allowed {
            return Err(LineageError::InvalidTransition {
                from: phase.as_str(),
                to: to.as_str(),
            });
        }
        *phase = to;
        Ok(())
    }

    /// Emit through the sink, bounded by the configured timeout. Failures
    /// are logged, counted and dropped.
    async fn emit(&self, run: &JobRun) {
        match tokio::time::timeout(self.emit_timeout, self.sink.emit(run)).await {
            Ok(Ok(())) => {
                metrics::counter!(LINEAGE_EMITTED_COUNTER).increment(1);
                debug!(run_id = %run.run_id, outcome = ?run.outcome, "emitted lineage fact");
            }
            Ok(Err(e)) => {
                metrics::counter!(LINEAGE_DROPPED_COUNTER).increment(1);
                warn!(run_id = %run.run_id, "failed to emit lineage fact: {e}");
            }
            Err(_) => {
                metrics::counter!(LINEAGE_DROPPED_COUNTER).increment(1);
                warn!(
                    run_id = %run.run_id,
                    timeout = ?self.emit_timeout,
                    "lineage emission timed out"
                );
            }
        }
    }

    fn lock_phase(&self) -> MutexGuard<'_, RunPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobListener for JobLifecycleReporter {
    async fn on_job_started(&self, run: &JobRun) {
        self.job_started(run).await;
    }

    async fn on_job_finished(&self, run: &JobRun) {
        self.job_finished(run).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::facts::Dataset;
    use crate::test_utils::{FailingLineageSink, RecordingLineageSink};

    fn test_run(outcome: RunOutcome) -> JobRun {
        let mut run = JobRun::new(
            "default".to_string(),
            "kafka-tally".to_string(),
            vec![Dataset::kafka("localhost:9092", "in")],
            vec![Dataset::kafka("localhost:9092", "out")],
        );
        run.outcome = outcome;
        run
    }

    fn reporter_with(sink: Arc<dyn LineageSink>) -> JobLifecycleReporter {
        JobLifecycleReporter::new(sink, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn walks_the_full_lifecycle() {
        let sink = Arc::new(RecordingLineageSink::default());
        let reporter = reporter_with(sink.clone());

        assert_eq!(reporter.phase(), RunPhase::Created);
        reporter.register().unwrap();
        assert_eq!(reporter.phase(), RunPhase::Registered);

        reporter.job_started(&test_run(RunOutcome::Running)).await;
        assert_eq!(reporter.phase(), RunPhase::Running);

        reporter.job_finished(&test_run(RunOutcome::Succeeded)).await;
        assert_eq!(reporter.phase(), RunPhase::Succeeded);

        let facts = sink.facts.lock().unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].outcome, RunOutcome::Running);
        assert_eq!(facts[1].outcome, RunOutcome::Succeeded);
    }

    #[tokio::test]
    async fn second_registration_is_rejected() {
        let reporter = reporter_with(Arc::new(RecordingLineageSink::default()));

        reporter.register().unwrap();
        let err = reporter.register().unwrap_err();

        assert!(matches!(err, LineageError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn second_terminal_report_never_reaches_the_sink() {
        let sink = Arc::new(RecordingLineageSink::default());
        let reporter = reporter_with(sink.clone());
        reporter.register().unwrap();
        reporter.job_started(&test_run(RunOutcome::Running)).await;

        reporter.job_finished(&test_run(RunOutcome::Succeeded)).await;
        reporter.job_finished(&test_run(RunOutcome::Failed)).await;

        assert_eq!(reporter.phase(), RunPhase::Succeeded);
        let terminal = sink
            .facts
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.outcome.is_terminal())
            .count();
        assert_eq!(terminal, 1);
    }

    #[tokio::test]
    async fn start_before_registration_is_ignored() {
        let sink = Arc::new(RecordingLineageSink::default());
        let reporter = reporter_with(sink.clone());

        reporter.job_started(&test_run(RunOutcome::Running)).await;

        assert_eq!(reporter.phase(), RunPhase::Created);
        assert!(sink.facts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn startup_failure_may_skip_running() {
        let sink = Arc::new(RecordingLineageSink::default());
        let reporter = reporter_with(sink.clone());
        reporter.register().unwrap();

        reporter.job_finished(&test_run(RunOutcome::Failed)).await;

        assert_eq!(reporter.phase(), RunPhase::Failed);
        assert_eq!(sink.facts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_without_running_is_rejected() {
        let sink = Arc::new(RecordingLineageSink::default());
        let reporter = reporter_with(sink.clone());
        reporter.register().unwrap();

        reporter.job_finished(&test_run(RunOutcome::Succeeded)).await;

        assert_eq!(reporter.phase(), RunPhase::Registered);
        assert!(sink.facts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_sink_still_reaches_terminal_phase() {
        let reporter = reporter_with(Arc::new(FailingLineageSink));
        reporter.register().unwrap();

        reporter.job_started(&test_run(RunOutcome::Running)).await;
        reporter.job_finished(&test_run(RunOutcome::Succeeded)).await;

        assert_eq!(reporter.phase(), RunPhase::Succeeded);
    }

    #[tokio::test]
    async fn slow_sink_is_bounded_by_the_timeout() {
        struct SlowSink;

        #[async_trait]
        impl LineageSink for SlowSink {
            async fn emit(&self, _run: &JobRun) -> Result<(), LineageError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }

        let reporter = JobLifecycleReporter::new(Arc::new(SlowSink), Duration::from_millis(50));
        reporter.register().unwrap();

        let started = std::time::Instant::now();
        reporter.job_started(&test_run(RunOutcome::Running)).await;
        reporter.job_finished(&test_run(RunOutcome::Succeeded)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(reporter.phase(), RunPhase::Succeeded);
    }
}
