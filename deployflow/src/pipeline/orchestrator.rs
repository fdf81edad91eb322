//! Drives a pipeline definition through its stages, in order.

use super::{
    ActionRecord, ArtifactStore, PipelineDefinition, PipelineResult, StageExecutor, StageRecord,
    StageSpec,
};
use crate::cancellation::CancellationToken;
use crate::core::{event, Artifact, PipelineStatus, StageStatus};
use crate::errors::{
    DependencyUnmetError, DeployflowError, PipelineValidationError, StageActionFailedError,
};
use crate::events::{EventSink, NoOpEventSink};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Runs validated pipeline definitions.
///
/// Stages execute strictly one after another. The first stage that does not
/// succeed halts the run; later stages are reported as `Pending`. There is
/// no retry at this level.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    sink: Arc<dyn EventSink>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator").finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator that discards events.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Runs a pipeline that needs no seed artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run cannot start; action failures are
    /// reported through the returned [`PipelineResult`].
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
    ) -> Result<PipelineResult, DeployflowError> {
        self.run_seeded(definition, std::iter::empty::<(String, Artifact)>())
            .await
    }

    /// Runs a pipeline with its seed artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if a seed is undeclared, or if a declared seed that
    /// some action consumes is missing.
    pub async fn run_seeded<I, S>(
        &self,
        definition: &PipelineDefinition,
        seeds: I,
    ) -> Result<PipelineResult, DeployflowError>
    where
        I: IntoIterator<Item = (S, Artifact)>,
        S: Into<String>,
    {
        self.run_with_cancellation(definition, seeds, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs a pipeline that can be cancelled through `cancel`.
    ///
    /// Cancelling aborts the actions of the current stage, marks that stage
    /// failed and the run [`PipelineStatus::Cancelled`].
    ///
    /// # Errors
    ///
    /// Same as [`run_seeded`](Self::run_seeded).
    #[instrument(skip_all, fields(pipeline = %definition.name(), run_id = tracing::field::Empty))]
    pub async fn run_with_cancellation<I, S>(
        &self,
        definition: &PipelineDefinition,
        seeds: I,
        cancel: Arc<CancellationToken>,
    ) -> Result<PipelineResult, DeployflowError>
    where
        I: IntoIterator<Item = (S, Artifact)>,
        S: Into<String>,
    {
        let store = seed_store(definition, seeds)?;
        let run_id = Uuid::now_v7();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let started_at = Utc::now();
        let start = Instant::now();
        info!(stages = definition.stage_count(), "Pipeline started");
        self.sink.try_emit(
            event::PIPELINE_STARTED,
            Some(serde_json::json!({
                "pipeline": definition.name(),
                "run_id": run_id.to_string(),
                "stages": definition.stage_names(),
            })),
        );

        let executor =
            StageExecutor::new(definition.name(), run_id, self.sink.clone(), cancel.clone());
        let mut status = PipelineStatus::Succeeded;
        let mut failure = None;
        let mut stages = Vec::with_capacity(definition.stage_count());

        for (ordinal, spec) in definition.stages().iter().enumerate() {
            if status != PipelineStatus::Succeeded {
                stages.push(not_started(spec, ordinal));
                continue;
            }
            if cancel.is_cancelled() {
                warn!(stage = %spec.name, "Run cancelled before stage started");
                status = PipelineStatus::Cancelled;
                stages.push(not_started(spec, ordinal));
                continue;
            }

            let record = executor.execute(spec, ordinal, &store).await;
            if record.status != StageStatus::Succeeded {
                status = if cancel.is_cancelled() {
                    PipelineStatus::Cancelled
                } else {
                    PipelineStatus::Failed
                };
                failure = record.failing_action().map(|action| {
                    StageActionFailedError::new(
                        &record.name,
                        &action.name,
                        action.error.clone().unwrap_or_default(),
                    )
                });
                if let Some(failure) = &failure {
                    error!(%failure, "Pipeline halted");
                }
            }
            stages.push(record);
        }

        let endpoint = stages
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| a.endpoint.clone())
            .last();
        let result = PipelineResult {
            pipeline: definition.name().to_string(),
            run_id,
            status,
            stages,
            failure,
            endpoint,
            artifacts: store.snapshot(),
            started_at,
            finished_at: Utc::now(),
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        if result.is_success() {
            info!(duration_ms, endpoint = ?result.endpoint, "Pipeline succeeded");
        } else {
            warn!(duration_ms, %status, failed_stage = ?result.failed_stage(), "Pipeline did not succeed");
        }
        self.sink.try_emit(
            event::PIPELINE_COMPLETED,
            Some(serde_json::json!({
                "pipeline": &result.pipeline,
                "run_id": run_id.to_string(),
                "status": status.to_string(),
                "failed_stage": result.failed_stage(),
                "duration_ms": duration_ms,
            })),
        );
        Ok(result)
    }
}

fn seed_store<I, S>(
    definition: &PipelineDefinition,
    seeds: I,
) -> Result<ArtifactStore, DeployflowError>
where
    I: IntoIterator<Item = (S, Artifact)>,
    S: Into<String>,
{
    let store = ArtifactStore::new();
    for (slot, artifact) in seeds {
        let slot = slot.into();
        if !definition.seed_slots().contains(&slot) {
            return Err(PipelineValidationError::new(format!(
                "Seed artifact '{slot}' is not declared by pipeline '{}'",
                definition.name()
            ))
            .into());
        }
        store.put(&slot, artifact)?;
    }

    for slot in definition.seed_slots() {
        if store.contains(slot) {
            continue;
        }
        let consumer = definition.stages().iter().find_map(|stage| {
            stage
                .actions
                .iter()
                .find(|a| a.input.as_ref() == Some(slot))
                .map(|a| (stage, a))
        });
        if let Some((stage, action)) = consumer {
            return Err(DependencyUnmetError::new(&stage.name, &action.name, slot).into());
        }
    }
    Ok(store)
}

fn not_started(spec: &StageSpec, ordinal: usize) -> StageRecord {
    StageRecord {
        name: spec.name.clone(),
        ordinal,
        status: StageStatus::Pending,
        actions: spec
            .actions
            .iter()
            .map(|a| ActionRecord::pending(&a.name, a.runner.kind(), a.input.clone(), a.output.clone()))
            .collect(),
        started_at: None,
        finished_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionContext, ActionOutput, FnAction};
    use crate::core::ActionStatus;
    use crate::events::CollectingEventSink;
    use crate::pipeline::{ActionSpec, PipelineBuilder};
    use crate::testing::{ExecutionLog, RecordingAction};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn recording(name: &str, log: &ExecutionLog) -> RecordingAction {
        RecordingAction::new(name, log).with_delay(Duration::from_millis(5))
    }

    fn release(log: &ExecutionLog, build: RecordingAction) -> PipelineDefinition {
        PipelineBuilder::new("python-webApp")
            .stage(StageSpec::new("Source").action(
                ActionSpec::new("GithubSource", Arc::new(recording("GithubSource", log).producing(b"tree")))
                    .produces("source_output"),
            ))
            .stage(
                StageSpec::new("Build").action(
                    ActionSpec::new("TestPython", Arc::new(build))
                        .consumes("source_output")
                        .produces("build_output"),
                ),
            )
            .stage(StageSpec::new("Deploy").action(
                ActionSpec::new("PythonAppDeployment", Arc::new(recording("PythonAppDeployment", log)))
                    .consumes("build_output"),
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = ExecutionLog::new();
        let sink = Arc::new(CollectingEventSink::new());
        let definition = release(&log, recording("TestPython", &log).producing(b"built"));

        let result = PipelineOrchestrator::new()
            .with_event_sink(sink.clone())
            .run(&definition)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(
            log.entries(),
            vec![
                "start:GithubSource",
                "end:GithubSource",
                "start:TestPython",
                "end:TestPython",
                "start:PythonAppDeployment",
                "end:PythonAppDeployment",
            ]
        );
        let started: Vec<_> = sink
            .events_of_type(event::STAGE_STARTED)
            .into_iter()
            .map(|(_, data)| data.unwrap()["stage"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(started, vec!["Source", "Build", "Deploy"]);
        assert_eq!(
            result.artifacts.keys().collect::<Vec<_>>(),
            vec!["build_output", "source_output"]
        );
        assert_eq!(sink.event_types().first().unwrap(), event::PIPELINE_STARTED);
        assert_eq!(sink.event_types().last().unwrap(), event::PIPELINE_COMPLETED);
    }

    #[tokio::test]
    async fn test_build_failure_halts_pipeline() {
        let log = ExecutionLog::new();
        let definition = release(&log, recording("TestPython", &log).failing("3 tests failed"));

        let result = PipelineOrchestrator::new().run(&definition).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.failed_stage(), Some("Build"));
        let failure = result.failure.clone().unwrap();
        assert_eq!(failure.action, "TestPython");
        assert_eq!(failure.message, "3 tests failed");

        let deploy = result.stage("Deploy").unwrap();
        assert_eq!(deploy.status, StageStatus::Pending);
        assert_eq!(deploy.actions[0].status, ActionStatus::Pending);
        assert!(!log.entries().iter().any(|e| e.contains("PythonAppDeployment")));
        assert!(matches!(
            result.into_result(),
            Err(DeployflowError::StageActionFailed(ref e)) if e.stage == "Build"
        ));
    }

    #[tokio::test]
    async fn test_seeded_run() {
        let definition = PipelineBuilder::new("rebuild")
            .seed_artifact("source_output")
            .stage(StageSpec::new("Build").action(
                ActionSpec::new(
                    "Package",
                    Arc::new(FnAction::new(|ctx: &ActionContext| match ctx.input() {
                        Some(input) => ActionOutput::produced(Artifact::from_content(
                            input.source_revision(),
                            b"packaged",
                        )),
                        None => ActionOutput::failed("no input"),
                    })),
                )
                .consumes("source_output")
                .produces("build_output"),
            ))
            .build()
            .unwrap();

        let seed = Artifact::from_content("main@7", b"tree");
        let seed_id = seed.id().clone();
        let result = PipelineOrchestrator::new()
            .run_seeded(&definition, [("source_output", seed)])
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.artifacts["source_output"], seed_id);
        assert!(result.artifacts.contains_key("build_output"));
    }

    #[tokio::test]
    async fn test_missing_seed_is_dependency_unmet() {
        let definition = PipelineBuilder::new("rebuild")
            .seed_artifact("source_output")
            .stage(StageSpec::new("Build").action(
                ActionSpec::new("Package", Arc::new(crate::actions::NoOpAction)).consumes("source_output"),
            ))
            .build()
            .unwrap();

        let err = PipelineOrchestrator::new().run(&definition).await.unwrap_err();
        assert!(matches!(err, DeployflowError::DependencyUnmet(ref e) if e.action == "Package"));
    }

    #[tokio::test]
    async fn test_undeclared_seed_rejected() {
        let log = ExecutionLog::new();
        let definition = release(&log, recording("TestPython", &log).producing(b"built"));

        let err = PipelineOrchestrator::new()
            .run_seeded(&definition, [("extra", Artifact::from_content("r", b"x"))])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployflowError::Validation(_)));
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_mid_stage() {
        let log = ExecutionLog::new();
        let definition = release(
            &log,
            RecordingAction::new("TestPython", &log)
                .with_delay(Duration::from_secs(30))
                .producing(b"built"),
        );
        let cancel = Arc::new(CancellationToken::new());
        let orchestrator = PipelineOrchestrator::new();

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel("release withdrawn");
            })
        };
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run_with_cancellation(
                &definition,
                std::iter::empty::<(String, Artifact)>(),
                cancel,
            ),
        )
        .await
        .unwrap()
        .unwrap();
        trigger.await.unwrap();

        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert_eq!(result.stage("Source").unwrap().status, StageStatus::Succeeded);
        let build = result.stage("Build").unwrap();
        assert_eq!(build.status, StageStatus::Failed);
        assert_eq!(build.actions[0].status, ActionStatus::Aborted);
        assert_eq!(result.stage("Deploy").unwrap().status, StageStatus::Pending);
        assert!(matches!(
            result.into_result(),
            Err(DeployflowError::Cancelled(ref reason)) if reason == "release withdrawn"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let log = ExecutionLog::new();
        let definition = release(&log, recording("TestPython", &log).producing(b"built"));
        let cancel = Arc::new(CancellationToken::new());
        cancel.cancel("frozen");

        let result = PipelineOrchestrator::new()
            .run_with_cancellation(&definition, std::iter::empty::<(String, Artifact)>(), cancel)
            .await
            .unwrap();

        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert!(result.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_taken_from_actions() {
        let definition = PipelineBuilder::new("p")
            .stage(StageSpec::new("Deploy").action(ActionSpec::new(
                "Ship",
                Arc::new(FnAction::new(|_: &ActionContext| ActionOutput::succeeded().with_endpoint("203.0.113.10"))),
            )))
            .build()
            .unwrap();

        let result = PipelineOrchestrator::new().run(&definition).await.unwrap();
        assert_eq!(result.endpoint.as_deref(), Some("203.0.113.10"));
    }
}
