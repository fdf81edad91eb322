//! Runs the actions of one stage to completion.
//!
//! Every action of a stage is spawned as its own task. The executor always
//! joins all of them before returning, so the next stage can never observe a
//! half-finished predecessor.

use super::{ActionRecord, ActionSpec, ArtifactStore, StageRecord, StageSpec};
use crate::actions::ActionContext;
use crate::cancellation::CancellationToken;
use crate::core::{event, ActionStatus, Artifact, StageStatus};
use crate::errors::DependencyUnmetError;
use crate::events::EventSink;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executes stages for one pipeline run.
#[derive(Clone)]
pub struct StageExecutor {
    pipeline: String,
    run_id: Uuid,
    sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("pipeline", &self.pipeline)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor bound to one run.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        run_id: Uuid,
        sink: Arc<dyn EventSink>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            sink,
            cancel,
        }
    }

    /// Runs every action of `stage` concurrently and waits for all of them.
    ///
    /// Artifacts produced by successful actions are registered in `store`.
    pub async fn execute(
        &self,
        stage: &StageSpec,
        ordinal: usize,
        store: &ArtifactStore,
    ) -> StageRecord {
        let started_at = Utc::now();
        info!(stage = %stage.name, ordinal, actions = stage.actions.len(), "Stage started");
        // Running is only observable here; records are built once the stage ends.
        let mut started = event::stage_payload(&self.pipeline, &stage.name, ordinal);
        started["status"] = serde_json::json!(StageStatus::Running.to_string());
        self.sink.try_emit(event::STAGE_STARTED, Some(started));

        let mut records: Vec<ActionRecord> = stage
            .actions
            .iter()
            .map(|spec| {
                ActionRecord::pending(
                    &spec.name,
                    spec.runner.kind(),
                    spec.input.clone(),
                    spec.output.clone(),
                )
            })
            .collect();
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks = FuturesUnordered::new();

        for (index, spec) in stage.actions.iter().enumerate() {
            let input = match &spec.input {
                Some(slot) => {
                    if let Some(artifact) = store.get(slot) {
                        Some(artifact)
                    } else {
                        let err = DependencyUnmetError::new(&stage.name, &spec.name, slot);
                        error!(error = %err, "Input artifact missing at dispatch");
                        records[index].status = ActionStatus::Failed;
                        records[index].error = Some(err.to_string());
                        halted.store(true, Ordering::SeqCst);
                        continue;
                    }
                }
                None => None,
            };

            let run = ActionRun {
                spec: spec.clone(),
                ctx: ActionContext::new(
                    &self.pipeline,
                    self.run_id,
                    &stage.name,
                    &spec.name,
                    input,
                    self.cancel.clone(),
                ),
                halted: halted.clone(),
                sink: self.sink.clone(),
            };
            let handle = tokio::spawn(run.execute());
            tasks.push(async move { (index, handle.await) });
        }

        while let Some((index, joined)) = tasks.next().await {
            match joined {
                Ok(ActionOutcome { record, artifact }) => {
                    records[index] = record;
                    if let (Some(slot), Some(artifact)) = (records[index].output.clone(), artifact)
                    {
                        match store.put(&slot, artifact) {
                            Ok(stored) => records[index].artifact_id = Some(stored.id().clone()),
                            Err(e) => {
                                error!(action = %records[index].name, error = %e, "Artifact rejected");
                                records[index].status = ActionStatus::Failed;
                                records[index].error = Some(e.to_string());
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(action = %records[index].name, error = %e, "Action task did not complete");
                    records[index].status = ActionStatus::Failed;
                    records[index].error = Some(format!("action task did not complete: {e}"));
                }
            }
        }

        let status = if records.iter().all(ActionRecord::is_success) {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        let record = StageRecord {
            name: stage.name.clone(),
            ordinal,
            status,
            actions: records,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        };

        let mut payload = event::stage_payload(&self.pipeline, &stage.name, ordinal);
        payload["status"] = serde_json::json!(status.to_string());
        if status == StageStatus::Succeeded {
            info!(stage = %stage.name, "Stage succeeded");
            self.sink.try_emit(event::STAGE_SUCCEEDED, Some(payload));
        } else {
            let failing = record.failing_action();
            warn!(
                stage = %stage.name,
                action = ?failing.map(|a| a.name.as_str()),
                error = ?failing.and_then(|a| a.error.as_deref()),
                "Stage failed"
            );
            payload["action"] = serde_json::json!(failing.map(|a| a.name.as_str()));
            payload["error"] = serde_json::json!(failing.and_then(|a| a.error.as_deref()));
            self.sink.try_emit(event::STAGE_FAILED, Some(payload));
        }
        record
    }
}

/// What a finished action task hands back.
struct ActionOutcome {
    record: ActionRecord,
    artifact: Option<Artifact>,
}

/// Everything one action task owns.
struct ActionRun {
    spec: ActionSpec,
    ctx: ActionContext,
    halted: Arc<AtomicBool>,
    sink: Arc<dyn EventSink>,
}

impl ActionRun {
    async fn execute(self) -> ActionOutcome {
        let Self {
            spec,
            ctx,
            halted,
            sink,
        } = self;
        sink.try_emit(
            event::ACTION_STARTED,
            Some(event::action_payload(ctx.stage(), &spec.name, "running")),
        );

        let start = Instant::now();
        let cancel = ctx.cancel_token().clone();
        let output = if spec.runner.observes_cancellation() {
            Some(spec.runner.execute(&ctx).await)
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                output = spec.runner.execute(&ctx) => Some(output),
            }
        };

        let mut record = ActionRecord::pending(
            &spec.name,
            spec.runner.kind(),
            spec.input.clone(),
            spec.output.clone(),
        );
        record.duration_ms = Some(start.elapsed().as_secs_f64() * 1000.0);

        let mut artifact = None;
        match output {
            None => {
                record.status = ActionStatus::Aborted;
                record.error = Some(cancel.reason().unwrap_or_else(|| "cancelled".to_string()));
            }
            Some(output) if output.is_success() => {
                record.rollout = output.rollout;
                record.endpoint = output.endpoint;
                match (&spec.output, output.artifact) {
                    (Some(slot), None) => {
                        record.status = ActionStatus::Failed;
                        record.error = Some(format!(
                            "action reported success without producing artifact '{slot}'"
                        ));
                    }
                    (None, Some(undeclared)) => {
                        warn!(
                            action = %spec.name,
                            artifact = %undeclared.id().short(),
                            "Discarding artifact from action without an output slot"
                        );
                        record.status = ActionStatus::Succeeded;
                    }
                    (_, produced) => {
                        record.status = ActionStatus::Succeeded;
                        artifact = produced;
                    }
                }
            }
            Some(output) if cancel.is_cancelled() => {
                // Cut short by cancellation; whatever it recorded is kept.
                record.rollout = output.rollout;
                record.endpoint = output.endpoint;
                record.status = ActionStatus::Aborted;
                record.error = Some(cancel.reason().unwrap_or_else(|| "cancelled".to_string()));
            }
            Some(output) => {
                record.rollout = output.rollout;
                record.endpoint = output.endpoint;
                record.status = ActionStatus::Failed;
                record.error = Some(output.error.unwrap_or_else(|| "action failed".to_string()));
            }
        }

        // A success that lands after a sibling failed does not count.
        if record.status == ActionStatus::Failed {
            halted.store(true, Ordering::SeqCst);
        } else if record.status == ActionStatus::Succeeded && halted.load(Ordering::SeqCst) {
            record.status = ActionStatus::Aborted;
            record.error = Some("a sibling action failed first".to_string());
            artifact = None;
        }

        match record.status {
            ActionStatus::Succeeded => {
                info!(stage = ctx.stage(), action = %spec.name, kind = %record.kind, "Action succeeded");
            }
            _ => warn!(
                stage = ctx.stage(),
                action = %spec.name,
                status = %record.status,
                error = ?record.error,
                "Action did not succeed"
            ),
        }
        let mut payload = event::action_payload(ctx.stage(), &spec.name, &record.status.to_string());
        payload["error"] = serde_json::json!(record.error);
        payload["duration_ms"] = serde_json::json!(record.duration_ms);
        sink.try_emit(event::ACTION_FINISHED, Some(payload));

        ActionOutcome { record, artifact }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionOutput, FnAction};
    use crate::events::CollectingEventSink;
    use crate::testing::{ExecutionLog, RecordingAction};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn executor(sink: Arc<CollectingEventSink>, cancel: Arc<CancellationToken>) -> StageExecutor {
        StageExecutor::new("python-webApp", Uuid::now_v7(), sink, cancel)
    }

    #[tokio::test]
    async fn test_actions_run_concurrently_and_register_outputs() {
        let log = ExecutionLog::new();
        let stage = StageSpec::new("Build")
            .action(
                ActionSpec::new(
                    "Compile",
                    Arc::new(
                        RecordingAction::new("Compile", &log)
                            .with_delay(Duration::from_millis(30))
                            .producing(b"bin"),
                    ),
                )
                .produces("bin"),
            )
            .action(ActionSpec::new(
                "Lint",
                Arc::new(RecordingAction::new("Lint", &log).with_delay(Duration::from_millis(30))),
            ));
        let sink = Arc::new(CollectingEventSink::new());
        let store = ArtifactStore::new();

        let record = executor(sink.clone(), Arc::new(CancellationToken::new()))
            .execute(&stage, 0, &store)
            .await;

        assert_eq!(record.status, StageStatus::Succeeded);
        assert!(store.contains("bin"));
        assert_eq!(
            record.action("Compile").unwrap().artifact_id.as_ref(),
            Some(store.get("bin").unwrap().id())
        );
        // Both started before either finished.
        let entries = log.entries();
        assert!(entries[..2].iter().all(|e| e.starts_with("start:")));
        assert_eq!(
            sink.event_types(),
            vec![
                event::STAGE_STARTED.to_string(),
                event::ACTION_STARTED.to_string(),
                event::ACTION_STARTED.to_string(),
                event::ACTION_FINISHED.to_string(),
                event::ACTION_FINISHED.to_string(),
                event::STAGE_SUCCEEDED.to_string(),
            ]
        );
        let stage_events = sink.events_of_type("stage.");
        assert_eq!(stage_events[0].1.as_ref().unwrap()["status"], "running");
        assert_eq!(stage_events[1].1.as_ref().unwrap()["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_slow_sibling_of_failed_action_is_aborted() {
        let log = ExecutionLog::new();
        let stage = StageSpec::new("Build")
            .action(ActionSpec::new(
                "TestPython",
                Arc::new(RecordingAction::new("TestPython", &log).failing("3 tests failed")),
            ))
            .action(ActionSpec::new(
                "Package",
                Arc::new(
                    RecordingAction::new("Package", &log).with_delay(Duration::from_millis(50)),
                ),
            ));
        let sink = Arc::new(CollectingEventSink::new());

        let record = executor(sink.clone(), Arc::new(CancellationToken::new()))
            .execute(&stage, 1, &ArtifactStore::new())
            .await;

        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.action("TestPython").unwrap().status, ActionStatus::Failed);
        assert_eq!(record.action("Package").unwrap().status, ActionStatus::Aborted);
        // The slow sibling was allowed to finish before the stage returned.
        assert!(log.entries().contains(&"end:Package".to_string()));
        let failed = sink.events_of_type(event::STAGE_FAILED);
        assert_eq!(failed[0].1.as_ref().unwrap()["action"], "TestPython");
    }

    #[tokio::test]
    async fn test_success_without_declared_output_fails() {
        let stage = StageSpec::new("Build").action(
            ActionSpec::new("Compile", Arc::new(FnAction::new(|_: &ActionContext| ActionOutput::succeeded())))
                .produces("bin"),
        );
        let store = ArtifactStore::new();

        let record = executor(
            Arc::new(CollectingEventSink::new()),
            Arc::new(CancellationToken::new()),
        )
        .execute(&stage, 0, &store)
        .await;

        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.actions[0].error.as_ref().unwrap().contains("bin"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_input_at_dispatch_fails_action() {
        let stage = StageSpec::new("Deploy").action(
            ActionSpec::new("Ship", Arc::new(crate::actions::NoOpAction)).consumes("bin"),
        );

        let record = executor(
            Arc::new(CollectingEventSink::new()),
            Arc::new(CancellationToken::new()),
        )
        .execute(&stage, 2, &ArtifactStore::new())
        .await;

        assert_eq!(record.actions[0].status, ActionStatus::Failed);
        assert!(record.actions[0].error.as_ref().unwrap().contains("bin"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_in_flight_actions() {
        let log = ExecutionLog::new();
        let stage = StageSpec::new("Deploy").action(ActionSpec::new(
            "Ship",
            Arc::new(RecordingAction::new("Ship", &log).with_delay(Duration::from_secs(30))),
        ));
        let cancel = Arc::new(CancellationToken::new());
        let exec = executor(Arc::new(CollectingEventSink::new()), cancel.clone());

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel("operator abort");
            })
        };
        let record = tokio::time::timeout(
            Duration::from_secs(5),
            exec.execute(&stage, 2, &ArtifactStore::new()),
        )
        .await
        .unwrap();
        trigger.await.unwrap();

        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.actions[0].status, ActionStatus::Aborted);
        assert_eq!(record.actions[0].error.as_deref(), Some("operator abort"));
        assert!(!log.entries().contains(&"end:Ship".to_string()));
    }

    /// Waits for the token, then reports what it managed to do.
    #[derive(Debug)]
    struct TokenWatchingAction;

    #[async_trait::async_trait]
    impl Action for TokenWatchingAction {
        fn kind(&self) -> &str {
            "watching"
        }

        fn observes_cancellation(&self) -> bool {
            true
        }

        async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
            ctx.cancel_token().cancelled().await;
            ActionOutput::failed("stopped early").with_endpoint("203.0.113.10")
        }
    }

    #[tokio::test]
    async fn test_cancellation_aware_action_is_awaited() {
        let stage = StageSpec::new("Deploy")
            .action(ActionSpec::new("Ship", Arc::new(TokenWatchingAction)));
        let cancel = Arc::new(CancellationToken::new());
        let exec = executor(Arc::new(CollectingEventSink::new()), cancel.clone());

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel("operator abort");
            })
        };
        let record = tokio::time::timeout(
            Duration::from_secs(5),
            exec.execute(&stage, 2, &ArtifactStore::new()),
        )
        .await
        .unwrap();
        trigger.await.unwrap();

        let ship = &record.actions[0];
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(ship.status, ActionStatus::Aborted);
        assert_eq!(ship.error.as_deref(), Some("operator abort"));
        assert_eq!(ship.endpoint.as_deref(), Some("203.0.113.10"));
    }
}
