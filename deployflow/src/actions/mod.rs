//! Action trait and built-in actions.
//!
//! Actions are the units of work inside a pipeline stage. Each consumes at
//! most one artifact and may produce one.

mod build;
mod deploy;
mod source;

pub use build::BuildAction;
pub use deploy::DeployAction;
pub use source::SourceAction;

use crate::cancellation::CancellationToken;
use crate::core::{ActionStatus, Artifact};
use crate::rollout::RolloutRecord;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// What an action sees while it runs.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pipeline: String,
    run_id: Uuid,
    stage: String,
    action: String,
    input: Option<Arc<Artifact>>,
    cancel: Arc<CancellationToken>,
}

impl ActionContext {
    /// Creates a new action context.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        run_id: Uuid,
        stage: impl Into<String>,
        action: impl Into<String>,
        input: Option<Arc<Artifact>>,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            stage: stage.into(),
            action: action.into(),
            input,
            cancel,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the input artifact, if the action declares one.
    #[must_use]
    pub fn input(&self) -> Option<&Arc<Artifact>> {
        self.input.as_ref()
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The result of one action execution.
#[derive(Debug, Clone)]
pub struct ActionOutput {
    /// Either `Succeeded` or `Failed`.
    pub status: ActionStatus,
    /// Artifact produced for the action's declared output slot.
    pub artifact: Option<Artifact>,
    /// Failure detail.
    pub error: Option<String>,
    /// Rollout record, for deploy actions.
    pub rollout: Option<RolloutRecord>,
    /// Reachable address of something this action deployed.
    pub endpoint: Option<String>,
}

impl ActionOutput {
    /// A successful output with nothing produced.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            status: ActionStatus::Succeeded,
            artifact: None,
            error: None,
            rollout: None,
            endpoint: None,
        }
    }

    /// A successful output producing an artifact.
    #[must_use]
    pub fn produced(artifact: Artifact) -> Self {
        Self {
            artifact: Some(artifact),
            ..Self::succeeded()
        }
    }

    /// A failed output.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            error: Some(error.into()),
            ..Self::succeeded()
        }
    }

    /// Attaches a rollout record.
    #[must_use]
    pub fn with_rollout(mut self, rollout: RolloutRecord) -> Self {
        self.rollout = Some(rollout);
        self
    }

    /// Attaches a public endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

/// Trait for pipeline actions.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Returns a short description of the action kind, for logs.
    fn kind(&self) -> &str;

    /// Executes the action.
    ///
    /// Failures are reported through the returned output; an action must
    /// not panic to signal failure.
    async fn execute(&self, ctx: &ActionContext) -> ActionOutput;

    /// Returns true when the action watches [`ActionContext::cancel_token`]
    /// itself and still returns an output after the token fires.
    ///
    /// Such actions are awaited to completion on cancellation instead of
    /// being dropped, so partial results (a sealed rollout record) survive.
    fn observes_cancellation(&self) -> bool {
        false
    }
}

/// A simple function-based action.
pub struct FnAction<F>
where
    F: Fn(&ActionContext) -> ActionOutput + Send + Sync,
{
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionContext) -> ActionOutput + Send + Sync,
{
    /// Creates a new function-based action.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnAction<F>
where
    F: Fn(&ActionContext) -> ActionOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAction").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: Fn(&ActionContext) -> ActionOutput + Send + Sync,
{
    fn kind(&self) -> &str {
        "fn"
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        (self.func)(ctx)
    }
}

/// An action that succeeds without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAction;

#[async_trait]
impl Action for NoOpAction {
    fn kind(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _ctx: &ActionContext) -> ActionOutput {
        ActionOutput::succeeded()
    }
}
