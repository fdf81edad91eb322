//! Status enums for stages, actions, rollout targets and pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage actions are executing.
    ///
    /// Reported in `stage.started` events only; a `StageRecord` is built
    /// after the stage ends and is never Running.
    Running,
    /// Every action in the stage succeeded.
    Succeeded,
    /// At least one action failed or was aborted.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The execution status of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Action has not been dispatched.
    #[default]
    Pending,
    /// Action is executing. Seen in `action.started` events only.
    Running,
    /// Action completed successfully.
    Succeeded,
    /// Action reported a failure.
    Failed,
    /// Action was still running when its stage failed or the run was cancelled.
    Aborted,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl ActionStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// Outcome of delivering an artifact to one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    /// Delivery not yet finished.
    #[default]
    Pending,
    /// Artifact delivered.
    Succeeded,
    /// Delivery or agent precondition failed.
    Failed,
    /// Delivery was not attempted or was cut short by cancellation.
    Skipped,
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl TargetOutcome {
    /// Returns true once the outcome can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Aggregate verdict of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutVerdict {
    /// Every target succeeded.
    Succeeded,
    /// At least one target failed.
    Failed,
    /// There were no targets to deploy to.
    NoOp,
    /// Cancellation left at least one target undelivered.
    Cancelled,
}

impl fmt::Display for RolloutVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::NoOp => write!(f, "no_op"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every stage succeeded.
    Succeeded,
    /// An action failed and the pipeline halted.
    Failed,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
