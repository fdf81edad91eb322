//! Error types for deployflow.
//!
//! Definition and configuration errors are returned before any side effect
//! takes place. Per-target delivery failures are recorded in the rollout
//! ledger and never surface through these types on their own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for deployflow operations.
#[derive(Debug, Error)]
pub enum DeployflowError {
    /// The pipeline definition is malformed.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// An action consumes an artifact no earlier stage produces.
    #[error("{0}")]
    DependencyUnmet(#[from] DependencyUnmetError),

    /// An action failed and halted the pipeline.
    #[error("{0}")]
    StageActionFailed(#[from] StageActionFailedError),

    /// A deployment group or settings value is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// No host matched a deployment group that requires at least one.
    #[error("{0}")]
    NoTargetsMatched(#[from] NoTargetsMatchedError),

    /// An artifact slot was written twice.
    #[error("{0}")]
    ArtifactAlreadyProduced(#[from] ArtifactAlreadyProducedError),

    /// The live inventory returned unusable data.
    #[error("Inventory error: {0}")]
    Inventory(String),

    /// The pipeline was cancelled.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error raised when an action's input artifact is not produced by any
/// earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Action '{action}' in stage '{stage}' requires artifact '{artifact}', which no earlier stage produces")]
pub struct DependencyUnmetError {
    /// Stage containing the action.
    pub stage: String,
    /// The consuming action.
    pub action: String,
    /// The missing artifact slot.
    pub artifact: String,
}

impl DependencyUnmetError {
    /// Creates a new dependency error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        action: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            action: action.into(),
            artifact: artifact.into(),
        }
    }
}

/// Error describing the action whose failure halted a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Action '{action}' failed in stage '{stage}': {message}")]
pub struct StageActionFailedError {
    /// The stage the action belongs to.
    pub stage: String,
    /// The failing action.
    pub action: String,
    /// The failure reported by the action.
    pub message: String,
}

impl StageActionFailedError {
    /// Creates a new stage action failure.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Error raised for invalid configuration, such as a tag rule that can never
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// Additional context key-value pairs.
    pub context: HashMap<String, String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: HashMap::new(),
        }
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised when a deployment group resolves to zero hosts and the caller
/// does not tolerate that.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No targets matched deployment group '{group}'")]
pub struct NoTargetsMatchedError {
    /// The deployment group name.
    pub group: String,
}

impl NoTargetsMatchedError {
    /// Creates a new error for the given group.
    #[must_use]
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }
}

/// Raised when a second artifact is registered under an existing slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Artifact '{slot}' was already produced")]
pub struct ArtifactAlreadyProducedError {
    /// The artifact slot.
    pub slot: String,
}

impl ArtifactAlreadyProducedError {
    /// Creates a new error for the given slot.
    #[must_use]
    pub fn new(slot: impl Into<String>) -> Self {
        Self { slot: slot.into() }
    }
}

/// Raised when the install/health precondition of a host is not met.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Deployment agent unavailable on '{instance_id}': {reason}")]
pub struct AgentUnavailableError {
    /// The host that failed the check.
    pub instance_id: String,
    /// Why the check failed.
    pub reason: String,
}

impl AgentUnavailableError {
    /// Creates a new agent error.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for deployflow operations.
pub type Result<T> = std::result::Result<T, DeployflowError>;
