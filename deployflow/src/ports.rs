//! Ports to external collaborators.
//!
//! Source control, build runners, host inventory, secrets and the per-host
//! deployment agent live outside this crate. Each is reached through one of
//! the traits below; errors are opaque `anyhow` errors because their shape
//! belongs to the provider.

use crate::core::Artifact;
use crate::targets::DeploymentTarget;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A credential obtained from the secrets provider.
///
/// The value is only reachable through [`expose`](Self::expose); `Debug` and
/// `Display` print a placeholder and the type is deliberately not
/// serializable.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a secret string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret. Never log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue([REDACTED])")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Supplies credentials by name.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    /// Looks up a secret.
    async fn get(&self, name: &str) -> anyhow::Result<SecretValue>;
}

/// Produces a new artifact from a repository branch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetches the head of `branch` in `repo`.
    async fn fetch(
        &self,
        repo: &str,
        branch: &str,
        token: Option<SecretValue>,
    ) -> anyhow::Result<Artifact>;
}

/// What a build runner is asked to do.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// The build project to run.
    pub project: String,
    /// Name of the pipeline action issuing the request.
    pub action: String,
    /// The artifact to build or test.
    pub input: Arc<Artifact>,
}

/// What a build runner reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Whether the build passed.
    pub success: bool,
    /// The artifact produced, if any.
    pub output: Option<Artifact>,
    /// Failure detail or build summary.
    pub message: Option<String>,
}

impl BuildOutcome {
    /// A passing build with an optional output artifact.
    #[must_use]
    pub fn succeeded(output: Option<Artifact>) -> Self {
        Self {
            success: true,
            output,
            message: None,
        }
    }

    /// A failing build.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            message: Some(message.into()),
        }
    }
}

/// Runs tests and builds against an artifact.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Executes one build request.
    async fn execute(&self, request: BuildRequest) -> anyhow::Result<BuildOutcome>;
}

/// Source of truth for which hosts exist right now and how they are tagged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveInventory: Send + Sync {
    /// Lists the current hosts.
    async fn list(&self) -> anyhow::Result<Vec<DeploymentTarget>>;
}

/// Talks to the deployment agent running on each host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryAgent: Send + Sync {
    /// Verifies the agent is installed and healthy on the host.
    async fn check_agent(&self, target: &DeploymentTarget) -> anyhow::Result<()>;

    /// Delivers and installs the artifact on the host.
    async fn deliver(&self, artifact: &Artifact, target: &DeploymentTarget) -> anyhow::Result<()>;
}
