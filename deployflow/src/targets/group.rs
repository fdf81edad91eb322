//! Deployment groups: named tag policies selecting release hosts.

use super::TagMatchRule;
use crate::errors::ConfigurationError;
use crate::rollout::DeploymentStrategy;
use serde::{Deserialize, Serialize};

/// Policy selecting which hosts receive a release.
///
/// A group holds no hosts; membership is computed by the resolver each time
/// a rollout starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentGroup {
    /// Group name.
    pub name: String,
    /// Application the group deploys.
    pub application_name: String,
    /// Tag predicate selecting hosts.
    pub tag_rule: TagMatchRule,
    /// Verify the host deployment agent before delivery.
    #[serde(default)]
    pub agent_requirement: bool,
    /// Delivery concurrency; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DeploymentStrategy>,
    /// Treat zero matching hosts as acceptable (canary-style groups).
    #[serde(default)]
    pub allow_empty: bool,
}

impl DeploymentGroup {
    /// Creates a group with the given rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        application_name: impl Into<String>,
        tag_rule: TagMatchRule,
    ) -> Self {
        Self {
            name: name.into(),
            application_name: application_name.into(),
            tag_rule,
            agent_requirement: false,
            strategy: None,
            allow_empty: false,
        }
    }

    /// Requires the deployment agent on every host.
    #[must_use]
    pub fn with_agent_requirement(mut self, required: bool) -> Self {
        self.agent_requirement = required;
        self
    }

    /// Sets the delivery strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: DeploymentStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Tolerates resolving to zero hosts.
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Validates names and the tag rule.
    ///
    /// # Errors
    ///
    /// Returns an error for blank names or an unmatchable rule.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::new("deployment group name cannot be empty"));
        }
        if self.application_name.trim().is_empty() {
            return Err(ConfigurationError::new(format!(
                "deployment group '{}' has no application name",
                self.name
            )));
        }
        self.tag_rule
            .validate()
            .map_err(|e| e.with_context_entry("group", self.name.clone()))
    }
}
