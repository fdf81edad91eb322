//! Resolves a deployment group and rolls the stage input out to it.

use super::{Action, ActionContext, ActionOutput};
use crate::core::{RolloutVerdict, TargetOutcome};
use crate::errors::{ConfigurationError, NoTargetsMatchedError};
use crate::ports::LiveInventory;
use crate::rollout::{DeploymentCoordinator, RolloutOptions};
use crate::targets::{resolve_live, DeploymentGroup};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Deploys the input artifact to every host the group selects at the moment
/// the action runs.
#[derive(Clone)]
pub struct DeployAction {
    group: DeploymentGroup,
    inventory: Arc<dyn LiveInventory>,
    coordinator: DeploymentCoordinator,
}

impl std::fmt::Debug for DeployAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployAction")
            .field("group", &self.group)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl DeployAction {
    /// Creates a deploy action.
    ///
    /// # Errors
    ///
    /// Returns an error when the group is invalid, so a broken tag rule is
    /// reported while the pipeline is being defined.
    pub fn new(
        group: DeploymentGroup,
        inventory: Arc<dyn LiveInventory>,
        coordinator: DeploymentCoordinator,
    ) -> Result<Self, ConfigurationError> {
        group.validate()?;
        Ok(Self {
            group,
            inventory,
            coordinator,
        })
    }

    /// Returns the deployment group.
    #[must_use]
    pub fn group(&self) -> &DeploymentGroup {
        &self.group
    }
}

#[async_trait]
impl Action for DeployAction {
    fn kind(&self) -> &str {
        "deploy"
    }

    fn observes_cancellation(&self) -> bool {
        true
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        let Some(artifact) = ctx.input() else {
            return ActionOutput::failed("deploy action requires an input artifact");
        };

        let resolution = match resolve_live(&self.group, self.inventory.as_ref()).await {
            Ok(resolution) => resolution,
            Err(e) => return ActionOutput::failed(e.to_string()),
        };
        if ctx.is_cancelled() {
            return ActionOutput::failed(format!(
                "deployment to '{}' cancelled before rollout",
                self.group.name
            ));
        }
        if resolution.is_empty() && !self.group.allow_empty {
            return ActionOutput::failed(NoTargetsMatchedError::new(&self.group.name).to_string());
        }

        info!(
            group = %self.group.name,
            application = %self.group.application_name,
            targets = ?resolution.instance_ids(),
            "Deploying artifact"
        );
        let record = self
            .coordinator
            .rollout_with(
                artifact.clone(),
                resolution.targets(),
                RolloutOptions::from_group(&self.group),
                Some(&self.group.name),
                ctx.cancel_token().clone(),
            )
            .await;

        let endpoint = resolution
            .targets()
            .iter()
            .filter(|t| record.outcome(&t.instance_id) == Some(TargetOutcome::Succeeded))
            .find_map(|t| t.public_address.clone());

        let output = match record.verdict {
            RolloutVerdict::Succeeded => ActionOutput::succeeded(),
            RolloutVerdict::NoOp => {
                warn!(group = %self.group.name, "Deployment group matched no hosts");
                ActionOutput::succeeded()
            }
            RolloutVerdict::Failed => ActionOutput::failed(format!(
                "rollout to '{}' failed on: {}",
                self.group.name,
                record.failed_targets().join(", ")
            )),
            RolloutVerdict::Cancelled => {
                ActionOutput::failed(format!("rollout to '{}' was cancelled", self.group.name))
            }
        };
        let output = match endpoint {
            Some(endpoint) => output.with_endpoint(endpoint),
            None => output,
        };
        output.with_rollout(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::core::Artifact;
    use crate::targets::{DeploymentTarget, TagMatchRule};
    use crate::testing::{ScriptedDeliveryAgent, ScriptedOutcome, StaticInventory};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn group() -> DeploymentGroup {
        DeploymentGroup::new(
            "PythonAppDeploymentGroup",
            "python-webApp",
            TagMatchRule::new()
                .accept("application-name", ["python-web"])
                .accept("stage", ["prod", "stage"]),
        )
        .with_agent_requirement(true)
    }

    fn web(id: &str, ip: &str) -> DeploymentTarget {
        DeploymentTarget::new(id)
            .with_tag("application-name", "python-web")
            .with_tag("stage", "prod")
            .with_public_address(ip)
    }

    fn context() -> ActionContext {
        ActionContext::new(
            "python-webApp",
            Uuid::now_v7(),
            "Deploy",
            "PythonAppDeployment",
            Some(Arc::new(Artifact::from_content("main@1", b"bundle"))),
            Arc::new(CancellationToken::new()),
        )
    }

    #[test]
    fn test_invalid_group_rejected_at_construction() {
        let broken = DeploymentGroup::new("g", "app", TagMatchRule::new());
        let coordinator = DeploymentCoordinator::new(Arc::new(ScriptedDeliveryAgent::new()));
        assert!(DeployAction::new(broken, Arc::new(StaticInventory::new()), coordinator).is_err());
    }

    #[tokio::test]
    async fn test_deploy_reports_endpoint_and_rollout() {
        let inventory = StaticInventory::new().with_host(web("i-1", "203.0.113.10"));
        let coordinator = DeploymentCoordinator::new(Arc::new(ScriptedDeliveryAgent::new()));
        let action = DeployAction::new(group(), Arc::new(inventory), coordinator).unwrap();

        let output = action.execute(&context()).await;

        assert!(output.is_success());
        assert_eq!(output.endpoint.as_deref(), Some("203.0.113.10"));
        let rollout = output.rollout.unwrap();
        assert_eq!(rollout.verdict, RolloutVerdict::Succeeded);
        assert_eq!(rollout.group.as_deref(), Some("PythonAppDeploymentGroup"));
    }

    #[tokio::test]
    async fn test_deploy_picks_up_new_hosts() {
        let inventory = Arc::new(StaticInventory::new().with_host(web("i-1", "203.0.113.10")));
        let coordinator = DeploymentCoordinator::new(Arc::new(ScriptedDeliveryAgent::new()));
        let action = DeployAction::new(group(), inventory.clone(), coordinator).unwrap();

        let first = action.execute(&context()).await.rollout.unwrap();
        inventory.add(web("i-2", "203.0.113.11"));
        let second = action.execute(&context()).await.rollout.unwrap();

        assert_eq!(first.outcomes.len(), 1);
        assert_eq!(second.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_no_targets_fails_unless_allowed() {
        let coordinator = DeploymentCoordinator::new(Arc::new(ScriptedDeliveryAgent::new()));
        let strict = DeployAction::new(
            group(),
            Arc::new(StaticInventory::new()),
            coordinator.clone(),
        )
        .unwrap();
        let output = strict.execute(&context()).await;
        assert!(!output.is_success());
        assert!(output.error.unwrap().contains("No targets matched"));

        let canary = DeployAction::new(
            group().allow_empty(),
            Arc::new(StaticInventory::new()),
            coordinator,
        )
        .unwrap();
        let output = canary.execute(&context()).await;
        assert!(output.is_success());
        assert_eq!(output.rollout.unwrap().verdict, RolloutVerdict::NoOp);
    }

    #[tokio::test]
    async fn test_failed_rollout_names_targets() {
        let inventory = StaticInventory::new()
            .with_host(web("i-1", "203.0.113.10"))
            .with_host(web("i-2", "203.0.113.11"));
        let agent = ScriptedDeliveryAgent::new().with_outcome("i-1", ScriptedOutcome::Fail);
        let coordinator = DeploymentCoordinator::new(Arc::new(agent));
        let action = DeployAction::new(group(), Arc::new(inventory), coordinator).unwrap();

        let output = action.execute(&context()).await;

        assert!(!output.is_success());
        assert!(output.error.as_deref().unwrap().contains("i-1"));
        assert_eq!(output.endpoint.as_deref(), Some("203.0.113.11"));
        assert_eq!(output.rollout.unwrap().failed_targets(), vec!["i-1"]);
    }
}
