//! Fixtures for the python-web release scenario.

use std::sync::Arc;

use super::{ScriptedBuildExecutor, ScriptedDeliveryAgent, StaticInventory, StaticSecrets, StaticSource};
use crate::actions::{BuildAction, DeployAction, SourceAction};
use crate::errors::DeployflowError;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{ActionSpec, PipelineBuilder, PipelineDefinition, StageSpec};
use crate::rollout::DeploymentCoordinator;
use crate::targets::{DeploymentGroup, DeploymentTarget, TagMatchRule};

/// Repository the release pipeline pulls from.
pub const PYTHON_WEB_REPO: &str = "sample-python-web-app";
/// Name of the secret holding the source-control token.
pub const GITHUB_TOKEN_SECRET: &str = "github-oauth-token";
/// Token value stored in the fixture secrets.
pub const GITHUB_TOKEN: &str = "ghp_fixture_token";

/// The web server deployment group: `application-name` is `python-web` and
/// `stage` is `prod` or `stage`.
#[must_use]
pub fn python_web_group() -> DeploymentGroup {
    DeploymentGroup::new(
        "PythonAppDeploymentGroup",
        "python-webApp",
        TagMatchRule::new()
            .accept("application-name", ["python-web"])
            .accept("stage", ["prod", "stage"]),
    )
    .with_agent_requirement(true)
}

/// A web host tagged for the python-web application.
#[must_use]
pub fn python_web_host(instance_id: &str, stage: &str, address: &str) -> DeploymentTarget {
    DeploymentTarget::new(instance_id)
        .with_tag("application-name", "python-web")
        .with_tag("stage", stage)
        .with_public_address(address)
}

/// Three hosts of which only `h1` matches [`python_web_group`]: `h2` is a dev
/// host and `h3` belongs to another application.
#[must_use]
pub fn python_web_inventory() -> StaticInventory {
    StaticInventory::new()
        .with_host(python_web_host("h1", "prod", "203.0.113.10"))
        .with_host(python_web_host("h2", "dev", "203.0.113.11"))
        .with_host(
            DeploymentTarget::new("h3")
                .with_tag("application-name", "other-app")
                .with_tag("stage", "prod")
                .with_public_address("203.0.113.12"),
        )
}

/// Collaborators for a complete Source, Build, Deploy release.
///
/// Fields are public so a test can swap one collaborator:
///
/// ```rust,ignore
/// let fixture = ReleaseFixture {
///     builder: Arc::new(ScriptedBuildExecutor::failing("3 tests failed")),
///     ..ReleaseFixture::new()
/// };
/// ```
#[derive(Clone)]
pub struct ReleaseFixture {
    /// Source provider.
    pub source: Arc<StaticSource>,
    /// Secrets provider holding [`GITHUB_TOKEN_SECRET`].
    pub secrets: Arc<StaticSecrets>,
    /// Build runner.
    pub builder: Arc<ScriptedBuildExecutor>,
    /// Live inventory.
    pub inventory: Arc<StaticInventory>,
    /// Delivery agent.
    pub agent: ScriptedDeliveryAgent,
    /// Target group of the deploy stage.
    pub group: DeploymentGroup,
    /// Sink shared by the coordinator.
    pub sink: Arc<dyn EventSink>,
}

impl Default for ReleaseFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseFixture {
    /// Creates the default fixture: every collaborator succeeds and only
    /// `h1` matches the group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: Arc::new(StaticSource::new("9f1c2ab").requiring_token(GITHUB_TOKEN)),
            secrets: Arc::new(StaticSecrets::new().with_secret(GITHUB_TOKEN_SECRET, GITHUB_TOKEN)),
            builder: Arc::new(ScriptedBuildExecutor::new()),
            inventory: Arc::new(python_web_inventory()),
            agent: ScriptedDeliveryAgent::new(),
            group: python_web_group(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Builds the coordinator used by the deploy stage.
    #[must_use]
    pub fn coordinator(&self) -> DeploymentCoordinator {
        DeploymentCoordinator::new(Arc::new(self.agent.clone())).with_event_sink(self.sink.clone())
    }

    /// Builds the three-stage release pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment group is invalid.
    pub fn pipeline(&self) -> Result<PipelineDefinition, DeployflowError> {
        let source = SourceAction::new(PYTHON_WEB_REPO, "main", self.source.clone())
            .with_oauth_token(GITHUB_TOKEN_SECRET, self.secrets.clone());
        let build = BuildAction::new("pythonTestProject", self.builder.clone());
        let deploy = DeployAction::new(self.group.clone(), self.inventory.clone(), self.coordinator())?;

        PipelineBuilder::new("python-webApp")
            .stage(
                StageSpec::new("Source")
                    .action(ActionSpec::new("GithubSource", Arc::new(source)).produces("source_output")),
            )
            .stage(
                StageSpec::new("Build").action(
                    ActionSpec::new("TestPython", Arc::new(build))
                        .consumes("source_output")
                        .produces("build_output"),
                ),
            )
            .stage(
                StageSpec::new("Deploy").action(
                    ActionSpec::new("PythonAppDeployment", Arc::new(deploy)).consumes("build_output"),
                ),
            )
            .build()
    }
}
