//! In-memory collaborators and actions for testing.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::actions::{Action, ActionContext, ActionOutput};
use crate::core::Artifact;
use crate::ports::{
    BuildExecutor, BuildOutcome, BuildRequest, DeliveryAgent, LiveInventory, SecretValue,
    SecretsProvider, SourceProvider,
};
use crate::targets::DeploymentTarget;

/// A shared, ordered log of `start:<name>` / `end:<name>` entries.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns every entry in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

/// An action that logs when it starts and ends.
#[derive(Debug)]
pub struct RecordingAction {
    name: String,
    log: ExecutionLog,
    delay: Duration,
    failure: Option<String>,
    content: Option<Vec<u8>>,
}

impl RecordingAction {
    /// Creates a recording action that succeeds immediately.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &ExecutionLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            delay: Duration::ZERO,
            failure: None,
            content: None,
        }
    }

    /// Sleeps for `delay` between the start and end entries.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails with `error` after the delay.
    #[must_use]
    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.failure = Some(error.into());
        self
    }

    /// Produces an artifact hashed from `content`.
    #[must_use]
    pub fn producing(mut self, content: &[u8]) -> Self {
        self.content = Some(content.to_vec());
        self
    }
}

#[async_trait]
impl Action for RecordingAction {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        self.log.record(format!("start:{}", self.name));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.record(format!("end:{}", self.name));

        if let Some(error) = &self.failure {
            return ActionOutput::failed(error.clone());
        }
        match &self.content {
            Some(content) => {
                let revision = ctx
                    .input()
                    .map_or_else(|| format!("{}@local", self.name), |i| i.source_revision().to_string());
                ActionOutput::produced(Artifact::from_content(revision, content))
            }
            None => ActionOutput::succeeded(),
        }
    }
}

/// What [`ScriptedDeliveryAgent`] does for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptedOutcome {
    /// Agent present, delivery succeeds.
    #[default]
    Succeed,
    /// Agent present, delivery fails.
    Fail,
    /// The agent check fails.
    NoAgent,
    /// Delivery never completes.
    Hang,
}

/// A delivery agent whose behavior is scripted per instance id.
///
/// Clones share their state, so a test can keep a handle after moving one
/// into a coordinator.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDeliveryAgent {
    outcomes: Arc<RwLock<HashMap<String, ScriptedOutcome>>>,
    delay: Duration,
    delivered: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedDeliveryAgent {
    /// Creates an agent that succeeds everywhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome for one host.
    #[must_use]
    pub fn with_outcome(self, instance_id: impl Into<String>, outcome: ScriptedOutcome) -> Self {
        self.outcomes.write().insert(instance_id.into(), outcome);
        self
    }

    /// Makes every delivery take `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the hosts that received the artifact, in completion order.
    #[must_use]
    pub fn delivered_to(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    /// Returns the highest number of concurrent deliveries observed.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn outcome(&self, instance_id: &str) -> ScriptedOutcome {
        self.outcomes
            .read()
            .get(instance_id)
            .copied()
            .unwrap_or_default()
    }
}

/// Decrements the in-flight counter even when a delivery is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeliveryAgent for ScriptedDeliveryAgent {
    async fn check_agent(&self, target: &DeploymentTarget) -> anyhow::Result<()> {
        match self.outcome(&target.instance_id) {
            ScriptedOutcome::NoAgent => {
                anyhow::bail!("deployment agent not installed on {}", target.instance_id)
            }
            _ => Ok(()),
        }
    }

    async fn deliver(&self, artifact: &Artifact, target: &DeploymentTarget) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        match self.outcome(&target.instance_id) {
            ScriptedOutcome::Hang => std::future::pending::<anyhow::Result<()>>().await,
            ScriptedOutcome::Fail | ScriptedOutcome::NoAgent => {
                tokio::time::sleep(self.delay).await;
                anyhow::bail!(
                    "deployment of {} to {} failed",
                    artifact.id().short(),
                    target.instance_id
                )
            }
            ScriptedOutcome::Succeed => {
                tokio::time::sleep(self.delay).await;
                self.delivered.lock().push(target.instance_id.clone());
                Ok(())
            }
        }
    }
}

/// An inventory backed by a mutable in-memory host list.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    hosts: Arc<RwLock<Vec<DeploymentTarget>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticInventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host.
    #[must_use]
    pub fn with_host(self, target: DeploymentTarget) -> Self {
        self.add(target);
        self
    }

    /// Adds a host to a live inventory.
    pub fn add(&self, target: DeploymentTarget) {
        self.hosts.write().push(target);
    }

    /// Removes a host; returns true if it was present.
    pub fn remove(&self, instance_id: &str) -> bool {
        let mut hosts = self.hosts.write();
        let before = hosts.len();
        hosts.retain(|t| t.instance_id != instance_id);
        hosts.len() != before
    }

    /// Returns how many times the inventory was listed.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveInventory for StaticInventory {
    async fn list(&self) -> anyhow::Result<Vec<DeploymentTarget>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hosts.read().clone())
    }
}

/// A secrets provider holding a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, String>,
}

impl StaticSecrets {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretsProvider for StaticSecrets {
    async fn get(&self, name: &str) -> anyhow::Result<SecretValue> {
        self.secrets
            .get(name)
            .map(SecretValue::new)
            .ok_or_else(|| anyhow::anyhow!("secret '{name}' not found"))
    }
}

/// A source provider that serves one fixed revision of every branch.
#[derive(Debug, Default)]
pub struct StaticSource {
    revision: String,
    required_token: Option<String>,
    fetches: AtomicUsize,
}

impl StaticSource {
    /// Serves `revision` for every fetch.
    #[must_use]
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            ..Self::default()
        }
    }

    /// Rejects fetches that do not present `token`.
    #[must_use]
    pub fn requiring_token(mut self, token: impl Into<String>) -> Self {
        self.required_token = Some(token.into());
        self
    }

    /// Returns the number of successful fetches.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn fetch(
        &self,
        repo: &str,
        branch: &str,
        token: Option<SecretValue>,
    ) -> anyhow::Result<Artifact> {
        if let Some(required) = &self.required_token {
            if token.as_ref().map(SecretValue::expose) != Some(required.as_str()) {
                anyhow::bail!("authentication to {repo} failed");
            }
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let content = format!("{repo}:{branch}:{}", self.revision);
        Ok(
            Artifact::from_content(format!("{branch}@{}", self.revision), content.as_bytes())
                .with_metadata("repo", repo),
        )
    }
}

/// A build runner that passes or fails every request.
#[derive(Debug, Default)]
pub struct ScriptedBuildExecutor {
    failure: Option<String>,
    projects: Mutex<Vec<String>>,
}

impl ScriptedBuildExecutor {
    /// Creates a runner that passes and produces a derived artifact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that fails every build with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns the projects that were run, in order.
    #[must_use]
    pub fn projects(&self) -> Vec<String> {
        self.projects.lock().clone()
    }
}

#[async_trait]
impl BuildExecutor for ScriptedBuildExecutor {
    async fn execute(&self, request: BuildRequest) -> anyhow::Result<BuildOutcome> {
        self.projects.lock().push(request.project.clone());
        if let Some(message) = &self.failure {
            return Ok(BuildOutcome::failed(message.clone()));
        }
        let content = format!("{}:{}", request.project, request.input.id());
        Ok(BuildOutcome::succeeded(Some(
            Artifact::from_content(request.input.source_revision(), content.as_bytes())
                .with_metadata("project", request.project),
        )))
    }
}
