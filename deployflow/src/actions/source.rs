//! Fetches a repository branch into a new artifact.

use super::{Action, ActionContext, ActionOutput};
use crate::ports::{SecretsProvider, SourceProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Pulls the head of a branch through a [`SourceProvider`].
///
/// When an OAuth secret name is configured, the token is read from the
/// [`SecretsProvider`] on every execution and handed straight to the
/// provider; it is never logged or stored.
#[derive(Clone)]
pub struct SourceAction {
    repo: String,
    branch: String,
    provider: Arc<dyn SourceProvider>,
    oauth: Option<(String, Arc<dyn SecretsProvider>)>,
}

impl std::fmt::Debug for SourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAction")
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("oauth_secret", &self.oauth.as_ref().map(|(name, _)| name))
            .finish_non_exhaustive()
    }
}

impl SourceAction {
    /// Creates a source action for `repo` at `branch`.
    #[must_use]
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        provider: Arc<dyn SourceProvider>,
    ) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            provider,
            oauth: None,
        }
    }

    /// Authenticates with the secret named `secret_name`.
    #[must_use]
    pub fn with_oauth_token(
        mut self,
        secret_name: impl Into<String>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Self {
        self.oauth = Some((secret_name.into(), secrets));
        self
    }
}

#[async_trait]
impl Action for SourceAction {
    fn kind(&self) -> &str {
        "source"
    }

    async fn execute(&self, _ctx: &ActionContext) -> ActionOutput {
        let token = match &self.oauth {
            Some((name, secrets)) => match secrets.get(name).await {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(secret = %name, error = %e, "Secret lookup failed");
                    return ActionOutput::failed(format!("secret '{name}' is unavailable"));
                }
            },
            None => None,
        };

        match self.provider.fetch(&self.repo, &self.branch, token).await {
            Ok(artifact) => {
                info!(
                    repo = %self.repo,
                    branch = %self.branch,
                    artifact = %artifact.id().short(),
                    revision = %artifact.source_revision(),
                    "Fetched source"
                );
                ActionOutput::produced(artifact)
            }
            Err(e) => ActionOutput::failed(format!(
                "fetching {}@{} failed: {e:#}",
                self.repo, self.branch
            )),
        }
    }
}
