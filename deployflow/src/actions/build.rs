//! Runs a build project against the stage input.

use super::{Action, ActionContext, ActionOutput};
use crate::ports::{BuildExecutor, BuildRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Delegates to a [`BuildExecutor`]. Retries, if any, are the executor's
/// business.
#[derive(Clone)]
pub struct BuildAction {
    project: String,
    executor: Arc<dyn BuildExecutor>,
}

impl std::fmt::Debug for BuildAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildAction")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl BuildAction {
    /// Creates a build action for `project`.
    #[must_use]
    pub fn new(project: impl Into<String>, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            project: project.into(),
            executor,
        }
    }
}

#[async_trait]
impl Action for BuildAction {
    fn kind(&self) -> &str {
        "build"
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        let Some(input) = ctx.input() else {
            return ActionOutput::failed("build action requires an input artifact");
        };

        let request = BuildRequest {
            project: self.project.clone(),
            action: ctx.action().to_string(),
            input: input.clone(),
        };
        match self.executor.execute(request).await {
            Ok(outcome) if outcome.success => {
                info!(project = %self.project, input = %input.id().short(), "Build passed");
                match outcome.output {
                    Some(artifact) => ActionOutput::produced(artifact),
                    None => ActionOutput::succeeded(),
                }
            }
            Ok(outcome) => ActionOutput::failed(
                outcome
                    .message
                    .unwrap_or_else(|| format!("build project '{}' failed", self.project)),
            ),
            Err(e) => ActionOutput::failed(format!(
                "build project '{}' could not run: {e:#}",
                self.project
            )),
        }
    }
}
