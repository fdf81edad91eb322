//! Pipeline, stage and action definitions.

use crate::actions::Action;
use std::sync::Arc;

/// Specification for a single action in a stage.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// The action name, unique within its stage.
    pub name: String,
    /// The action implementation.
    pub runner: Arc<dyn Action>,
    /// Artifact slot the action reads.
    pub input: Option<String>,
    /// Artifact slot the action must produce.
    pub output: Option<String>,
}

impl ActionSpec {
    /// Creates a new action specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            runner,
            input: None,
            output: None,
        }
    }

    /// Declares the artifact slot this action reads.
    #[must_use]
    pub fn consumes(mut self, slot: impl Into<String>) -> Self {
        self.input = Some(slot.into());
        self
    }

    /// Declares the artifact slot this action produces.
    #[must_use]
    pub fn produces(mut self, slot: impl Into<String>) -> Self {
        self.output = Some(slot.into());
        self
    }
}

/// Specification for a stage: a named group of concurrent actions.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Actions run concurrently when the stage starts.
    pub actions: Vec<ActionSpec>,
}

impl StageSpec {
    /// Creates an empty stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Returns the action names in declaration order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }
}

/// A validated, ordered pipeline. Built with
/// [`PipelineBuilder`](super::PipelineBuilder).
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub(super) name: String,
    pub(super) seeds: Vec<String>,
    pub(super) stages: Vec<StageSpec>,
}

impl PipelineDefinition {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the artifact slots a run must be seeded with.
    #[must_use]
    pub fn seed_slots(&self) -> &[String] {
        &self.seeds
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}
