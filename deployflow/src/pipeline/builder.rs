//! Pipeline builder with validation.

use super::{PipelineDefinition, StageSpec};
use crate::errors::{DependencyUnmetError, DeployflowError, PipelineValidationError};
use std::collections::{HashMap, HashSet};

/// Builder for creating validated pipelines.
///
/// Nothing is checked until [`build`](Self::build), which rejects a malformed
/// definition before any action can run.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Slots supplied by the caller when the run starts.
    seeds: Vec<String>,
    /// Stages in execution order.
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seeds: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Declares an artifact slot seeded into every run.
    #[must_use]
    pub fn seed_artifact(mut self, slot: impl Into<String>) -> Self {
        self.seeds.push(slot.into());
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::DependencyUnmet`] if an action consumes a
    /// slot that neither a seed nor an earlier stage produces, and
    /// [`DeployflowError::Validation`] for any other structural problem.
    pub fn build(self) -> Result<PipelineDefinition, DeployflowError> {
        if self.name.trim().is_empty() {
            return Err(
                PipelineValidationError::new("Pipeline name cannot be empty or whitespace-only")
                    .into(),
            );
        }
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            ))
            .into());
        }

        // slot -> stage that produced it; seeds are available from the start
        let mut produced: HashMap<&str, Option<&str>> = HashMap::new();
        for seed in &self.seeds {
            if produced.insert(seed.as_str(), None).is_some() {
                return Err(PipelineValidationError::new(format!(
                    "Seed artifact '{seed}' is declared twice"
                ))
                .into());
            }
        }

        let mut stage_names = HashSet::new();
        for stage in &self.stages {
            self.check_stage(stage, &mut stage_names)?;

            // Inputs only see slots from seeds and earlier stages.
            for action in &stage.actions {
                if let Some(input) = &action.input {
                    if !produced.contains_key(input.as_str()) {
                        return Err(
                            DependencyUnmetError::new(&stage.name, &action.name, input).into()
                        );
                    }
                }
            }

            for action in &stage.actions {
                let Some(output) = &action.output else {
                    continue;
                };
                if let Some(owner) = produced.insert(output.as_str(), Some(stage.name.as_str())) {
                    let mut stages = vec![stage.name.clone()];
                    stages.extend(owner.map(str::to_string));
                    return Err(PipelineValidationError::new(format!(
                        "Artifact '{output}' is produced more than once"
                    ))
                    .with_stages(stages)
                    .into());
                }
            }
        }

        Ok(PipelineDefinition {
            name: self.name,
            seeds: self.seeds,
            stages: self.stages,
        })
    }

    fn check_stage<'a>(
        &self,
        stage: &'a StageSpec,
        seen: &mut HashSet<&'a str>,
    ) -> Result<(), PipelineValidationError> {
        if stage.name.trim().is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has a stage with an empty name",
                self.name
            )));
        }
        if !seen.insert(stage.name.as_str()) {
            return Err(
                PipelineValidationError::new(format!("Duplicate stage '{}'", stage.name))
                    .with_stages(vec![stage.name.clone()]),
            );
        }
        if stage.actions.is_empty() {
            return Err(
                PipelineValidationError::new(format!("Stage '{}' has no actions", stage.name))
                    .with_stages(vec![stage.name.clone()]),
            );
        }

        let mut actions = HashSet::new();
        for action in &stage.actions {
            if action.name.trim().is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' has an action with an empty name",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
            if !actions.insert(action.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate action '{}' in stage '{}'",
                    action.name, stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::NoOpAction;
    use crate::pipeline::ActionSpec;
    use std::sync::Arc;

    fn noop(name: &str) -> ActionSpec {
        ActionSpec::new(name, Arc::new(NoOpAction))
    }

    fn release() -> PipelineBuilder {
        PipelineBuilder::new("python-webApp")
            .stage(StageSpec::new("Source").action(noop("GithubSource").produces("source_output")))
            .stage(
                StageSpec::new("Build").action(
                    noop("TestPython")
                        .consumes("source_output")
                        .produces("build_output"),
                ),
            )
            .stage(
                StageSpec::new("Deploy")
                    .action(noop("PythonAppDeployment").consumes("build_output")),
            )
    }

    #[test]
    fn test_build_valid_pipeline() {
        let definition = release().build().unwrap();
        assert_eq!(definition.name(), "python-webApp");
        assert_eq!(definition.stage_names(), vec!["Source", "Build", "Deploy"]);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("p").build().unwrap_err();
        assert!(matches!(err, DeployflowError::Validation(_)));
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = PipelineBuilder::new("  ")
            .stage(StageSpec::new("Build").action(noop("a")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_missing_input_is_dependency_unmet() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("Deploy").action(noop("Ship").consumes("build_output")))
            .build()
            .unwrap_err();
        match err {
            DeployflowError::DependencyUnmet(e) => {
                assert_eq!(e.stage, "Deploy");
                assert_eq!(e.action, "Ship");
                assert_eq!(e.artifact, "build_output");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_stage_producer_does_not_satisfy_input() {
        let err = PipelineBuilder::new("p")
            .stage(
                StageSpec::new("Build")
                    .action(noop("Compile").produces("bin"))
                    .action(noop("Package").consumes("bin")),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, DeployflowError::DependencyUnmet(_)));
    }

    #[test]
    fn test_later_stage_producer_does_not_satisfy_input() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("Deploy").action(noop("Ship").consumes("bin")))
            .stage(StageSpec::new("Build").action(noop("Compile").produces("bin")))
            .build()
            .unwrap_err();
        assert!(matches!(err, DeployflowError::DependencyUnmet(_)));
    }

    #[test]
    fn test_seed_satisfies_input() {
        let definition = PipelineBuilder::new("p")
            .seed_artifact("source_output")
            .stage(StageSpec::new("Build").action(noop("Compile").consumes("source_output")))
            .build()
            .unwrap();
        assert_eq!(definition.seed_slots(), ["source_output".to_string()]);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("Build").action(noop("a")))
            .stage(StageSpec::new("Build").action(noop("b")))
            .build()
            .unwrap_err();
        match err {
            DeployflowError::Validation(e) => assert_eq!(e.stages, vec!["Build".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_stage_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("Build"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no actions"));
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("Build").action(noop("a")).action(noop("a")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate action"));
    }

    #[test]
    fn test_output_produced_twice_rejected() {
        let err = PipelineBuilder::new("p")
            .stage(StageSpec::new("One").action(noop("a").produces("bin")))
            .stage(StageSpec::new("Two").action(noop("b").produces("bin")))
            .build()
            .unwrap_err();
        match err {
            DeployflowError::Validation(e) => {
                assert_eq!(e.stages, vec!["Two".to_string(), "One".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_output_colliding_with_seed_rejected() {
        let err = PipelineBuilder::new("p")
            .seed_artifact("bin")
            .stage(StageSpec::new("One").action(noop("a").produces("bin")))
            .build()
            .unwrap_err();
        assert!(matches!(err, DeployflowError::Validation(_)));
    }
}
