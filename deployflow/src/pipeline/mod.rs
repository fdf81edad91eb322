//! Pipeline definition and execution.
//!
//! This module provides:
//! - Action, stage and pipeline definitions
//! - The validating pipeline builder
//! - The write-once artifact store of a run
//! - The stage executor and the pipeline orchestrator
//! - Run records

mod builder;
mod executor;
mod orchestrator;
mod result;
mod spec;
mod store;

pub use builder::PipelineBuilder;
pub use executor::StageExecutor;
pub use orchestrator::PipelineOrchestrator;
pub use result::{ActionRecord, PipelineResult, StageRecord};
pub use spec::{ActionSpec, PipelineDefinition, StageSpec};
pub use store::ArtifactStore;
