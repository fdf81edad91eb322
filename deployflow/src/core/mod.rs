//! Core domain model types for deployflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage, action, target and pipeline status enums
//! - Content-addressed artifacts
//! - Event names emitted at every state transition

mod artifact;
pub mod event;
mod status;

pub use artifact::{Artifact, ArtifactId};
pub use status::{ActionStatus, PipelineStatus, RolloutVerdict, StageStatus, TargetOutcome};
