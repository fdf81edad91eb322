//! # Deployflow
//!
//! Release pipelines that carry one immutable artifact from source, through
//! build, onto a fleet of hosts selected by their tags.
//!
//! Deployflow provides:
//!
//! - **Stage-ordered pipelines**: stages run strictly in order, the actions of
//!   a stage run concurrently, and the first failure halts the run
//! - **Write-once artifacts**: content-addressed, registered under a slot once
//!   and never mutated
//! - **Late-bound targeting**: deployment groups match host tags against the
//!   live inventory at the moment of deployment
//! - **Isolated rollouts**: each host is delivered in its own task and gets its
//!   own outcome; the verdict is computed once every delivery has finished
//! - **Cancellation**: one token aborts in-flight actions and deliveries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let coordinator = DeploymentCoordinator::new(agent);
//! let pipeline = PipelineBuilder::new("python-webApp")
//!     .stage(StageSpec::new("Source").action(
//!         ActionSpec::new("GithubSource", Arc::new(source)).produces("source_output"),
//!     ))
//!     .stage(StageSpec::new("Build").action(
//!         ActionSpec::new("TestPython", Arc::new(build))
//!             .consumes("source_output")
//!             .produces("build_output"),
//!     ))
//!     .stage(StageSpec::new("Deploy").action(
//!         ActionSpec::new("Deploy", Arc::new(DeployAction::new(group, inventory, coordinator)?))
//!             .consumes("build_output"),
//!     ))
//!     .build()?;
//!
//! let result = PipelineOrchestrator::new().run(&pipeline).await?;
//! println!("{:?} {:?}", result.status, result.endpoint);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod rollout;
pub mod targets;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{
        Action, ActionContext, ActionOutput, BuildAction, DeployAction, SourceAction,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{DeployflowConfig, LoggingSettings, RolloutSettings};
    pub use crate::core::{
        ActionStatus, Artifact, ArtifactId, PipelineStatus, RolloutVerdict, StageStatus,
        TargetOutcome,
    };
    pub use crate::errors::{
        ConfigurationError, DependencyUnmetError, DeployflowError, NoTargetsMatchedError,
        PipelineValidationError, StageActionFailedError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        ActionSpec, PipelineBuilder, PipelineDefinition, PipelineOrchestrator, PipelineResult,
        StageSpec,
    };
    pub use crate::ports::{
        BuildExecutor, DeliveryAgent, LiveInventory, SecretValue, SecretsProvider, SourceProvider,
    };
    pub use crate::rollout::{DeploymentCoordinator, DeploymentStrategy, RolloutRecord};
    pub use crate::targets::{resolve, resolve_live, DeploymentGroup, DeploymentTarget, TagMatchRule};
    pub use std::sync::Arc;
}
