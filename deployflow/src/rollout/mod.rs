//! Fleet rollouts.
//!
//! This module provides:
//! - Deployment strategies bounding delivery concurrency
//! - The append-only rollout ledger and sealed rollout record
//! - The deployment coordinator

mod coordinator;
mod ledger;
mod strategy;

pub use coordinator::{DeploymentCoordinator, RolloutOptions};
pub use ledger::{RolloutLedger, RolloutRecord, TargetFailureKind, TargetResult};
pub use strategy::DeploymentStrategy;
