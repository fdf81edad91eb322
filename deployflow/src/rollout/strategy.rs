//! How many hosts receive a release at the same time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery concurrency of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Every host at once.
    AllAtOnce,
    /// Up to half of the hosts at once, rounded up.
    HalfAtATime,
    /// One host at a time.
    #[default]
    OneAtATime,
}

impl DeploymentStrategy {
    /// Returns the number of deliveries allowed in flight for `targets` hosts.
    ///
    /// Always at least one, so an empty rollout still gets a valid semaphore.
    #[must_use]
    pub fn max_parallel(&self, targets: usize) -> usize {
        let limit = match self {
            Self::AllAtOnce => targets,
            Self::HalfAtATime => targets.div_ceil(2),
            Self::OneAtATime => 1,
        };
        limit.max(1)
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllAtOnce => write!(f, "all_at_once"),
            Self::HalfAtATime => write!(f, "half_at_a_time"),
            Self::OneAtATime => write!(f, "one_at_a_time"),
        }
    }
}
