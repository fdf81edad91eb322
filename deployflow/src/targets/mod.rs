//! Tag-based deployment target resolution.
//!
//! This module provides:
//! - Host tags and tag-match rules
//! - Deployment groups
//! - The resolver turning a group plus live inventory into hosts

mod group;
mod resolver;
mod tags;

pub use group::DeploymentGroup;
pub use resolver::{resolve, resolve_live, Resolution};
pub use tags::{DeploymentTarget, TagMatchRule, TagSet};
