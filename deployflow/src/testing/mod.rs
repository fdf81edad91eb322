//! Testing utilities for deployflow pipelines.
//!
//! This module provides:
//! - In-memory collaborators (inventory, secrets, source, build, delivery)
//! - Recording actions with a shared execution log
//! - Fixtures for the python-web release

mod fixtures;
mod mocks;

pub use fixtures::{
    python_web_group, python_web_host, python_web_inventory, ReleaseFixture, GITHUB_TOKEN,
    GITHUB_TOKEN_SECRET, PYTHON_WEB_REPO,
};
pub use mocks::{
    ExecutionLog, RecordingAction, ScriptedBuildExecutor, ScriptedDeliveryAgent, ScriptedOutcome,
    StaticInventory, StaticSecrets, StaticSource,
};
