//! Event names and payload builders for pipeline and rollout transitions.

use serde_json::json;

/// Emitted when a pipeline run begins.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Emitted when a pipeline run ends, whatever the outcome.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// Emitted when a stage moves to Running.
pub const STAGE_STARTED: &str = "stage.started";
/// Emitted when a stage moves to Succeeded.
pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
/// Emitted when a stage moves to Failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// Emitted when an action is dispatched.
pub const ACTION_STARTED: &str = "action.started";
/// Emitted when an action reaches a terminal status.
pub const ACTION_FINISHED: &str = "action.finished";
/// Emitted when a rollout begins.
pub const ROLLOUT_STARTED: &str = "rollout.started";
/// Emitted when one target reaches a terminal outcome.
pub const ROLLOUT_TARGET: &str = "rollout.target";
/// Emitted when a rollout is sealed.
pub const ROLLOUT_COMPLETED: &str = "rollout.completed";
/// Emitted when a rollout had nothing to deploy to.
pub const ROLLOUT_NOOP: &str = "rollout.noop";

/// Builds the payload of a stage transition event.
#[must_use]
pub fn stage_payload(pipeline: &str, stage: &str, ordinal: usize) -> serde_json::Value {
    json!({
        "pipeline": pipeline,
        "stage": stage,
        "ordinal": ordinal,
    })
}

/// Builds the payload of an action event.
#[must_use]
pub fn action_payload(stage: &str, action: &str, status: &str) -> serde_json::Value {
    json!({
        "stage": stage,
        "action": action,
        "status": status,
    })
}
