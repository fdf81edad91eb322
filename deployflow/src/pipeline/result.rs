//! Records of a finished pipeline run.

use crate::core::{ActionStatus, ArtifactId, PipelineStatus, StageStatus};
use crate::errors::{DeployflowError, StageActionFailedError};
use crate::rollout::RolloutRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// The action name.
    pub name: String,
    /// The action kind, as reported by the runner.
    pub kind: String,
    /// Final status.
    pub status: ActionStatus,
    /// Slot read by the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Slot written by the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Id of the artifact the action produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    /// Failure or abort detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rollout record, for deploy actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutRecord>,
    /// Reachable address the action reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Duration in milliseconds, once the action ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl ActionRecord {
    /// A record for an action that never started.
    #[must_use]
    pub fn pending(
        name: impl Into<String>,
        kind: impl Into<String>,
        input: Option<String>,
        output: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            status: ActionStatus::Pending,
            input,
            output,
            artifact_id: None,
            error: None,
            rollout: None,
            endpoint: None,
            duration_ms: None,
        }
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage name.
    pub name: String,
    /// Zero-based position in the pipeline.
    pub ordinal: usize,
    /// Final status; `Pending` if the stage never started.
    pub status: StageStatus,
    /// Per-action records in declaration order.
    pub actions: Vec<ActionRecord>,
    /// When the stage started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the last action of the stage finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    /// Returns the record of the named action.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Returns the first failed action, falling back to the first aborted one.
    #[must_use]
    pub fn failing_action(&self) -> Option<&ActionRecord> {
        self.actions
            .iter()
            .find(|a| a.status == ActionStatus::Failed)
            .or_else(|| {
                self.actions
                    .iter()
                    .find(|a| a.status == ActionStatus::Aborted)
            })
    }
}

/// The outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The pipeline name.
    pub pipeline: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Final status.
    pub status: PipelineStatus,
    /// Every stage of the definition, including those that never started.
    pub stages: Vec<StageRecord>,
    /// The action whose failure halted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageActionFailedError>,
    /// Reachable address of the deployed application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Slot name to artifact id for everything registered during the run.
    pub artifacts: BTreeMap<String, ArtifactId>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }

    /// Returns the stage that halted the run.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.stage.as_str())
    }

    /// Returns the record of the named stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns every rollout performed during the run, in stage order.
    #[must_use]
    pub fn rollouts(&self) -> Vec<&RolloutRecord> {
        self.stages
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| a.rollout.as_ref())
            .collect()
    }

    /// Converts an unsuccessful run into an error.
    ///
    /// # Errors
    ///
    /// Returns [`DeployflowError::StageActionFailed`] for a failed run and
    /// [`DeployflowError::Cancelled`] for a cancelled one.
    pub fn into_result(self) -> Result<Self, DeployflowError> {
        match self.status {
            PipelineStatus::Succeeded => Ok(self),
            PipelineStatus::Failed => Err(match self.failure {
                Some(failure) => failure.into(),
                None => DeployflowError::Internal(format!(
                    "pipeline '{}' failed without a failing action",
                    self.pipeline
                )),
            }),
            PipelineStatus::Cancelled => Err(DeployflowError::Cancelled(
                self.failure
                    .map_or_else(|| "cancelled".to_string(), |f| f.message),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stage(name: &str, ordinal: usize, statuses: &[(&str, ActionStatus)]) -> StageRecord {
        StageRecord {
            name: name.to_string(),
            ordinal,
            status: StageStatus::Failed,
            actions: statuses
                .iter()
                .map(|(action, status)| ActionRecord {
                    status: *status,
                    ..ActionRecord::pending(*action, "noop", None, None)
                })
                .collect(),
            started_at: None,
            finished_at: None,
        }
    }

    fn result(status: PipelineStatus, failure: Option<StageActionFailedError>) -> PipelineResult {
        let now = Utc::now();
        PipelineResult {
            pipeline: "python-webApp".to_string(),
            run_id: Uuid::now_v7(),
            status,
            stages: vec![stage("Build", 1, &[("TestPython", ActionStatus::Failed)])],
            failure,
            endpoint: None,
            artifacts: BTreeMap::new(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_failing_action_prefers_failed() {
        let record = stage(
            "Build",
            1,
            &[
                ("Lint", ActionStatus::Aborted),
                ("TestPython", ActionStatus::Failed),
            ],
        );
        assert_eq!(record.failing_action().unwrap().name, "TestPython");
    }

    #[test]
    fn test_into_result_failed() {
        let failure = StageActionFailedError::new("Build", "TestPython", "3 tests failed");
        let run = result(PipelineStatus::Failed, Some(failure.clone()));
        assert_eq!(run.failed_stage(), Some("Build"));

        match run.into_result() {
            Err(DeployflowError::StageActionFailed(e)) => assert_eq!(e, failure),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_into_result_cancelled() {
        let failure = StageActionFailedError::new("Deploy", "Ship", "operator abort");
        let err = result(PipelineStatus::Cancelled, Some(failure))
            .into_result()
            .unwrap_err();
        assert!(matches!(err, DeployflowError::Cancelled(ref m) if m == "operator abort"));
    }

    #[test]
    fn test_serializes_statuses_snake_case() {
        let json = serde_json::to_value(result(PipelineStatus::Failed, None)).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stages"][0]["actions"][0]["status"], "failed");
        assert!(json.get("endpoint").is_none());
    }
}
