//! Per-target outcome ledger for one rollout.
//!
//! Delivery tasks write into a [`RolloutLedger`] concurrently, one key per
//! host. Once every task has been joined the coordinator seals the ledger
//! into an immutable [`RolloutRecord`] carrying the aggregate verdict.

use crate::core::{ArtifactId, RolloutVerdict, TargetOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a target did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFailureKind {
    /// The install/health precondition was not met.
    AgentUnavailable,
    /// The agent rejected or failed the delivery.
    Delivery,
    /// The agent check or delivery exceeded its timeout.
    Timeout,
    /// The rollout was cancelled before the target finished.
    Cancelled,
    /// The delivery task ended without recording an outcome.
    Incomplete,
}

impl fmt::Display for TargetFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentUnavailable => write!(f, "agent_unavailable"),
            Self::Delivery => write!(f, "delivery"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// The outcome of one host in a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    /// Current outcome.
    pub outcome: TargetOutcome,
    /// Failure classification for non-successful outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TargetFailureKind>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the outcome became terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl TargetResult {
    fn pending() -> Self {
        Self {
            outcome: TargetOutcome::Pending,
            failure: None,
            detail: None,
            finished_at: None,
        }
    }

    /// A successful delivery.
    #[must_use]
    pub fn succeeded() -> Self {
        Self {
            outcome: TargetOutcome::Succeeded,
            failure: None,
            detail: None,
            finished_at: Some(Utc::now()),
        }
    }

    /// A failed delivery.
    #[must_use]
    pub fn failed(kind: TargetFailureKind, detail: impl Into<String>) -> Self {
        Self {
            outcome: TargetOutcome::Failed,
            failure: Some(kind),
            detail: Some(detail.into()),
            finished_at: Some(Utc::now()),
        }
    }

    /// A delivery that was never completed.
    #[must_use]
    pub fn skipped(kind: TargetFailureKind, detail: impl Into<String>) -> Self {
        Self {
            outcome: TargetOutcome::Skipped,
            failure: Some(kind),
            detail: Some(detail.into()),
            finished_at: Some(Utc::now()),
        }
    }
}

/// Concurrent, append-only outcome ledger.
#[derive(Debug)]
pub struct RolloutLedger {
    artifact_id: ArtifactId,
    group: Option<String>,
    started_at: DateTime<Utc>,
    entries: DashMap<String, TargetResult>,
}

impl RolloutLedger {
    /// Opens a ledger with every target Pending.
    #[must_use]
    pub fn new<I, S>(artifact_id: ArtifactId, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = DashMap::new();
        for target in targets {
            entries.insert(target.into(), TargetResult::pending());
        }
        Self {
            artifact_id,
            group: None,
            started_at: Utc::now(),
            entries,
        }
    }

    /// Tags the ledger with the deployment group it serves.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Records a terminal result for one target.
    ///
    /// Returns false, leaving the entry untouched, when the target already
    /// holds a terminal outcome or is not part of this rollout.
    pub fn record(&self, instance_id: &str, result: TargetResult) -> bool {
        if !result.outcome.is_terminal() {
            return false;
        }
        match self.entries.get_mut(instance_id) {
            Some(mut entry) if !entry.outcome.is_terminal() => {
                *entry = result;
                true
            }
            _ => false,
        }
    }

    /// Returns the current outcome of a target.
    #[must_use]
    pub fn outcome(&self, instance_id: &str) -> Option<TargetOutcome> {
        self.entries.get(instance_id).map(|e| e.outcome)
    }

    /// Returns the number of targets in the rollout.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the rollout has no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the ledger into a record and computes the verdict.
    ///
    /// Must only be called once every writer has finished. Targets still
    /// Pending are closed out as Skipped when `cancelled`, otherwise as
    /// Failed.
    #[must_use]
    pub fn seal(&self, cancelled: bool) -> RolloutRecord {
        let mut outcomes = BTreeMap::new();
        for entry in &self.entries {
            let mut result = entry.value().clone();
            if !result.outcome.is_terminal() {
                result = if cancelled {
                    TargetResult::skipped(TargetFailureKind::Cancelled, "rollout cancelled")
                } else {
                    TargetResult::failed(
                        TargetFailureKind::Incomplete,
                        "delivery ended without an outcome",
                    )
                };
            }
            outcomes.insert(entry.key().clone(), result);
        }

        let verdict = aggregate_verdict(outcomes.values().map(|r| r.outcome));
        RolloutRecord {
            artifact_id: self.artifact_id.clone(),
            group: self.group.clone(),
            outcomes,
            verdict,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Cancelled only when cancellation actually left a target undelivered.
fn aggregate_verdict<I>(outcomes: I) -> RolloutVerdict
where
    I: IntoIterator<Item = TargetOutcome>,
{
    let mut total = 0usize;
    let mut succeeded = 0usize;
    let mut skipped = 0usize;
    for outcome in outcomes {
        total += 1;
        match outcome {
            TargetOutcome::Succeeded => succeeded += 1,
            TargetOutcome::Skipped => skipped += 1,
            TargetOutcome::Pending | TargetOutcome::Failed => {}
        }
    }

    if total == 0 {
        RolloutVerdict::NoOp
    } else if succeeded == total {
        RolloutVerdict::Succeeded
    } else if skipped > 0 {
        RolloutVerdict::Cancelled
    } else {
        RolloutVerdict::Failed
    }
}

/// Immutable outcome of one rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutRecord {
    /// The artifact that was rolled out.
    pub artifact_id: ArtifactId,
    /// The deployment group, when the rollout came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Outcome per instance id.
    pub outcomes: BTreeMap<String, TargetResult>,
    /// Aggregate verdict.
    pub verdict: RolloutVerdict,
    /// When the rollout began.
    pub started_at: DateTime<Utc>,
    /// When the record was sealed.
    pub finished_at: DateTime<Utc>,
}

impl RolloutRecord {
    /// Returns the outcome of one target.
    #[must_use]
    pub fn outcome(&self, instance_id: &str) -> Option<TargetOutcome> {
        self.outcomes.get(instance_id).map(|r| r.outcome)
    }

    /// Returns the instance ids with the given outcome.
    #[must_use]
    pub fn targets_with(&self, outcome: TargetOutcome) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, r)| r.outcome == outcome)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Returns the instance ids that failed.
    #[must_use]
    pub fn failed_targets(&self) -> Vec<&str> {
        self.targets_with(TargetOutcome::Failed)
    }

    /// Returns true only when every target succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.verdict == RolloutVerdict::Succeeded
    }
}
