//! Drives one artifact across a set of hosts.

use super::{DeploymentStrategy, RolloutLedger, RolloutRecord, TargetFailureKind, TargetResult};
use crate::cancellation::CancellationToken;
use crate::config::RolloutSettings;
use crate::core::{event, Artifact, RolloutVerdict};
use crate::errors::AgentUnavailableError;
use crate::events::{EventSink, NoOpEventSink};
use crate::ports::DeliveryAgent;
use crate::targets::{DeploymentGroup, DeploymentTarget};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Per-rollout options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutOptions {
    /// Verify the host agent before delivery.
    pub agent_requirement: bool,
    /// Delivery concurrency; the configured default when absent.
    pub strategy: Option<DeploymentStrategy>,
}

impl RolloutOptions {
    /// Options taken from a deployment group.
    #[must_use]
    pub fn from_group(group: &DeploymentGroup) -> Self {
        Self {
            agent_requirement: group.agent_requirement,
            strategy: group.strategy,
        }
    }
}

/// Pushes artifacts to hosts through a [`DeliveryAgent`].
///
/// Each target is delivered in its own task. A failing host never cancels
/// its siblings, and the coordinator performs no rollback: it only reports.
#[derive(Clone)]
pub struct DeploymentCoordinator {
    agent: Arc<dyn DeliveryAgent>,
    sink: Arc<dyn EventSink>,
    settings: RolloutSettings,
}

impl std::fmt::Debug for DeploymentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentCoordinator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeploymentCoordinator {
    /// Creates a coordinator with default settings and no event sink.
    #[must_use]
    pub fn new(agent: Arc<dyn DeliveryAgent>) -> Self {
        Self {
            agent,
            sink: Arc::new(NoOpEventSink),
            settings: RolloutSettings::default(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the rollout settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RolloutSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the rollout settings.
    #[must_use]
    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    /// Rolls `artifact` out to `targets` with the default strategy.
    pub async fn rollout(
        &self,
        artifact: Arc<Artifact>,
        targets: &[DeploymentTarget],
        agent_requirement: bool,
    ) -> RolloutRecord {
        let options = RolloutOptions {
            agent_requirement,
            strategy: None,
        };
        self.rollout_with(artifact, targets, options, None, Arc::new(CancellationToken::new()))
            .await
    }

    /// Rolls `artifact` out to `targets`, aborting in-flight deliveries when
    /// `cancel` fires.
    #[instrument(
        skip(self, artifact, targets, cancel),
        fields(artifact = %artifact.id().short(), targets = targets.len())
    )]
    pub async fn rollout_with(
        &self,
        artifact: Arc<Artifact>,
        targets: &[DeploymentTarget],
        options: RolloutOptions,
        group: Option<&str>,
        cancel: Arc<CancellationToken>,
    ) -> RolloutRecord {
        let mut ledger = RolloutLedger::new(
            artifact.id().clone(),
            targets.iter().map(|t| t.instance_id.clone()),
        );
        if let Some(group) = group {
            ledger = ledger.with_group(group);
        }
        let ledger = Arc::new(ledger);

        if targets.is_empty() {
            warn!(group = ?group, "Rollout has no targets; nothing was deployed");
            self.sink.try_emit(
                event::ROLLOUT_NOOP,
                Some(serde_json::json!({
                    "artifact": artifact.id().as_str(),
                    "group": group,
                })),
            );
            return self.finish(&ledger, false);
        }

        let strategy = options.strategy.unwrap_or(self.settings.default_strategy);
        let permits = Arc::new(Semaphore::new(strategy.max_parallel(targets.len())));
        info!(%strategy, agent_requirement = options.agent_requirement, "Starting rollout");
        self.sink.try_emit(
            event::ROLLOUT_STARTED,
            Some(serde_json::json!({
                "artifact": artifact.id().as_str(),
                "group": group,
                "targets": targets.iter().map(|t| t.instance_id.as_str()).collect::<Vec<_>>(),
                "strategy": strategy.to_string(),
            })),
        );

        let mut tasks = FuturesUnordered::new();
        for target in targets.iter().cloned() {
            let delivery = Delivery {
                agent: self.agent.clone(),
                artifact: artifact.clone(),
                settings: self.settings.clone(),
                agent_requirement: options.agent_requirement,
            };
            let ledger = ledger.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let sink = self.sink.clone();

            tasks.push(tokio::spawn(async move {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => TargetResult::skipped(
                        TargetFailureKind::Cancelled,
                        cancel.reason().unwrap_or_else(|| "rollout cancelled".to_string()),
                    ),
                    result = delivery.run(&target, &permits) => result,
                };

                let payload = serde_json::json!({
                    "target": &target.instance_id,
                    "outcome": result.outcome.to_string(),
                    "failure": result.failure.map(|k| k.to_string()),
                    "detail": &result.detail,
                });
                if ledger.record(&target.instance_id, result) {
                    sink.try_emit(event::ROLLOUT_TARGET, Some(payload));
                }
            }));
        }

        // Barrier: the verdict is only computed once every writer is done.
        while let Some(joined) = tasks.next().await {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task did not complete");
            }
        }

        self.finish(&ledger, cancel.is_cancelled())
    }

    fn finish(&self, ledger: &RolloutLedger, cancelled: bool) -> RolloutRecord {
        let record = ledger.seal(cancelled);
        match record.verdict {
            RolloutVerdict::Succeeded | RolloutVerdict::NoOp => {
                info!(verdict = %record.verdict, "Rollout finished");
            }
            RolloutVerdict::Failed | RolloutVerdict::Cancelled => {
                warn!(
                    verdict = %record.verdict,
                    failed_targets = ?record.failed_targets(),
                    "Rollout finished"
                );
            }
        }
        self.sink.try_emit(
            event::ROLLOUT_COMPLETED,
            serde_json::to_value(&record).ok(),
        );
        record
    }
}

/// Everything a single delivery task needs.
struct Delivery {
    agent: Arc<dyn DeliveryAgent>,
    artifact: Arc<Artifact>,
    settings: RolloutSettings,
    agent_requirement: bool,
}

impl Delivery {
    async fn run(&self, target: &DeploymentTarget, permits: &Semaphore) -> TargetResult {
        let Ok(_permit) = permits.acquire().await else {
            return TargetResult::skipped(TargetFailureKind::Cancelled, "rollout closed");
        };
        let id = target.instance_id.as_str();

        if self.agent_requirement {
            let check = tokio::time::timeout(
                self.settings.agent_check_timeout(),
                self.agent.check_agent(target),
            )
            .await;
            let unavailable = match check {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(AgentUnavailableError::new(id, format!("{e:#}"))),
                Err(_) => Some(AgentUnavailableError::new(id, "agent check timed out")),
            };
            if let Some(err) = unavailable {
                warn!(target = id, error = %err, "Agent precondition failed");
                return TargetResult::failed(TargetFailureKind::AgentUnavailable, err.to_string());
            }
        }

        debug!(target = id, "Delivering artifact");
        match tokio::time::timeout(
            self.settings.delivery_timeout(),
            self.agent.deliver(&self.artifact, target),
        )
        .await
        {
            Ok(Ok(())) => TargetResult::succeeded(),
            Ok(Err(e)) => {
                warn!(target = id, error = %format!("{e:#}"), "Delivery failed");
                TargetResult::failed(TargetFailureKind::Delivery, format!("{e:#}"))
            }
            Err(_) => TargetResult::failed(
                TargetFailureKind::Timeout,
                format!(
                    "delivery exceeded {:.1}s",
                    self.settings.delivery_timeout_seconds
                ),
            ),
        }
    }
}
