//! Event sink trait and the sinks shipped with the crate.

use crate::core::event;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Receiver of stage-transition and rollout events.
///
/// The orchestrator, the stage executor and the rollout coordinator report
/// every state change here. An audit trail or dashboard plugs in by
/// implementing this trait.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers an event, awaiting the sink if it needs to.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Delivers an event from synchronous code. Must not panic.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`.
///
/// Routine transitions are logged at the configured level. Events that
/// report a failure (a failed stage, a failed or aborted action, a host
/// that could not be delivered, a rollout with nothing to deploy) are
/// always logged at `WARN`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingEventSink {
    /// Creates a sink that logs routine events at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a sink that logs routine events at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn level_for(&self, event_type: &str, data: Option<&Value>) -> Level {
        if reports_failure(event_type, data) {
            Level::WARN
        } else {
            self.level
        }
    }

    fn record(&self, event_type: &str, data: Option<&Value>) {
        let field = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let stage = field("stage");
        let action = field("action");
        let target = field("target");

        match self.level_for(event_type, data) {
            Level::WARN | Level::ERROR => {
                warn!(event = event_type, %stage, %action, %target, data = ?data, "Deployflow event");
            }
            Level::INFO => {
                info!(event = event_type, %stage, %action, %target, "Deployflow event");
            }
            _ => {
                debug!(event = event_type, %stage, %action, %target, data = ?data, "Deployflow event");
            }
        }
    }
}

fn reports_failure(event_type: &str, data: Option<&Value>) -> bool {
    if event_type == event::STAGE_FAILED || event_type == event::ROLLOUT_NOOP {
        return true;
    }
    let Some(data) = data else {
        return false;
    };
    ["status", "outcome", "verdict"].iter().any(|key| {
        matches!(
            data.get(*key).and_then(Value::as_str),
            Some("failed" | "aborted" | "cancelled")
        )
    })
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.record(event_type, data.as_ref());
    }
}

/// Keeps every event in memory, in emission order.
///
/// Used by tests and by callers that want an audit snapshot of a run.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event received so far.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns only the event names.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True until the first event arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the events whose name starts with `prefix`, e.g. `"rollout."`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_owned(), data));
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}
