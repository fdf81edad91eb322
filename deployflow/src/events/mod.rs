//! Event sinks for stage-transition and rollout events.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
