//! Observability utilities.

mod subscriber;

pub use subscriber::{build_env_filter, init_tracing};
