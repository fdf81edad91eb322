//! Cooperative cancellation for pipeline runs and rollouts.

mod token;

pub use token::CancellationToken;
