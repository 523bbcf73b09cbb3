//! Checkpoint-and-requeue and graceful termination of training runs driven
//! by OS signals, plus hook override detection.
//!
//! Unix only: the signal table is reached through `nix` and `libc`.
//! [`platform::is_on_windows`] is still consulted before registration.

pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod connector;
pub mod env;
pub mod logger;
pub mod overrides;
pub mod platform;
pub mod requeue;
pub mod session;
pub mod signals;
pub mod trainer;

#[cfg(test)]
mod test_support;

pub use connector::SignalConnector;
pub use session::TrainingSession;
