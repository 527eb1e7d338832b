//! Run triggering and promotion.
//!
//! [`Orchestrator`] accepts a [`RunRequest`], validates its job graph,
//! persists and executes the run, and gates promotion of the run's
//! artifacts to deployment environments.

mod request;
mod service;

pub use request::{JobSource, RunRequest};
pub use service::{Orchestrator, Promotion};
