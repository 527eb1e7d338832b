//! Testing utilities for gantry pipelines.
//!
//! This module provides:
//! - A scripted step runner that records calls and concurrency
//! - An artifact store wrapper that injects transient failures
//! - Ready-made job graphs

mod fixtures;
mod runner;
mod store;

pub use fixtures::{build_test_deploy, independent_jobs};
pub use runner::{JobScript, ScriptedRunner};
pub use store::FlakyStore;
