//! Dependency graph construction.
//!
//! This module provides:
//! - `GraphBuilder`, which validates job definitions (unknown dependencies,
//!   duplicate ids, cycles, unsatisfiable inputs)
//! - `JobGraph`, the validated DAG with a precomputed topological order

mod builder;
mod dag;

pub use builder::GraphBuilder;
pub use dag::JobGraph;
