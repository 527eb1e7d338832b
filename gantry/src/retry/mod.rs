//! Retry utilities for transient failures.
//!
//! Step runs and artifact store operations share one policy: bounded
//! attempts with exponential backoff and jitter. Only errors the caller
//! classifies as transient are retried, and cancellation stops the loop
//! between attempts.

mod policy;

pub use policy::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, Retried, RetryConfig, RetryDecision,
    RetryError, RetryState,
};
