//! Cooperative cancellation.
//!
//! A run owns one [`CancellationToken`]; every job context receives a clone of
//! the `Arc`. Jobs check it at suspension points (before each retry attempt,
//! between output flushes) and runners race long waits against
//! [`CancellationToken::cancelled`].

mod token;

pub use token::CancellationToken;
