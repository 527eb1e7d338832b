//! Utility functions for id generation and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{generate_run_id, generate_uuid};
pub use timestamps::{iso_timestamp, now_utc, Timestamp};
