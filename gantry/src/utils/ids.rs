//! Identifier generation.

use uuid::Uuid;

/// Generates a random (v4) UUID.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a run id.
///
/// Run ids are time-ordered (UUID v7) so that a directory listing of the run
/// store sorts runs by creation time.
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_v7_and_ordered() {
        let first = generate_run_id();
        let second = generate_run_id();

        let parsed = Uuid::parse_str(&first).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
        assert!(first <= second);
    }
}
