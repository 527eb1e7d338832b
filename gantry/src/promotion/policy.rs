//! Promotion policy and decisions.

use crate::core::Run;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default release-tag pattern: `v<major>.<minor>.<patch>`.
pub const DEFAULT_TAG_PATTERN: &str = r"^v\d+\.\d+\.\d+$";

const TAG_REF_PREFIX: &str = "refs/tags/";

fn default_tag_pattern() -> String {
    DEFAULT_TAG_PATTERN.to_string()
}

/// Conditions a run must meet before it is promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    /// Require the triggering ref to be a release tag.
    #[serde(default)]
    pub require_tag: bool,
    /// Release-tag regex, matched against the ref without `refs/tags/`.
    #[serde(default = "default_tag_pattern")]
    pub tag_pattern: String,
    /// The promotion ladder, lowest environment first.
    #[serde(default)]
    pub required_environments: Vec<String>,
    /// Jobs that must have succeeded.
    #[serde(default)]
    pub required_checks: BTreeSet<String>,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            require_tag: false,
            tag_pattern: default_tag_pattern(),
            required_environments: Vec::new(),
            required_checks: BTreeSet::new(),
        }
    }
}

impl PromotionPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires a release tag.
    #[must_use]
    pub fn require_tag(mut self) -> Self {
        self.require_tag = true;
        self
    }

    /// Sets the release-tag pattern.
    #[must_use]
    pub fn with_tag_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.tag_pattern = pattern.into();
        self
    }

    /// Sets the promotion ladder.
    #[must_use]
    pub fn with_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_environments = environments.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a required check.
    #[must_use]
    pub fn with_check(mut self, job: impl Into<String>) -> Self {
        self.required_checks.insert(job.into());
        self
    }

    /// Compiles the release-tag pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error if `tag_pattern` does not compile.
    pub fn tag_regex(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.tag_pattern)
    }

    /// Returns whether `trigger_ref` is a release tag under this policy.
    ///
    /// # Errors
    ///
    /// Returns the regex error if `tag_pattern` does not compile.
    pub fn is_release_tag(&self, trigger_ref: &str) -> Result<bool, regex::Error> {
        let tag = trigger_ref.strip_prefix(TAG_REF_PREFIX).unwrap_or(trigger_ref);
        Ok(self.tag_regex()?.is_match(tag))
    }

    /// Returns the rung below `environment` in the ladder, if any.
    #[must_use]
    pub fn previous_environment(&self, environment: &str) -> Option<&str> {
        let position = self.required_environments.iter().position(|e| e == environment)?;
        position
            .checked_sub(1)
            .map(|p| self.required_environments[p].as_str())
    }
}

/// The outcome of evaluating a run against a policy.
///
/// A denial is a valid decision, not an error; `reason` always explains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionDecision {
    /// The evaluated run.
    pub run: Run,
    /// Where the run would be promoted.
    pub target_environment: String,
    /// Whether promotion is allowed.
    pub approved: bool,
    /// Why.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_tag_matching() {
        let policy = PromotionPolicy::new().require_tag();

        assert!(policy.is_release_tag("v1.2.3").unwrap());
        assert!(policy.is_release_tag("refs/tags/v10.0.1").unwrap());
        assert!(!policy.is_release_tag("refs/heads/main").unwrap());
        assert!(!policy.is_release_tag("v1.2").unwrap());
        assert!(!policy.is_release_tag("v1.2.3-rc1").unwrap());
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let policy = PromotionPolicy::new().with_tag_pattern("(unclosed");
        assert!(policy.tag_regex().is_err());
        assert!(policy.is_release_tag("v1.0.0").is_err());
    }

    #[test]
    fn test_previous_environment() {
        let policy = PromotionPolicy::new().with_environments(["dev", "staging", "prod"]);

        assert_eq!(policy.previous_environment("dev"), None);
        assert_eq!(policy.previous_environment("staging"), Some("dev"));
        assert_eq!(policy.previous_environment("prod"), Some("staging"));
        assert_eq!(policy.previous_environment("qa"), None);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: PromotionPolicy =
            serde_json::from_str(r#"{"required_checks": ["test"], "require_tag": true}"#).unwrap();

        assert!(policy.require_tag);
        assert_eq!(policy.tag_pattern, DEFAULT_TAG_PATTERN);
        assert!(policy.required_checks.contains("test"));
    }
}
