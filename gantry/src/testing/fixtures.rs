//! Ready-made job sets.

use crate::core::JobDefinition;

/// `build -> test -> deploy`: build produces `app.tar`, test and deploy
/// consume it, deploy targets `staging`.
#[must_use]
pub fn build_test_deploy() -> Vec<JobDefinition> {
    vec![
        JobDefinition::shell("build", "make", ["dist"]).with_output("app.tar"),
        JobDefinition::shell("test", "make", ["test"]).with_input("build", "app.tar"),
        JobDefinition::deploy("deploy", "staging")
            .needs("test")
            .with_input("build", "app.tar"),
    ]
}

/// `count` jobs with no dependencies, named `job-0`, `job-1`, ...
#[must_use]
pub fn independent_jobs(count: usize) -> Vec<JobDefinition> {
    (0..count)
        .map(|i| JobDefinition::shell(format!("job-{i}"), "true", Vec::<String>::new()))
        .collect()
}
