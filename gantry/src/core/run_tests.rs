//! Tests for run and job state transitions.

#[cfg(test)]
mod tests {
    use crate::core::{ArtifactRef, JobStatus, Run, RunStatus};
    use crate::errors::JobFailure;

    fn order(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    fn started_run() -> Run {
        let mut run = Run::new("run-1", "web", "refs/heads/main", order(&["build", "test", "deploy"]));
        run.start().unwrap();
        run
    }

    #[test]
    fn test_new_run_is_pending_with_queued_jobs() {
        let run = Run::new("run-1", "web", "main", order(&["build", "test"]));

        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.job_status("build"), Some(JobStatus::Queued));
        assert_eq!(run.job_status("test"), Some(JobStatus::Queued));
        assert!(run.job_status("missing").is_none());
    }

    #[test]
    fn test_jobs_cannot_start_before_run() {
        let mut run = Run::new("run-1", "web", "main", order(&["build"]));
        assert!(run.mark_running("build").is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = started_run();
        let artifact = ArtifactRef::for_content(b"tarball", "build", "app.tar");

        run.mark_running("build").unwrap();
        run.mark_succeeded("build", 0, 1, vec![artifact.clone()]).unwrap();

        let state = run.job("build").unwrap();
        assert_eq!(state.status, JobStatus::Succeeded);
        assert_eq!(state.exit_code, Some(0));
        assert!(state.started_at.unwrap() <= state.finished_at.unwrap());
        assert_eq!(state.output("app.tar"), Some(&artifact));
        assert_eq!(run.artifacts(), vec![&artifact]);
    }

    #[test]
    fn test_job_never_reenters_queued_or_runs_twice() {
        let mut run = started_run();
        run.mark_running("build").unwrap();

        assert!(run.mark_running("build").is_err());
        assert!(run.mark_skipped("build", "late").is_err());

        run.mark_failed("build", JobFailure::NonZeroExit { code: 1, message: None }, Some(1), 1)
            .unwrap();
        assert!(run.mark_succeeded("build", 0, 1, Vec::new()).is_err());
    }

    #[test]
    fn test_skip_only_from_queued() {
        let mut run = started_run();
        run.mark_skipped("deploy", "dependency 'test' failed").unwrap();

        let state = run.job("deploy").unwrap();
        assert_eq!(state.status, JobStatus::Skipped);
        assert!(state.started_at.is_none());
        assert!(run.mark_running("deploy").is_err());
    }

    #[test]
    fn test_failure_records_reason() {
        let mut run = started_run();
        run.mark_running("test").unwrap();
        run.mark_failed("test", JobFailure::Timeout { timeout_ms: 2000 }, None, 1)
            .unwrap();

        let state = run.job("test").unwrap();
        assert_eq!(state.reason.as_deref(), Some("Timeout after 2s"));
        assert_eq!(state.exit_code, None);
    }

    #[test]
    fn test_finish_requires_all_jobs_terminal() {
        let mut run = started_run();
        run.mark_running("build").unwrap();

        assert!(run.finish(RunStatus::Succeeded, "done").is_err());

        run.mark_succeeded("build", 0, 1, Vec::new()).unwrap();
        run.mark_skipped("test", "x").unwrap();
        run.mark_skipped("deploy", "x").unwrap();
        run.finish(RunStatus::Failed, "cancelled").unwrap();

        assert!(run.is_finished());
        assert!(run.finish(RunStatus::Succeeded, "again").is_err());
        assert!(run.mark_skipped("test", "x").is_err());
    }

    #[test]
    fn test_mark_interrupted_closes_out_run() {
        let mut run = started_run();
        run.mark_running("build").unwrap();

        assert!(run.mark_interrupted("process restarted"));

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.job_status("build"), Some(JobStatus::Failed));
        assert_eq!(run.job_status("test"), Some(JobStatus::Skipped));
        assert!(!run.mark_interrupted("again"));
    }

    #[test]
    fn test_only_succeeded_runs_record_promotions() {
        let mut run = started_run();
        assert!(run.record_promotion("dev").is_err());

        for id in ["build", "test", "deploy"] {
            run.mark_running(id).unwrap();
            run.mark_succeeded(id, 0, 1, Vec::new()).unwrap();
        }
        run.finish(RunStatus::Succeeded, "3 succeeded, 0 skipped").unwrap();

        assert!(run.record_promotion("dev").unwrap());
        assert!(!run.record_promotion("dev").unwrap());
        assert!(run.record_promotion("prod").unwrap());

        let restored: Run = serde_json::from_str(&serde_json::to_string(&run).unwrap()).unwrap();
        assert_eq!(restored.promoted_to.iter().collect::<Vec<_>>(), vec!["dev", "prod"]);
    }

    #[test]
    fn test_run_serialization_roundtrip() {
        let mut run = started_run();
        run.mark_running("build").unwrap();

        let json = serde_json::to_string(&run).unwrap();
        let restored: Run = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, run);
        assert_eq!(restored.job_status("build"), Some(JobStatus::Running));
    }
}
