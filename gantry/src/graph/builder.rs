//! Graph builder with validation.

use super::JobGraph;
use crate::core::{JobDefinition, JobStep};
use crate::errors::{CycleDetectedError, GraphError};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Builder for creating validated job graphs.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    /// The pipeline name.
    name: String,
    /// Job definitions in declaration order.
    jobs: Vec<JobDefinition>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    /// Adds a job.
    #[must_use]
    pub fn job(mut self, definition: JobDefinition) -> Self {
        self.jobs.push(definition);
        self
    }

    /// Adds several jobs.
    #[must_use]
    pub fn jobs(mut self, definitions: impl IntoIterator<Item = JobDefinition>) -> Self {
        self.jobs.extend(definitions);
        self
    }

    /// Returns the number of jobs added so far.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Validates the definitions and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns `EmptyPipeline`, `DuplicateJob`, `UnknownDependency`,
    /// `CyclicDependency` or `InvalidInput`. Nothing is executed when
    /// building fails.
    pub fn build(mut self) -> Result<JobGraph, GraphError> {
        if self.jobs.is_empty() {
            return Err(GraphError::EmptyPipeline { pipeline: self.name });
        }

        // An upload always publishes its step name, whether or not the
        // definition listed it.
        for job in &mut self.jobs {
            if let JobStep::ArtifactUpload { name, .. } = &job.step {
                job.outputs.insert(name.clone());
            }
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.jobs.len());
        for (i, job) in self.jobs.iter().enumerate() {
            if index.insert(job.id.as_str(), i).is_some() {
                return Err(GraphError::DuplicateJob { job: job.id.clone() });
            }
        }

        for job in &self.jobs {
            for dep in job.needs.iter().chain(job.tolerates.iter()) {
                if !index.contains_key(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        job: job.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if let Some(dep) = job.tolerates.iter().find(|d| !job.needs.contains(*d)) {
                return Err(GraphError::UnknownDependency {
                    job: job.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        detect_cycles(&self.jobs, &index)?;
        validate_inputs(&self.jobs, &index)?;

        let order = topological_order(&self.jobs, &index);
        debug!(pipeline = %self.name, jobs = self.jobs.len(), "Job graph validated");

        Ok(JobGraph::new(self.name, self.jobs, order))
    }
}

/// Detects cycles with a depth-first traversal and a recursion-stack set.
///
/// Roots are visited in declaration order and dependencies in sorted order,
/// so the reported path is the same for identical input.
fn detect_cycles(jobs: &[JobDefinition], index: &HashMap<&str, usize>) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for job in jobs {
        if !visited.contains(job.id.as_str()) {
            if let Some(cycle) = dfs_cycle(&job.id, jobs, index, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    node: &'a str,
    jobs: &'a [JobDefinition],
    index: &HashMap<&str, usize>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(&i) = index.get(node) {
        for dep in &jobs[i].needs {
            let dep = dep.as_str();
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, jobs, index, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let cycle_start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[cycle_start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

fn validate_inputs(jobs: &[JobDefinition], index: &HashMap<&str, usize>) -> Result<(), GraphError> {
    for job in jobs {
        let mut names = BTreeSet::new();
        for input in &job.inputs {
            if !job.needs.contains(&input.job) {
                return Err(GraphError::InvalidInput {
                    job: job.id.clone(),
                    message: format!("input '{}' comes from '{}', which is not in needs", input.name, input.job),
                });
            }
            let declared = index
                .get(input.job.as_str())
                .is_some_and(|&i| jobs[i].outputs.contains(&input.name));
            if !declared {
                return Err(GraphError::InvalidInput {
                    job: job.id.clone(),
                    message: format!("job '{}' does not declare output '{}'", input.job, input.name),
                });
            }
            if !names.insert(input.name.as_str()) {
                return Err(GraphError::InvalidInput {
                    job: job.id.clone(),
                    message: format!("input name '{}' is used twice", input.name),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm; among ready jobs the earliest declared comes first.
fn topological_order(jobs: &[JobDefinition], index: &HashMap<&str, usize>) -> Vec<usize> {
    let mut in_degree: Vec<usize> = jobs.iter().map(|j| j.needs.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
    for (i, job) in jobs.iter().enumerate() {
        for dep in &job.needs {
            if let Some(&d) = index.get(dep.as_str()) {
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(jobs.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &child in &dependents[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job(id: &str) -> JobDefinition {
        JobDefinition::shell(id, "true", Vec::<String>::new())
    }

    #[test]
    fn test_builder_creation() {
        let builder = GraphBuilder::new("web").job(job("build"));
        assert_eq!(builder.job_count(), 1);
    }

    #[test]
    fn test_empty_build() {
        let err = GraphBuilder::new("web").build().unwrap_err();
        assert_eq!(err, GraphError::EmptyPipeline { pipeline: "web".to_string() });
    }

    #[test]
    fn test_duplicate_job() {
        let err = GraphBuilder::new("web")
            .job(job("build"))
            .job(job("build"))
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateJob { job: "build".to_string() });
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphBuilder::new("web")
            .job(job("test").needs("build"))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::UnknownDependency {
                job: "test".to_string(),
                dependency: "build".to_string(),
            }
        );
    }

    #[test]
    fn test_tolerates_must_be_a_need() {
        let err = GraphBuilder::new("web")
            .job(job("lint"))
            .job(job("report").tolerating("lint"))
            .build()
            .unwrap_err();

        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_three_job_ring_is_cyclic() {
        let err = GraphBuilder::new("ring")
            .job(job("a").needs("c"))
            .job(job("b").needs("a"))
            .job(job("c").needs("b"))
            .build()
            .unwrap_err();

        match err {
            GraphError::CyclicDependency(cycle) => {
                assert_eq!(cycle.cycle_path, vec!["a", "c", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cyclic() {
        let err = GraphBuilder::new("self")
            .job(job("a").needs("a"))
            .build()
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::CyclicDependency(CycleDetectedError::new(vec!["a".to_string(), "a".to_string()]))
        );
    }

    #[test]
    fn test_input_must_come_from_declared_output() {
        let err = GraphBuilder::new("web")
            .job(job("build"))
            .job(job("test").with_input("build", "app.tar"))
            .build()
            .unwrap_err();

        assert!(matches!(err, GraphError::InvalidInput { ref job, .. } if job == "test"));
    }

    #[test]
    fn test_duplicate_input_names_rejected() {
        let err = GraphBuilder::new("web")
            .job(job("a").with_output("out"))
            .job(job("b").with_output("out"))
            .job(job("c").with_input("a", "out").with_input("b", "out"))
            .build()
            .unwrap_err();

        assert!(matches!(err, GraphError::InvalidInput { .. }));
    }

    #[test]
    fn test_upload_step_declares_its_output() {
        let package: JobDefinition = serde_json::from_str(
            r#"{"id":"package","step":{"type":"artifact_upload","name":"app.tar","path":"dist/app.tar"}}"#,
        )
        .unwrap();
        assert!(package.outputs.is_empty());

        let graph = GraphBuilder::new("web")
            .job(package)
            .job(job("ship").with_input("package", "app.tar"))
            .build()
            .unwrap();

        let outputs: Vec<&str> = graph.job("package").unwrap().outputs.iter().map(String::as_str).collect();
        assert_eq!(outputs, vec!["app.tar"]);
    }

    #[test]
    fn test_topological_order_ties_follow_declaration() {
        let graph = GraphBuilder::new("web")
            .job(job("deploy").needs("test").needs("lint"))
            .job(job("lint").needs("build"))
            .job(job("test").needs("build"))
            .job(job("build"))
            .job(job("docs"))
            .build()
            .unwrap();

        assert_eq!(
            graph.topological_order().to_vec(),
            vec!["build", "lint", "test", "deploy", "docs"]
        );
    }
}
