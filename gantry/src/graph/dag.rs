//! The validated job DAG.

use crate::core::JobDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// A directed acyclic graph of jobs.
///
/// Only [`GraphBuilder`](super::GraphBuilder) constructs graphs, so every
/// `JobGraph` has known dependencies and no cycles.
#[derive(Debug, Clone)]
pub struct JobGraph {
    /// The pipeline name.
    name: String,
    /// Job definitions in declaration order.
    jobs: Vec<Arc<JobDefinition>>,
    /// Job id to declaration index.
    index: HashMap<String, usize>,
    /// Job ids in topological order.
    order: Vec<String>,
    /// Job id to position in `order`.
    rank: HashMap<String, usize>,
    /// Job id to the ids that need it, in topological order.
    dependents: HashMap<String, Vec<String>>,
}

impl JobGraph {
    pub(super) fn new(name: String, jobs: Vec<JobDefinition>, order: Vec<usize>) -> Self {
        let index: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(i, j)| (j.id.clone(), i))
            .collect();
        let order: Vec<String> = order.into_iter().map(|i| jobs[i].id.clone()).collect();
        let rank: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(r, id)| (id.clone(), r))
            .collect();

        let mut dependents: HashMap<String, Vec<String>> =
            jobs.iter().map(|j| (j.id.clone(), Vec::new())).collect();
        for id in &order {
            let job = &jobs[index[id]];
            for dep in &job.needs {
                if let Some(children) = dependents.get_mut(dep) {
                    children.push(id.clone());
                }
            }
        }

        Self {
            name,
            jobs: jobs.into_iter().map(Arc::new).collect(),
            index,
            order,
            rank,
            dependents,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if the graph has no jobs. Built graphs never are.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Returns a job definition.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<&Arc<JobDefinition>> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    /// Returns job definitions in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.iter()
    }

    /// Returns the topological order.
    ///
    /// This is a scheduling hint: the scheduler runs any job whose
    /// dependencies are satisfied, and uses the order only to break ties.
    #[must_use]
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Returns a job's position in the topological order.
    #[must_use]
    pub fn rank(&self, id: &str) -> Option<usize> {
        self.rank.get(id).copied()
    }

    /// Returns the jobs that directly need `id`.
    #[must_use]
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns every job that transitively needs `id`, in topological order.
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut seen = vec![false; self.order.len()];
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for child in self.dependents(current) {
                if let Some(r) = self.rank(child) {
                    if !seen[r] {
                        seen[r] = true;
                        stack.push(child);
                    }
                }
            }
        }
        self.order
            .iter()
            .enumerate()
            .filter(|(r, _)| seen[*r])
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Returns jobs with no dependencies, in topological order.
    #[must_use]
    pub fn roots(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.job(id).is_some_and(|j| j.needs.is_empty()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::JobDefinition;
    use crate::graph::GraphBuilder;

    fn job(id: &str) -> JobDefinition {
        JobDefinition::shell(id, "true", Vec::<String>::new())
    }

    fn diamond() -> super::JobGraph {
        GraphBuilder::new("diamond")
            .job(job("build"))
            .job(job("unit").needs("build"))
            .job(job("e2e").needs("build"))
            .job(job("deploy").needs("unit").needs("e2e"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_graph_accessors() {
        let graph = diamond();

        assert_eq!(graph.name(), "diamond");
        assert_eq!(graph.len(), 4);
        assert!(!graph.is_empty());
        assert_eq!(graph.roots(), vec!["build"]);
        assert!(graph.job("deploy").is_some());
        assert!(graph.job("nope").is_none());
    }

    #[test]
    fn test_rank_respects_dependencies() {
        let graph = diamond();
        for job in graph.jobs() {
            for dep in &job.needs {
                assert!(graph.rank(dep).unwrap() < graph.rank(&job.id).unwrap());
            }
        }
    }

    #[test]
    fn test_dependents() {
        let graph = diamond();

        assert_eq!(graph.dependents("build"), ["unit".to_string(), "e2e".to_string()]);
        assert!(graph.dependents("deploy").is_empty());
        assert_eq!(graph.transitive_dependents("build"), vec!["unit", "e2e", "deploy"]);
        assert_eq!(graph.transitive_dependents("e2e"), vec!["deploy"]);
    }
}
