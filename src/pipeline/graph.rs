//! Typed stage graph.
//!
//! Per-job chains `CacheRestore → Build → Sign → Verify` hang off the
//! branch's subcomponent production stage (or directly off `Resolve`) and all
//! meet at a single `Join` barrier before `Aggregate`.

use crate::error::{ConfigError, Result};
use crate::matrix::{Branch, BuildJob, JobId};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt;

/// One pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Trigger classification
    Classify,
    /// Matrix resolution
    Resolve,
    /// Run-global subcomponent production for one branch
    SubcomponentBuild {
        /// Branch the packages are built from
        branch: Branch,
    },
    /// Cache restoration for a job
    CacheRestore(JobId),
    /// Installer build for a job
    Build(JobId),
    /// Signing and notarization for a job
    Sign(JobId),
    /// Installer verification for a job
    Verify(JobId),
    /// Barrier on every job
    Join,
    /// Aggregation and publication
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Classify => f.write_str("classify"),
            Stage::Resolve => f.write_str("resolve"),
            Stage::SubcomponentBuild { branch } => write!(f, "subcomponent-build[{}]", branch),
            Stage::CacheRestore(id) => write!(f, "cache-restore[{}]", id),
            Stage::Build(id) => write!(f, "build[{}]", id),
            Stage::Sign(id) => write!(f, "sign[{}]", id),
            Stage::Verify(id) => write!(f, "verify[{}]", id),
            Stage::Join => f.write_str("join"),
            Stage::Aggregate => f.write_str("aggregate"),
        }
    }
}

/// Directed acyclic graph of stages
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<Stage, ()>,
    index: HashMap<Stage, NodeIndex>,
}

impl StageGraph {
    /// Graph for `jobs`. With `produce_subcomponents`, each branch gets a
    /// production stage that its jobs' cache restores depend on.
    pub fn build(jobs: &[BuildJob], produce_subcomponents: bool) -> Self {
        let mut stages = Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        };

        stages.edge(Stage::Classify, Stage::Resolve);
        let join = stages.node(Stage::Join);
        stages.edge(Stage::Join, Stage::Aggregate);

        for job in jobs {
            let upstream = if produce_subcomponents && job.flags.use_cached_subcomponents {
                let production = Stage::SubcomponentBuild {
                    branch: job.branch.clone(),
                };
                stages.edge(Stage::Resolve, production.clone());
                production
            } else {
                Stage::Resolve
            };

            let chain = [
                upstream,
                Stage::CacheRestore(job.id.clone()),
                Stage::Build(job.id.clone()),
                Stage::Sign(job.id.clone()),
                Stage::Verify(job.id.clone()),
            ];
            for pair in chain.windows(2) {
                stages.edge(pair[0].clone(), pair[1].clone());
            }
            let verify = stages.node(Stage::Verify(job.id.clone()));
            stages.graph.update_edge(verify, join, ());
        }

        // An empty matrix still joins and aggregates (a no-op).
        if jobs.is_empty() {
            stages.edge(Stage::Resolve, Stage::Join);
        }

        stages
    }

    fn node(&mut self, stage: Stage) -> NodeIndex {
        if let Some(index) = self.index.get(&stage) {
            return *index;
        }
        let index = self.graph.add_node(stage.clone());
        self.index.insert(stage, index);
        index
    }

    fn edge(&mut self, from: Stage, to: Stage) {
        let from = self.node(from);
        let to = self.node(to);
        self.graph.update_edge(from, to, ());
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no stages
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Stages in a valid execution order
    pub fn order(&self) -> Result<Vec<&Stage>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| ConfigError::CyclicStageGraph {
            stage: self.graph[cycle.node_id()].to_string(),
        })?;
        Ok(sorted.into_iter().map(|i| &self.graph[i]).collect())
    }

    /// Direct prerequisites of `stage`
    pub fn dependencies(&self, stage: &Stage) -> Vec<&Stage> {
        match self.index.get(stage) {
            Some(index) => self
                .graph
                .neighbors_directed(*index, Direction::Incoming)
                .map(|i| &self.graph[i])
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{BranchSelection, BuildMatrix, Platform, TargetDescriptor};
    use crate::trigger::{EventKind, TriggerEvent, classify};

    fn jobs(kind: EventKind) -> Vec<BuildJob> {
        BuildMatrix {
            targets: vec![
                TargetDescriptor::new(Platform::MacosArm64),
                TargetDescriptor::new(Platform::Linux),
            ],
            branches: BranchSelection::from_branches([Branch::Named("main".to_string())]),
        }
        .jobs(classify(&TriggerEvent::new(kind)))
    }

    fn position(order: &[&Stage], stage: &Stage) -> usize {
        order
            .iter()
            .position(|s| *s == stage)
            .unwrap_or_else(|| panic!("{} missing from order", stage))
    }

    #[test]
    fn every_job_chain_precedes_the_join() {
        let jobs = jobs(EventKind::Scheduled);
        let graph = StageGraph::build(&jobs, true);
        let order = graph.order().expect("acyclic");

        let production = Stage::SubcomponentBuild {
            branch: Branch::Named("main".to_string()),
        };
        for job in &jobs {
            let restore = position(&order, &Stage::CacheRestore(job.id.clone()));
            let build = position(&order, &Stage::Build(job.id.clone()));
            let sign = position(&order, &Stage::Sign(job.id.clone()));
            let verify = position(&order, &Stage::Verify(job.id.clone()));
            assert!(position(&order, &production) < restore);
            assert!(restore < build && build < sign && sign < verify);
            assert!(verify < position(&order, &Stage::Join));
        }
        assert_eq!(order.last(), Some(&&Stage::Aggregate));
        assert_eq!(graph.dependencies(&Stage::Join).len(), jobs.len());
    }

    #[test]
    fn release_runs_have_no_production_stage() {
        let graph = StageGraph::build(&jobs(EventKind::ReleaseCreated), true);
        let order = graph.order().expect("acyclic");
        assert!(!order
            .iter()
            .any(|s| matches!(s, Stage::SubcomponentBuild { .. })));
    }

    #[test]
    fn empty_matrix_is_a_trivial_graph() {
        let graph = StageGraph::build(&[], true);
        let order: Vec<String> = graph
            .order()
            .expect("acyclic")
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(order, vec!["classify", "resolve", "join", "aggregate"]);
    }
}
