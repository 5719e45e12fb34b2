//! Collaborator stores.
//!
//! The orchestrator writes through these traits; anything durable can sit
//! behind them. The in-memory implementations back tests and single-process
//! deployments. The graph store merge-upserts by node id, so at-least-once
//! redelivery of a batch is harmless.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use codemap_types::{Edge, GraphNode, Job, JobId, JobStatus, NodeId, ProjectId};
use serde::Serialize;

/// A registered project: the analysis target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub root_path: PathBuf,
}

/// Materialized graph for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

/// Graph persistence keyed by job.
pub trait GraphStore: Send + Sync + 'static {
    fn add_nodes(&self, job: JobId, nodes: &[GraphNode]) -> impl Future<Output = ()> + Send;
    fn add_edges(&self, job: JobId, edges: &[Edge]) -> impl Future<Output = ()> + Send;
    fn project_graph(&self, job: JobId) -> impl Future<Output = ProjectGraph> + Send;
    /// Remove everything committed for a job. Rollback after a failed run.
    fn delete_project(&self, job: JobId) -> impl Future<Output = ()> + Send;
}

/// Durable job records. The orchestrator is the sole writer.
pub trait JobStore: Send + Sync + 'static {
    fn put(&self, job: Job) -> impl Future<Output = ()> + Send;
    fn get(&self, id: JobId) -> impl Future<Output = Option<Job>> + Send;
    fn latest_for_project(&self, project: ProjectId) -> impl Future<Output = Option<Job>> + Send;
    fn with_status(&self, status: JobStatus) -> impl Future<Output = Vec<Job>> + Send;
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, GraphNode>,
    edges: Vec<Edge>,
}

#[derive(Default)]
pub struct MemoryGraphStore {
    state: Mutex<HashMap<JobId, GraphState>>,
}

impl GraphStore for MemoryGraphStore {
    async fn add_nodes(&self, job: JobId, nodes: &[GraphNode]) {
        let mut state = self.state.lock().unwrap();
        let graph = state.entry(job).or_default();
        for node in nodes {
            graph.nodes.insert(node.id, node.clone());
        }
    }

    async fn add_edges(&self, job: JobId, edges: &[Edge]) {
        let mut state = self.state.lock().unwrap();
        let graph = state.entry(job).or_default();
        for edge in edges {
            if !graph.edges.contains(edge) {
                graph.edges.push(*edge);
            }
        }
    }

    async fn project_graph(&self, job: JobId) -> ProjectGraph {
        let state = self.state.lock().unwrap();
        state.get(&job).map_or_else(ProjectGraph::default, |graph| ProjectGraph {
            nodes: graph.nodes.values().cloned().collect(),
            edges: graph.edges.clone(),
        })
    }

    async fn delete_project(&self, job: JobId) {
        self.state.lock().unwrap().remove(&job);
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl JobStore for MemoryJobStore {
    async fn put(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    async fn latest_for_project(&self, project: ProjectId) -> Option<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .filter(|j| j.project_id == project)
            .max_by_key(|j| j.created_at)
            .cloned()
    }

    async fn with_status(&self, status: JobStatus) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap();
        jobs.values().filter(|j| j.status == status).cloned().collect()
    }
}
