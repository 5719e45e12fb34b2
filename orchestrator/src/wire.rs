//! Messages delivered to job subscribers.
//!
//! Tagged with `type` on the wire; node and edge payloads mirror the graph
//! store's persisted shape.

use codemap_types::{
    AnalysisStats, Edge, FailedFile, GraphNode, JobId, JobStatus, ProjectId,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Project {
        job_id: JobId,
        project_id: ProjectId,
        name: String,
        root_path: String,
    },
    BatchUpdate {
        job_id: JobId,
        sequence: u64,
        nodes: Vec<GraphNode>,
        edges: Vec<Edge>,
        processed_files: Vec<String>,
        failed_files: Vec<FailedFile>,
        analysis_stats: AnalysisStats,
    },
    StatusUpdate {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AnalysisComplete {
        job_id: JobId,
        sequence: u64,
        analysis_stats: AnalysisStats,
    },
    AnalysisError {
        job_id: JobId,
        error: String,
        error_kind: &'static str,
    },
    Error {
        message: String,
    },
}

impl WireMessage {
    /// Sequence number for ordered messages; `None` for out-of-band ones.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::BatchUpdate { sequence, .. } | Self::AnalysisComplete { sequence, .. } => {
                Some(*sequence)
            }
            _ => None,
        }
    }
}
