//! Batch payloads emitted by one analysis step.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Position;
use crate::graph::{Edge, GraphNode};

/// Status tag on a batch: `structure_complete` while the queue is being
/// drained, `complete` on final cleanup, `error` on fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    StructureComplete,
    Complete,
    Error,
}

/// Aggregate statistics attached to every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub total_files: u64,
    #[serde(default)]
    pub failed_files: u64,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_failed: u64,
}

/// A file that failed during this step, with retry metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub retry_count: u32,
    pub last_error: String,
    pub last_position: Position,
}

/// One bounded unit of analysis output: new graph elements plus the files
/// resolved this step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
    pub processed_files: Vec<String>,
    pub failed_files: Vec<FailedFile>,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub statistics: AnalysisStats,
}

impl BatchUpdate {
    /// An empty batch carrying only a status and statistics.
    #[must_use]
    pub fn status_only(status: BatchStatus, statistics: AnalysisStats) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            processed_files: Vec::new(),
            failed_files: Vec::new(),
            status,
            error: None,
            statistics,
        }
    }

    /// The terminal batch for a fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>, statistics: AnalysisStats) -> Self {
        let mut batch = Self::status_only(BatchStatus::Error, statistics);
        batch.error = Some(message.into());
        batch
    }

    /// Whether this batch changed any durable state worth checkpointing.
    #[must_use]
    pub fn has_progress(&self) -> bool {
        !self.processed_files.is_empty() || !self.failed_files.is_empty()
    }
}
