//! Analysis job record.
//!
//! One row per analysis run. The orchestrator is the sole writer; everything
//! else reads snapshots through the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Stopped,
    Completed,
    Error,
}

impl JobStatus {
    /// Terminal jobs never transition again; stopped jobs may resume.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub status: JobStatus,
    /// Progress percentage (0-100).
    pub progress: u8,
    /// Current operation description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error message if status is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last analysis checkpoint, serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,
    /// Monotonically increasing broadcast sequence counter.
    pub sequence: u64,
    pub analyzer_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(project_id: ProjectId, analyzer_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id,
            status: JobStatus::Pending,
            progress: 0,
            message: Some("Starting analysis...".to_string()),
            error: None,
            checkpoint: None,
            sequence: 0,
            analyzer_type: analyzer_type.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
