//! Core domain types for codemap.
//!
//! This crate contains pure domain types with no IO and no async: graph
//! nodes and edges, job records, batch payloads, checkpoint snapshots, the
//! error taxonomy, and the declarative file classifiers. Everything here can
//! be used from any layer of the pipeline.

mod batch;
mod checkpoint;
mod classify;
mod error;
mod graph;
mod ids;
mod job;

pub use batch::{AnalysisStats, BatchStatus, BatchUpdate, FailedFile};
pub use checkpoint::{CheckpointSnapshot, CheckpointStats, FailureRecord, Position};
pub use classify::{
    ConfigType, Language, PriorityTier, detect_config, detect_language, detect_priority,
};
pub use error::{AnalysisError, ProtocolError, TransportError};
pub use graph::{Edge, GraphNode, Location, NodeKind, RelationKind};
pub use ids::{JobId, NodeId, ProjectId};
pub use job::{Job, JobStatus};
