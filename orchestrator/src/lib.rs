//! Job orchestration: start, stop, resume and dispose analysis runs, persist
//! their output, and deliver ordered batch messages to subscribers.

mod hub;
mod orchestrator;
mod store;
mod wire;

pub use hub::SubscriberHub;
pub use orchestrator::{AnalysisOrchestrator, StartOutcome};
pub use store::{
    GraphStore, JobStore, MemoryGraphStore, MemoryJobStore, ProjectGraph, ProjectRecord,
};
pub use wire::WireMessage;
