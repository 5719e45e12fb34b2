//! File discovery, prioritized processing, checkpointed progress and the
//! analyzer loop that turns a project tree into graph batches.

mod analyzer;
mod checkpoint;
mod queue;
mod symbols;
mod walk;

pub use analyzer::{PoolSymbolSource, ProjectAnalyzer, SymbolSource};
pub use checkpoint::CheckpointStore;
pub use queue::{ProcessingQueue, QueueStatus, QueuedFile};
pub use symbols::{RegisteredSymbol, SymbolRegistry, map_symbol, node_kind_for};
pub use walk::{FileFilter, walk_project};
