//! Serializable checkpoint snapshot.
//!
//! The snapshot is the durable shape of per-file progress stored on the job
//! record. Every field defaults when missing so a snapshot written by an
//! older run still loads.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Cursor position inside a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Retry bookkeeping for a file that failed processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub retry_count: u32,
    pub last_error: String,
    pub last_position: Position,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub total_processed: u64,
    pub total_failed: u64,
    pub retry_count: u64,
}

/// Deep copy of the checkpoint store's state, safe to serialize and reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    #[serde(default)]
    pub processed_files: BTreeSet<String>,
    #[serde(default)]
    pub in_progress: BTreeSet<String>,
    #[serde(default)]
    pub failed_files: BTreeMap<String, FailureRecord>,
    #[serde(default)]
    pub file_positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub statistics: CheckpointStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_on_load() {
        let snapshot: CheckpointSnapshot =
            serde_json::from_value(serde_json::json!({ "processed_files": ["a.py"] })).unwrap();
        assert!(snapshot.processed_files.contains("a.py"));
        assert!(snapshot.in_progress.is_empty());
        assert!(snapshot.failed_files.is_empty());
        assert_eq!(snapshot.statistics, CheckpointStats::default());
    }

    #[test]
    fn snapshot_roundtrips() {
        let mut snapshot = CheckpointSnapshot::default();
        snapshot.processed_files.insert("a.py".to_string());
        snapshot.failed_files.insert(
            "b.py".to_string(),
            FailureRecord {
                retry_count: 2,
                last_error: "boom".to_string(),
                last_position: Position { line: 4, character: 1 },
            },
        );
        snapshot.statistics.total_processed = 1;

        let json = serde_json::to_value(&snapshot).unwrap();
        let back: CheckpointSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
