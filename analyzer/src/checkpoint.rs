//! In-memory checkpoint store with serializable snapshots.
//!
//! Each file moves PENDING -> IN_PROGRESS -> COMPLETED or FAILED; a failed
//! file goes back through IN_PROGRESS on retry. Completion purges any prior
//! failure record. Snapshots are deep copies, so a saved checkpoint never
//! aliases live state.

use std::path::Path;
use std::sync::Mutex;

use codemap_types::{
    CheckpointSnapshot, CheckpointStats, FailedFile, FailureRecord, Position,
};

pub struct CheckpointStore {
    state: Mutex<CheckpointSnapshot>,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl CheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CheckpointSnapshot::default()),
        }
    }

    /// Restore from a saved snapshot. The in-progress set from a prior run
    /// cannot be trusted as complete, so it is cleared and those files will
    /// be requeued.
    #[must_use]
    pub fn from_snapshot(snapshot: CheckpointSnapshot) -> Self {
        let store = Self {
            state: Mutex::new(snapshot),
        };
        store.clear_in_progress();
        store
    }

    pub fn mark_in_progress(&self, path: &Path, position: Position) {
        let mut state = self.state.lock().unwrap();
        let key = key(path);
        state.file_positions.insert(key.clone(), position);
        state.in_progress.insert(key);
    }

    pub fn mark_completed(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        let key = key(path);
        state.in_progress.remove(&key);
        state.failed_files.remove(&key);
        if state.processed_files.insert(key) {
            state.statistics.total_processed += 1;
        }
    }

    pub fn mark_failed(&self, path: &Path, error: &str, position: Position) {
        let mut state = self.state.lock().unwrap();
        let key = key(path);
        state.in_progress.remove(&key);
        state.file_positions.insert(key.clone(), position);
        let record = state.failed_files.entry(key).or_default();
        record.retry_count += 1;
        record.last_error = error.to_string();
        record.last_position = position;
        let is_retry = record.retry_count > 1;
        state.statistics.total_failed += 1;
        if is_retry {
            state.statistics.retry_count += 1;
        }
    }

    /// Last recorded cursor for a file; (0,0) when never seen.
    #[must_use]
    pub fn last_position(&self, path: &Path) -> Position {
        let state = self.state.lock().unwrap();
        state
            .file_positions
            .get(&key(path))
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_processed(&self, path: &Path) -> bool {
        self.state.lock().unwrap().processed_files.contains(&key(path))
    }

    #[must_use]
    pub fn failed_info(&self, path: &Path) -> Option<FailureRecord> {
        self.state.lock().unwrap().failed_files.get(&key(path)).cloned()
    }

    #[must_use]
    pub fn failed_files(&self) -> Vec<FailedFile> {
        let state = self.state.lock().unwrap();
        state
            .failed_files
            .iter()
            .map(|(path, record)| FailedFile {
                path: path.clone(),
                retry_count: record.retry_count,
                last_error: record.last_error.clone(),
                last_position: record.last_position,
            })
            .collect()
    }

    #[must_use]
    pub fn in_progress_files(&self) -> Vec<String> {
        self.state.lock().unwrap().in_progress.iter().cloned().collect()
    }

    /// Crash recovery: drop the in-progress set so those files requeue.
    pub fn clear_in_progress(&self) {
        self.state.lock().unwrap().in_progress.clear();
    }

    /// Independent deep copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CheckpointSnapshot {
        self.state.lock().unwrap().clone()
    }

    #[must_use]
    pub fn stats(&self) -> CheckpointStats {
        self.state.lock().unwrap().statistics
    }
}
