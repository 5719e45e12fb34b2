//! Bounded priority queue over the files of one project.
//!
//! Small high-priority files surface first so the graph fills in entry points
//! and public API before bulk sources. The queue tracks at most one in-flight
//! item; the analyzer loop is the only consumer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use codemap_types::{PriorityTier, detect_priority};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// One classified file awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFile {
    pub path: PathBuf,
    pub tier: PriorityTier,
    pub size: u64,
}

impl QueuedFile {
    /// Classify a discovered file against the project root.
    #[must_use]
    pub fn classify(path: PathBuf, size: u64, root: &Path) -> Self {
        let tier = detect_priority(&path, root);
        Self { path, tier, size }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub processed: usize,
    pub failed: usize,
    pub active: bool,
    pub total_added: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct QueueState {
    items: Vec<QueuedFile>,
    in_flight: Option<PathBuf>,
    processed: BTreeSet<PathBuf>,
    failed: BTreeSet<PathBuf>,
    total_added: u64,
    dropped: u64,
}

/// All operations serialize under one lock; nothing awaits while holding it.
pub struct ProcessingQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ProcessingQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Append files up to remaining capacity, then re-sort the whole queue
    /// ascending by (tier, size). Overflow is dropped, not an error. Files
    /// already processed are skipped, which is what makes resume work.
    pub fn add_files(&self, files: impl IntoIterator<Item = QueuedFile>) {
        let mut state = self.state.lock().unwrap();
        let mut dropped = 0_u64;
        for file in files {
            if state.processed.contains(&file.path) {
                continue;
            }
            if state.items.len() >= self.capacity {
                dropped += 1;
                continue;
            }
            state.items.push(file);
            state.total_added += 1;
        }
        if dropped > 0 {
            state.dropped += dropped;
            tracing::warn!(dropped, capacity = self.capacity, "file queue full, dropping overflow");
        }
        // Stable, so equal (tier, size) keeps discovery order.
        state.items.sort_by_key(|f| (f.tier, f.size));
    }

    /// Pop the head and mark it in flight. Returns `None` while an item is
    /// still in flight or the queue is empty.
    pub fn next(&self) -> Option<QueuedFile> {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.is_some() || state.items.is_empty() {
            return None;
        }
        let file = state.items.remove(0);
        state.in_flight = Some(file.path.clone());
        Some(file)
    }

    pub fn mark_completed(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.processed.insert(path.to_path_buf());
        state.failed.remove(path);
        if state.in_flight.as_deref() == Some(path) {
            state.in_flight = None;
        }
    }

    pub fn mark_failed(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.failed.insert(path.to_path_buf());
        if state.in_flight.as_deref() == Some(path) {
            state.in_flight = None;
        }
    }

    /// True while the backing list is non-empty or an item is in flight.
    /// Completion must never be declared with work outstanding.
    #[must_use]
    pub fn has_more(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.items.is_empty() || state.in_flight.is_some()
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock().unwrap();
        QueueStatus {
            queued: state.items.len(),
            processed: state.processed.len(),
            failed: state.failed.len(),
            active: state.in_flight.is_some(),
            total_added: state.total_added,
            dropped: state.dropped,
        }
    }

    /// Clear all state and counters. A second call is a no-op.
    pub fn cleanup(&self) {
        let mut state = self.state.lock().unwrap();
        *state = QueueState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, tier: PriorityTier, size: u64) -> QueuedFile {
        QueuedFile {
            path: PathBuf::from(path),
            tier,
            size,
        }
    }

    #[test]
    fn pops_lowest_tier_then_smallest_size() {
        let queue = ProcessingQueue::default();
        queue.add_files([
            file("big_regular.py", PriorityTier::Regular, 9000),
            file("entry.py", PriorityTier::EntryPoint, 5000),
            file("small_regular.py", PriorityTier::Regular, 10),
            file("api.py", PriorityTier::ExportApi, 100),
        ]);

        let order: Vec<PathBuf> = std::iter::from_fn(|| {
            let next = queue.next()?;
            queue.mark_completed(&next.path);
            Some(next.path)
        })
        .collect();

        assert_eq!(
            order,
            vec![
                PathBuf::from("entry.py"),
                PathBuf::from("api.py"),
                PathBuf::from("small_regular.py"),
                PathBuf::from("big_regular.py"),
            ]
        );
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let queue = ProcessingQueue::default();
        queue.add_files([
            file("first.py", PriorityTier::Regular, 42),
            file("second.py", PriorityTier::Regular, 42),
        ]);
        assert_eq!(queue.next().unwrap().path, PathBuf::from("first.py"));
    }

    #[test]
    fn overflow_is_dropped_silently() {
        let queue = ProcessingQueue::new(2);
        queue.add_files([
            file("a.py", PriorityTier::Regular, 1),
            file("b.py", PriorityTier::Regular, 2),
            file("c.py", PriorityTier::Regular, 3),
        ]);
        let status = queue.status();
        assert_eq!(status.queued, 2);
        assert_eq!(status.dropped, 1);
    }

    #[test]
    fn bound_holds_across_repeated_adds() {
        let queue = ProcessingQueue::new(3);
        for round in 0..5 {
            queue.add_files((0..3).map(|i| {
                file(&format!("r{round}_f{i}.py"), PriorityTier::Regular, i)
            }));
            assert!(queue.status().queued <= 3);
        }
    }

    #[test]
    fn single_in_flight_item() {
        let queue = ProcessingQueue::default();
        queue.add_files([
            file("a.py", PriorityTier::Regular, 1),
            file("b.py", PriorityTier::Regular, 2),
        ]);
        let first = queue.next().unwrap();
        assert!(queue.next().is_none());
        queue.mark_completed(&first.path);
        assert!(queue.next().is_some());
    }

    #[test]
    fn has_more_counts_in_flight_work() {
        let queue = ProcessingQueue::default();
        queue.add_files([file("a.py", PriorityTier::Regular, 1)]);
        let item = queue.next().unwrap();
        assert!(queue.has_more());
        queue.mark_completed(&item.path);
        assert!(!queue.has_more());
    }

    #[test]
    fn processed_files_are_not_requeued() {
        let queue = ProcessingQueue::default();
        queue.add_files([file("a.py", PriorityTier::Regular, 1)]);
        let item = queue.next().unwrap();
        queue.mark_completed(&item.path);

        queue.add_files([file("a.py", PriorityTier::Regular, 1)]);
        assert!(!queue.has_more());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let queue = ProcessingQueue::default();
        queue.add_files([file("a.py", PriorityTier::Regular, 1)]);
        queue.cleanup();
        queue.cleanup();
        assert_eq!(queue.status(), QueueStatus::default());
    }

    #[test]
    fn classify_uses_root_relative_rules() {
        let root = Path::new("/proj");
        let entry = QueuedFile::classify(PathBuf::from("/proj/main.py"), 10, root);
        assert_eq!(entry.tier, PriorityTier::EntryPoint);
        let nested = QueuedFile::classify(PathBuf::from("/proj/pkg/util.py"), 10, root);
        assert_eq!(nested.tier, PriorityTier::Regular);
    }
}
