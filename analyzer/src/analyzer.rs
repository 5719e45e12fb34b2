//! The analyzer loop: drains the priority queue and emits graph batches.
//!
//! One batch per processed file, a `complete` batch at the end, an `error`
//! batch only when the run itself cannot proceed. A single bad file is
//! recorded and skipped, never fatal.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use codemap_lsp::{Launcher, SessionPool, parse_symbol, path_to_file_uri};
use codemap_types::{
    AnalysisError, AnalysisStats, BatchStatus, BatchUpdate, CheckpointSnapshot, Edge, FailedFile,
    GraphNode, Language, NodeId, NodeKind, ProjectId, RelationKind, detect_config,
    detect_language,
};
use tokio::sync::mpsc;

use crate::checkpoint::CheckpointStore;
use crate::queue::{ProcessingQueue, QueuedFile};
use crate::symbols::{SymbolRegistry, map_symbol};
use crate::walk::{FileFilter, walk_project};

/// Where symbol lists come from. Production resolves through the session
/// pool; tests substitute canned payloads.
pub trait SymbolSource: Send + Sync + 'static {
    fn document_symbols(
        &self,
        language: Language,
        uri: &str,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, AnalysisError>> + Send;

    /// Release any underlying sessions. Defaults to a no-op for sources
    /// that hold nothing.
    fn dispose(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

impl<T: SymbolSource> SymbolSource for Arc<T> {
    async fn document_symbols(
        &self,
        language: Language,
        uri: &str,
    ) -> Result<Vec<serde_json::Value>, AnalysisError> {
        T::document_symbols(self, language, uri).await
    }

    async fn dispose(&self) {
        T::dispose(self).await;
    }
}

/// Symbol source backed by the pooled language-server sessions.
pub struct PoolSymbolSource<L: Launcher> {
    pool: Arc<SessionPool<L>>,
}

impl<L: Launcher> PoolSymbolSource<L> {
    #[must_use]
    pub fn new(pool: Arc<SessionPool<L>>) -> Self {
        Self { pool }
    }
}

impl<L: Launcher> SymbolSource for PoolSymbolSource<L> {
    async fn document_symbols(
        &self,
        language: Language,
        uri: &str,
    ) -> Result<Vec<serde_json::Value>, AnalysisError> {
        let session = self.pool.acquire(language).await?;
        Ok(session.document_symbols(uri).await?)
    }

    async fn dispose(&self) {
        self.pool.dispose_all().await;
    }
}

#[derive(Default)]
struct StepOutput {
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,
}

pub struct ProjectAnalyzer<S> {
    project_id: ProjectId,
    root: PathBuf,
    source: S,
    filter: FileFilter,
    queue: ProcessingQueue,
    checkpoint: CheckpointStore,
    registry: Mutex<SymbolRegistry>,
    seen_nodes: Mutex<HashSet<(NodeId, String)>>,
    seen_edges: Mutex<HashSet<(NodeId, NodeId, RelationKind)>>,
    stopped: AtomicBool,
    disposed: AtomicBool,
    total_files: AtomicU64,
}

impl<S: SymbolSource> ProjectAnalyzer<S> {
    pub fn new(
        project_id: ProjectId,
        root: PathBuf,
        source: S,
        filter: FileFilter,
        checkpoint: Option<CheckpointSnapshot>,
    ) -> Self {
        let checkpoint = match checkpoint {
            Some(snapshot) => CheckpointStore::from_snapshot(snapshot),
            None => CheckpointStore::new(),
        };
        Self {
            project_id,
            root,
            source,
            filter,
            queue: ProcessingQueue::default(),
            checkpoint,
            registry: Mutex::new(SymbolRegistry::default()),
            seen_nodes: Mutex::new(HashSet::new()),
            seen_edges: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            total_files: AtomicU64::new(0),
        }
    }

    /// Request cancellation. The flag is polled at the top of the loop and
    /// before each symbol request; safe to call more than once.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Flush local state. A second call is a no-op. The checkpoint survives
    /// so a later run can resume.
    pub fn cleanup(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.lock().unwrap().clear();
        self.queue.cleanup();
    }

    #[must_use]
    pub fn snapshot(&self) -> CheckpointSnapshot {
        self.checkpoint.snapshot()
    }

    #[must_use]
    pub fn failed_files(&self) -> Vec<FailedFile> {
        self.checkpoint.failed_files()
    }

    /// Drive the full analysis, sending one batch per step into `tx` until
    /// the tree is classified, the receiver goes away, or `stop` is called.
    pub async fn run(&self, tx: &mpsc::Sender<BatchUpdate>) {
        if !self.root.is_dir() {
            let message = format!("project root is not a directory: {}", self.root.display());
            tracing::error!("{message}");
            let _ = tx.send(BatchUpdate::fatal(message, self.statistics())).await;
            return;
        }

        let discovered = walk_project(&self.root, &self.filter);
        self.total_files
            .store(discovered.len() as u64, Ordering::SeqCst);
        self.queue.add_files(
            discovered
                .into_iter()
                .filter(|(path, _)| !self.checkpoint.is_processed(path))
                .map(|(path, size)| QueuedFile::classify(path, size, &self.root)),
        );

        let project_node = self.project_node();
        let project_node_id = project_node.id;
        let mut first = BatchUpdate::status_only(BatchStatus::StructureComplete, self.statistics());
        first.nodes.push(project_node);
        if tx.send(first).await.is_err() {
            return;
        }

        while !self.is_stopped() && self.queue.has_more() {
            let Some(item) = self.queue.next() else {
                break;
            };
            let batch = self.process_step(&item, project_node_id).await;
            if tx.send(batch).await.is_err() {
                self.stop();
                break;
            }
        }

        if self.is_stopped() {
            self.cleanup();
            return;
        }

        self.cleanup();
        let _ = tx
            .send(BatchUpdate::status_only(BatchStatus::Complete, self.statistics()))
            .await;
    }

    async fn process_step(&self, item: &QueuedFile, project_node: NodeId) -> BatchUpdate {
        let path = item.path.clone();
        let key = path.to_string_lossy().into_owned();
        match self.process_file(item, project_node).await {
            Ok(output) => {
                self.queue.mark_completed(&path);
                self.checkpoint.mark_completed(&path);
                let mut batch =
                    BatchUpdate::status_only(BatchStatus::StructureComplete, self.statistics());
                batch.nodes = output.nodes;
                batch.edges = output.edges;
                batch.processed_files.push(key);
                batch.statistics = self.statistics();
                batch
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), "file processing failed: {e}");
                let position = self.checkpoint.last_position(&path);
                self.checkpoint.mark_failed(&path, &e.to_string(), position);
                self.queue.mark_failed(&path);

                let record = self.checkpoint.failed_info(&path).unwrap_or_default();
                let mut batch =
                    BatchUpdate::status_only(BatchStatus::StructureComplete, self.statistics());
                batch.failed_files.push(FailedFile {
                    path: key,
                    retry_count: record.retry_count,
                    last_error: record.last_error,
                    last_position: record.last_position,
                });
                batch
            }
        }
    }

    async fn process_file(
        &self,
        item: &QueuedFile,
        project_node: NodeId,
    ) -> Result<StepOutput, AnalysisError> {
        let path = &item.path;
        self.checkpoint
            .mark_in_progress(path, self.checkpoint.last_position(path));

        let uri = path_to_file_uri(path)
            .map_err(|e| AnalysisError::FileProcessing {
                path: path.to_string_lossy().into_owned(),
                message: e.to_string(),
            })?
            .to_string();
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());

        let mut output = StepOutput::default();

        if let Some(config_type) = detect_config(path) {
            let node = GraphNode::new(uri, name, NodeKind::Config, self.project_id)
                .with_config_type(config_type);
            let node_id = node.id;
            self.push_node(&mut output, node);
            self.push_edge(&mut output, Edge::new(project_node, node_id, RelationKind::Contains));
            return Ok(output);
        }

        let file_node = GraphNode::new(uri.clone(), name, NodeKind::File, self.project_id);
        let file_id = file_node.id;
        self.push_node(&mut output, file_node);
        self.push_edge(&mut output, Edge::new(project_node, file_id, RelationKind::Contains));

        let Some(language) = detect_language(path) else {
            return Ok(output);
        };
        if self.is_stopped() {
            return Ok(output);
        }

        match self.source.document_symbols(language, &uri).await {
            Ok(raw_symbols) => {
                let origin = path.to_string_lossy();
                for raw in raw_symbols {
                    let Some(symbol) = parse_symbol(&raw) else {
                        tracing::trace!("skipping unparseable symbol payload");
                        continue;
                    };
                    let node = map_symbol(&symbol, self.project_id, &origin);
                    self.registry.lock().unwrap().record(&node, raw, &origin);
                    let symbol_id = node.id;
                    self.push_node(&mut output, node);
                    self.push_edge(
                        &mut output,
                        Edge::new(file_id, symbol_id, RelationKind::Contains),
                    );
                }
            }
            Err(e) => {
                // The file is still represented by its bare node; symbol
                // failure is degradation, not a per-file failure.
                tracing::warn!(
                    file = %path.display(),
                    language = language.as_str(),
                    "symbol request failed, keeping bare file node: {e}"
                );
            }
        }
        Ok(output)
    }

    fn project_node(&self) -> GraphNode {
        let uri = path_to_file_uri(&self.root)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.root.to_string_lossy().into_owned());
        let name = self
            .root
            .file_name()
            .map_or_else(|| self.root.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
        let node = GraphNode::new(uri, name, NodeKind::Project, self.project_id);
        self.seen_nodes.lock().unwrap().insert(node.dedup_key());
        node
    }

    fn push_node(&self, output: &mut StepOutput, node: GraphNode) {
        if self.seen_nodes.lock().unwrap().insert(node.dedup_key()) {
            output.nodes.push(node);
        }
    }

    fn push_edge(&self, output: &mut StepOutput, edge: Edge) {
        if self.seen_edges.lock().unwrap().insert(edge.dedup_key()) {
            output.edges.push(edge);
        }
    }

    fn statistics(&self) -> AnalysisStats {
        let stats = self.checkpoint.stats();
        AnalysisStats {
            total_files: self.total_files.load(Ordering::SeqCst),
            failed_files: self.checkpoint.failed_files().len() as u64,
            total_processed: stats.total_processed,
            total_failed: stats.total_failed,
        }
    }
}
