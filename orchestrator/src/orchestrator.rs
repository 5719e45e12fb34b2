//! Analysis job lifecycle.
//!
//! One cancellable task per running job drives the analyzer, persists every
//! batch, stamps it with the job's sequence counter and fans it out through
//! the subscriber hub. Stopping a job saves its checkpoint; restarting a
//! stopped job resumes from it. A failed run rolls its graph back so a retry
//! starts clean.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use codemap_analyzer::{FileFilter, ProjectAnalyzer, SymbolSource};
use codemap_types::{
    AnalysisError, AnalysisStats, BatchStatus, BatchUpdate, CheckpointSnapshot, Job, JobId,
    JobStatus, ProjectId,
};
use tokio::sync::mpsc;

use crate::hub::SubscriberHub;
use crate::store::{GraphStore, JobStore, ProjectGraph, ProjectRecord};
use crate::wire::WireMessage;

const SUPPORTED_ANALYZERS: &[&str] = &["package"];

const BATCH_CHANNEL_CAPACITY: usize = 32;

/// What `start_analysis` did for the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A fresh job was created and launched.
    Started(JobId),
    /// A stopped job was relaunched from its checkpoint.
    Resumed(JobId),
    /// The project already has a live job; attach to it.
    AlreadyRunning(JobId),
    /// The latest job is terminal; its graph stands.
    AlreadyCompleted(JobId),
}

impl StartOutcome {
    #[must_use]
    pub fn job_id(self) -> JobId {
        match self {
            Self::Started(id)
            | Self::Resumed(id)
            | Self::AlreadyRunning(id)
            | Self::AlreadyCompleted(id) => id,
        }
    }
}

struct RunningJob<S> {
    analyzer: Arc<ProjectAnalyzer<Arc<S>>>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct AnalysisOrchestrator<S, G, J> {
    source: Arc<S>,
    graph: Arc<G>,
    jobs: Arc<J>,
    hub: Arc<SubscriberHub>,
    projects: Mutex<HashMap<ProjectId, ProjectRecord>>,
    running: Mutex<HashMap<JobId, RunningJob<S>>>,
    disposed: AtomicBool,
}

impl<S, G, J> AnalysisOrchestrator<S, G, J>
where
    S: SymbolSource,
    G: GraphStore,
    J: JobStore,
{
    #[must_use]
    pub fn new(source: S, graph: G, jobs: J) -> Arc<Self> {
        Arc::new(Self {
            source: Arc::new(source),
            graph: Arc::new(graph),
            jobs: Arc::new(jobs),
            hub: Arc::new(SubscriberHub::default()),
            projects: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn register_project(&self, name: impl Into<String>, root_path: PathBuf) -> ProjectRecord {
        let record = ProjectRecord {
            id: ProjectId::new(),
            name: name.into(),
            root_path,
        };
        self.projects
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        record
    }

    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<ProjectRecord> {
        self.projects.lock().unwrap().get(&id).cloned()
    }

    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.get(id).await
    }

    #[must_use]
    pub fn is_job_active(&self, id: JobId) -> bool {
        self.running.lock().unwrap().contains_key(&id)
    }

    /// Start (or attach to, or resume) analysis for a project. Returns as
    /// soon as the background task is launched.
    pub async fn start_analysis(
        self: &Arc<Self>,
        project_id: ProjectId,
        analyzer_type: &str,
    ) -> Result<StartOutcome, AnalysisError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AnalysisError::Fatal("orchestrator is disposed".to_string()));
        }
        if !SUPPORTED_ANALYZERS.contains(&analyzer_type) {
            return Err(AnalysisError::UnknownAnalyzer(analyzer_type.to_string()));
        }
        let record = self
            .project(project_id)
            .ok_or(AnalysisError::ProjectNotFound(project_id))?;
        if !record.root_path.is_dir() {
            return Err(AnalysisError::ProjectPathMissing(
                record.root_path.display().to_string(),
            ));
        }

        if let Some(previous) = self.jobs.latest_for_project(project_id).await {
            match previous.status {
                JobStatus::Running => return Ok(StartOutcome::AlreadyRunning(previous.id)),
                JobStatus::Completed | JobStatus::Error => {
                    return Ok(StartOutcome::AlreadyCompleted(previous.id));
                }
                JobStatus::Stopped => {
                    let checkpoint: Option<CheckpointSnapshot> = previous
                        .checkpoint
                        .clone()
                        .and_then(|value| serde_json::from_value(value).ok());
                    let mut job = previous;
                    let job_id = job.id;
                    job.status = JobStatus::Running;
                    job.message = Some("Resuming analysis...".to_string());
                    job.error = None;
                    job.updated_at = Utc::now();
                    self.jobs.put(job.clone()).await;
                    tracing::info!(job = %job_id, project = %project_id, "resuming analysis");
                    self.spawn_run(job, &record, checkpoint);
                    return Ok(StartOutcome::Resumed(job_id));
                }
                JobStatus::Pending => {}
            }
        }

        let mut job = Job::new(project_id, analyzer_type);
        job.status = JobStatus::Running;
        let job_id = job.id;
        self.jobs.put(job.clone()).await;
        tracing::info!(job = %job_id, project = %project_id, "starting analysis");
        self.hub.publish(
            job_id,
            WireMessage::Project {
                job_id,
                project_id,
                name: record.name.clone(),
                root_path: record.root_path.display().to_string(),
            },
        );
        self.spawn_run(job, &record, None);
        Ok(StartOutcome::Started(job_id))
    }

    fn spawn_run(
        self: &Arc<Self>,
        job: Job,
        record: &ProjectRecord,
        checkpoint: Option<CheckpointSnapshot>,
    ) {
        let analyzer = Arc::new(ProjectAnalyzer::new(
            job.project_id,
            record.root_path.clone(),
            self.source.clone(),
            FileFilter::empty(),
            checkpoint,
        ));
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let job_id = job.id;

        let run_analyzer = analyzer.clone();
        let orchestrator = self.clone();
        let consumer_analyzer = analyzer.clone();
        let handle = tokio::spawn(async move {
            let runner = tokio::spawn(async move { run_analyzer.run(&tx).await });
            orchestrator
                .consume_batches(job_id, &consumer_analyzer, rx)
                .await;
            let _ = runner.await;
        });

        self.running
            .lock()
            .unwrap()
            .insert(job_id, RunningJob { analyzer, handle });
    }

    async fn consume_batches(
        self: Arc<Self>,
        job_id: JobId,
        analyzer: &ProjectAnalyzer<Arc<S>>,
        mut rx: mpsc::Receiver<BatchUpdate>,
    ) {
        let mut fatal: Option<String> = None;
        let mut final_stats = AnalysisStats::default();
        while let Some(batch) = rx.recv().await {
            final_stats = batch.statistics;
            match batch.status {
                BatchStatus::Error => {
                    fatal = Some(
                        batch
                            .error
                            .unwrap_or_else(|| "analysis failed".to_string()),
                    );
                }
                BatchStatus::Complete => {}
                BatchStatus::StructureComplete => {
                    self.apply_batch(job_id, analyzer, batch).await;
                }
            }
        }

        if let Some(message) = fatal {
            self.fail_job(job_id, &message).await;
        } else if analyzer.is_stopped() {
            self.stop_job(job_id, analyzer).await;
        } else {
            self.complete_job(job_id, final_stats).await;
        }
        self.running.lock().unwrap().remove(&job_id);
    }

    /// Persist one structure batch, advance the job record, and broadcast.
    async fn apply_batch(
        &self,
        job_id: JobId,
        analyzer: &ProjectAnalyzer<Arc<S>>,
        batch: BatchUpdate,
    ) {
        if !batch.nodes.is_empty() {
            self.graph.add_nodes(job_id, &batch.nodes).await;
        }
        if !batch.edges.is_empty() {
            self.graph.add_edges(job_id, &batch.edges).await;
        }

        let Some(mut job) = self.jobs.get(job_id).await else {
            return;
        };
        if batch.has_progress() {
            // Persist before broadcasting: a restart resumes from exactly
            // this point.
            job.checkpoint = serde_json::to_value(analyzer.snapshot()).ok();
        }
        job.progress = progress_percent(&batch.statistics);
        job.message = Some(format!(
            "Processed {} of {} files",
            batch.statistics.total_processed, batch.statistics.total_files
        ));
        job.sequence += 1;
        job.updated_at = Utc::now();
        let sequence = job.sequence;
        self.jobs.put(job).await;

        self.hub.publish(
            job_id,
            WireMessage::BatchUpdate {
                job_id,
                sequence,
                nodes: batch.nodes,
                edges: batch.edges,
                processed_files: batch.processed_files,
                failed_files: batch.failed_files,
                analysis_stats: batch.statistics,
            },
        );
    }

    async fn complete_job(&self, job_id: JobId, stats: AnalysisStats) {
        let Some(mut job) = self.jobs.get(job_id).await else {
            return;
        };
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.message = Some("Analysis complete".to_string());
        job.sequence += 1;
        job.updated_at = Utc::now();
        let sequence = job.sequence;
        self.jobs.put(job).await;
        tracing::info!(job = %job_id, "analysis complete");

        self.hub.publish(
            job_id,
            WireMessage::AnalysisComplete {
                job_id,
                sequence,
                analysis_stats: stats,
            },
        );
    }

    async fn stop_job(&self, job_id: JobId, analyzer: &ProjectAnalyzer<Arc<S>>) {
        let Some(mut job) = self.jobs.get(job_id).await else {
            return;
        };
        job.status = JobStatus::Stopped;
        job.checkpoint = serde_json::to_value(analyzer.snapshot()).ok();
        job.message = Some("Analysis stopped".to_string());
        job.updated_at = Utc::now();
        let progress = job.progress;
        self.jobs.put(job).await;
        tracing::info!(job = %job_id, "analysis stopped");

        self.hub.publish(
            job_id,
            WireMessage::StatusUpdate {
                job_id,
                status: JobStatus::Stopped,
                progress,
                message: Some("Analysis stopped".to_string()),
                error: None,
            },
        );
    }

    async fn fail_job(&self, job_id: JobId, message: &str) {
        if let Some(mut job) = self.jobs.get(job_id).await {
            job.status = JobStatus::Error;
            job.error = Some(message.to_string());
            job.updated_at = Utc::now();
            self.jobs.put(job).await;
        }
        tracing::error!(job = %job_id, "analysis failed: {message}");

        self.hub.publish(
            job_id,
            WireMessage::AnalysisError {
                job_id,
                error: message.to_string(),
                error_kind: AnalysisError::Fatal(message.to_string()).kind(),
            },
        );
        // Roll back partial graph data so a retry starts from a clean slate.
        self.graph.delete_project(job_id).await;
        // Retained batches reference the deleted graph; end the stream.
        self.hub.close_job(job_id);
    }

    /// Cooperatively cancel a running job and save its checkpoint.
    pub async fn stop_analysis(&self, job_id: JobId) -> Result<(), AnalysisError> {
        let Some(mut job) = self.jobs.get(job_id).await else {
            return Err(AnalysisError::JobNotFound(job_id));
        };

        let analyzer = self
            .running
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|r| r.analyzer.clone());
        if let Some(analyzer) = analyzer {
            // The consumer task is the only writer of a live job's record;
            // it persists the STOPPED status and checkpoint once the batch
            // stream drains.
            analyzer.stop();
            return Ok(());
        }

        if job.status == JobStatus::Running {
            job.status = JobStatus::Stopped;
            job.message = Some("Analysis stopped".to_string());
            job.updated_at = Utc::now();
            self.jobs.put(job.clone()).await;
            tracing::info!(job = %job_id, "analysis stopped");
            self.hub.publish(
                job_id,
                WireMessage::StatusUpdate {
                    job_id,
                    status: JobStatus::Stopped,
                    progress: job.progress,
                    message: job.message,
                    error: None,
                },
            );
        }
        Ok(())
    }

    /// Subscribe to a job's message stream. The current status arrives
    /// first, then retained messages newer than `last_seen`, then live
    /// batches.
    pub async fn subscribe(
        &self,
        job_id: JobId,
        last_seen: u64,
    ) -> Result<mpsc::UnboundedReceiver<WireMessage>, AnalysisError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .ok_or(AnalysisError::JobNotFound(job_id))?;
        let handshake = WireMessage::StatusUpdate {
            job_id,
            status: job.status,
            progress: job.progress,
            message: job.message,
            error: job.error,
        };
        Ok(self.hub.subscribe(job_id, last_seen, handshake))
    }

    pub async fn project_graph(&self, job_id: JobId) -> ProjectGraph {
        self.graph.project_graph(job_id).await
    }

    /// Mark RUNNING jobs with no update since the cutoff as failed.
    pub async fn cleanup_stale_jobs(&self, max_age: chrono::Duration) -> Vec<JobId> {
        let cutoff = Utc::now() - max_age;
        let mut stale = Vec::new();
        for mut job in self.jobs.with_status(JobStatus::Running).await {
            if job.updated_at < cutoff {
                tracing::warn!(job = %job.id, "marking stale job as failed");
                job.status = JobStatus::Error;
                job.error = Some("Analysis timed out".to_string());
                job.updated_at = Utc::now();
                stale.push(job.id);
                self.jobs.put(job).await;
            }
        }
        // A timed-out job never publishes again; end its streams.
        for job_id in &stale {
            self.hub.close_job(*job_id);
        }
        stale
    }

    /// Stop every running job, close all subscriber channels and release the
    /// pooled sessions. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let running: Vec<RunningJob<S>> = {
            let mut map = self.running.lock().unwrap();
            map.drain().map(|(_, job)| job).collect()
        };
        for job in &running {
            job.analyzer.stop();
        }
        for job in running {
            job.handle.abort();
        }
        self.hub.dispose();
        self.source.dispose().await;
        tracing::info!("orchestrator disposed");
    }
}

fn progress_percent(stats: &AnalysisStats) -> u8 {
    if stats.total_files == 0 {
        return 0;
    }
    let done = stats.total_processed + stats.failed_files;
    let percent = done.saturating_mul(100) / stats.total_files;
    u8::try_from(percent.min(99)).unwrap_or(99)
}
