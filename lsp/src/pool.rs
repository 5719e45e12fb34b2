//! Bounded per-language session pool.
//!
//! Sessions are expensive (a subprocess plus an initialize handshake), so the
//! pool caps them per language, hands them out one caller at a time, and
//! reclaims idle ones on a timer while always keeping at least one warm
//! session per language that ever had one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codemap_types::{AnalysisError, Language, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::ProtocolClient;
use crate::commands::server_command;
use crate::protocol::path_to_file_uri;

/// How long a finished session gets to exit after `shutdown`/`exit` before
/// it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_sessions_per_language: usize,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_language: 3,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A freshly launched session: the protocol client, already initialized, and
/// the subprocess handle when one exists.
pub struct LaunchedSession {
    pub client: ProtocolClient,
    pub child: Option<Child>,
}

/// Session factory. The production launcher spawns real server binaries;
/// tests substitute in-memory transports.
pub trait Launcher: Send + Sync + 'static {
    fn launch(
        &self,
        language: Language,
        workspace_root: &Path,
    ) -> impl Future<Output = Result<LaunchedSession, TransportError>> + Send;
}

struct Session {
    id: u64,
    client: Arc<ProtocolClient>,
    child: Option<Child>,
    busy: bool,
    idle_since: Instant,
}

struct LanguagePool {
    sessions: Vec<Session>,
    /// Launches in flight; counted against capacity so concurrent acquires
    /// cannot overshoot the cap.
    starting: usize,
    /// Set on the first failed launch; the language stays down for the life
    /// of the pool rather than retrying a binary that is not there.
    unavailable: bool,
    /// Bumped on every release, teardown, or availability change; waiters
    /// subscribe under the lock so no wakeup can be lost.
    events: watch::Sender<u64>,
}

impl Default for LanguagePool {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            starting: 0,
            unavailable: false,
            events: watch::Sender::new(0),
        }
    }
}

impl LanguagePool {
    fn bump(&self) {
        self.events.send_modify(|v| *v += 1);
    }
}

struct PoolShared {
    config: PoolConfig,
    languages: Mutex<HashMap<Language, LanguagePool>>,
    next_session_id: AtomicU64,
}

/// Per-language counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub language: Language,
    pub total: usize,
    pub busy: usize,
}

/// Exclusive lease on one session. Dropping the handle returns the session
/// to the idle set and wakes one waiter.
pub struct SessionHandle {
    client: Arc<ProtocolClient>,
    language: Language,
    session_id: u64,
    shared: Arc<PoolShared>,
}

impl SessionHandle {
    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("language", &self.language)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = ProtocolClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let mut map = self.shared.languages.lock().unwrap();
        if let Some(pool) = map.get_mut(&self.language) {
            if let Some(session) = pool.sessions.iter_mut().find(|s| s.id == self.session_id) {
                session.busy = false;
                session.idle_since = Instant::now();
            }
            pool.bump();
        }
    }
}

enum AcquirePlan {
    Ready(u64, Arc<ProtocolClient>),
    Launch,
    Wait(watch::Receiver<u64>),
}

pub struct SessionPool<L> {
    shared: Arc<PoolShared>,
    launcher: L,
    workspace_root: PathBuf,
    sweeper: tokio::task::JoinHandle<()>,
}

impl<L: Launcher> SessionPool<L> {
    pub fn new(launcher: L, workspace_root: PathBuf, config: PoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            config,
            languages: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(0),
        });

        let sweep_shared = shared.clone();
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let expired = collect_expired(&sweep_shared);
                for session in expired {
                    teardown(session).await;
                }
            }
        });

        Self {
            shared,
            launcher,
            workspace_root,
            sweeper,
        }
    }

    /// Check out a session for `language`, launching one if the pool has
    /// headroom, otherwise waiting for a release.
    pub async fn acquire(&self, language: Language) -> Result<SessionHandle, AnalysisError> {
        loop {
            let plan = {
                let mut map = self.shared.languages.lock().unwrap();
                let pool = map.entry(language).or_default();
                if pool.unavailable {
                    return Err(AnalysisError::SessionUnavailable {
                        language: language.as_str().to_string(),
                    });
                }
                if let Some(session) = pool.sessions.iter_mut().find(|s| !s.busy) {
                    session.busy = true;
                    AcquirePlan::Ready(session.id, session.client.clone())
                } else if pool.sessions.len() + pool.starting
                    < self.shared.config.max_sessions_per_language
                {
                    pool.starting += 1;
                    AcquirePlan::Launch
                } else {
                    AcquirePlan::Wait(pool.events.subscribe())
                }
            };

            match plan {
                AcquirePlan::Ready(session_id, client) => {
                    return Ok(SessionHandle {
                        client,
                        language,
                        session_id,
                        shared: self.shared.clone(),
                    });
                }
                AcquirePlan::Launch => return self.launch_session(language).await,
                AcquirePlan::Wait(mut events) => {
                    // Cannot miss a release: the receiver was subscribed
                    // while the lock was held.
                    if events.changed().await.is_err() {
                        return Err(AnalysisError::SessionUnavailable {
                            language: language.as_str().to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Pre-warm one session for `language`. Returns whether the language has
    /// a usable session afterwards.
    pub async fn start_session(&self, language: Language) -> bool {
        {
            let mut map = self.shared.languages.lock().unwrap();
            let pool = map.entry(language).or_default();
            if pool.unavailable {
                return false;
            }
            if !pool.sessions.is_empty() {
                return true;
            }
            pool.starting += 1;
        }

        match self.launch_session_inner(language).await {
            Ok(_) => true,
            Err(_) => false,
        }
    }

    async fn launch_session(&self, language: Language) -> Result<SessionHandle, AnalysisError> {
        let session_id = self.launch_session_inner(language).await?;

        let mut map = self.shared.languages.lock().unwrap();
        let pool = map
            .get_mut(&language)
            .ok_or(AnalysisError::SessionUnavailable {
                language: language.as_str().to_string(),
            })?;
        let session = pool
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(AnalysisError::SessionUnavailable {
                language: language.as_str().to_string(),
            })?;
        session.busy = true;
        Ok(SessionHandle {
            client: session.client.clone(),
            language,
            session_id,
            shared: self.shared.clone(),
        })
    }

    /// Launch and register one idle session. The caller has already counted
    /// the launch in `starting`.
    async fn launch_session_inner(&self, language: Language) -> Result<u64, AnalysisError> {
        let launched = self.launcher.launch(language, &self.workspace_root).await;

        let mut map = self.shared.languages.lock().unwrap();
        let pool = map.entry(language).or_default();
        pool.starting = pool.starting.saturating_sub(1);

        match launched {
            Ok(session) => {
                let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
                pool.sessions.push(Session {
                    id,
                    client: Arc::new(session.client),
                    child: session.child,
                    busy: false,
                    idle_since: Instant::now(),
                });
                pool.bump();
                Ok(id)
            }
            Err(e) => {
                tracing::warn!(language = language.as_str(), "language server launch failed: {e}");
                pool.unavailable = true;
                pool.bump();
                Err(AnalysisError::SessionUnavailable {
                    language: language.as_str().to_string(),
                })
            }
        }
    }

    /// Tear down every session for one language.
    pub async fn stop_language(&self, language: Language) {
        let sessions = {
            let mut map = self.shared.languages.lock().unwrap();
            match map.get_mut(&language) {
                Some(pool) => {
                    let drained = std::mem::take(&mut pool.sessions);
                    pool.bump();
                    drained
                }
                None => Vec::new(),
            }
        };
        for session in sessions {
            teardown(session).await;
        }
    }

    /// Tear down every session across every language. Safe to call again
    /// after completion.
    pub async fn dispose_all(&self) {
        let sessions: Vec<Session> = {
            let mut map = self.shared.languages.lock().unwrap();
            map.values_mut()
                .flat_map(|pool| {
                    pool.bump();
                    std::mem::take(&mut pool.sessions)
                })
                .collect()
        };
        for session in sessions {
            teardown(session).await;
        }
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        let map = self.shared.languages.lock().unwrap();
        let mut statuses: Vec<SessionStatus> = map
            .iter()
            .map(|(language, pool)| SessionStatus {
                language: *language,
                total: pool.sessions.len(),
                busy: pool.sessions.iter().filter(|s| s.busy).count(),
            })
            .collect();
        statuses.sort_by_key(|s| s.language.as_str());
        statuses
    }
}

impl<L> Drop for SessionPool<L> {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

/// Pull out idle sessions past the timeout, always leaving at least one
/// session per language.
fn collect_expired(shared: &PoolShared) -> Vec<Session> {
    let mut expired = Vec::new();
    let mut map = shared.languages.lock().unwrap();
    for pool in map.values_mut() {
        let mut index = 0;
        while index < pool.sessions.len() {
            if pool.sessions.len() <= 1 {
                break;
            }
            let session = &pool.sessions[index];
            if !session.busy && session.idle_since.elapsed() >= shared.config.idle_timeout {
                expired.push(pool.sessions.remove(index));
            } else {
                index += 1;
            }
        }
        if !expired.is_empty() {
            pool.bump();
        }
    }
    expired
}

async fn teardown(mut session: Session) {
    session.client.shutdown().await;
    if let Some(mut child) = session.child.take() {
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
            tracing::debug!("language server ignored shutdown, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Launches real language-server binaries over stdio.
pub struct CommandLauncher;

impl CommandLauncher {
    fn take_pipes(
        child: &mut Child,
        program: &str,
    ) -> Result<(impl AsyncRead + Send + Unpin + 'static, impl AsyncWrite + Send + Unpin + 'static), TransportError>
    {
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            command: program.to_string(),
            message: "stdout not captured".to_string(),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            command: program.to_string(),
            message: "stdin not captured".to_string(),
        })?;
        Ok((stdout, stdin))
    }
}

impl Launcher for CommandLauncher {
    async fn launch(
        &self,
        language: Language,
        workspace_root: &Path,
    ) -> Result<LaunchedSession, TransportError> {
        let command = server_command(language).ok_or_else(|| TransportError::Spawn {
            command: language.as_str().to_string(),
            message: "no language server configured".to_string(),
        })?;

        let program = which::which(command.program).map_err(|e| TransportError::Spawn {
            command: command.program.to_string(),
            message: e.to_string(),
        })?;

        let mut child = tokio::process::Command::new(&program)
            .args(command.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn {
                command: command.program.to_string(),
                message: e.to_string(),
            })?;

        let (stdout, stdin) = Self::take_pipes(&mut child, command.program)?;
        let client = ProtocolClient::new(stdout, stdin);

        let root_uri = path_to_file_uri(workspace_root).map_err(|e| TransportError::Spawn {
            command: command.program.to_string(),
            message: e.to_string(),
        })?;
        client.initialize(root_uri.as_str()).await?;

        tracing::info!(
            language = language.as_str(),
            server = command.program,
            "language server session started"
        );
        Ok(LaunchedSession {
            client,
            child: Some(child),
        })
    }
}
