//! Single-writer run coordination.
//!
//! At most one indexing run is active per process. A second trigger while a
//! run is in flight is rejected with `ConcurrentRunRejected` rather than
//! queued. Status reads never block on a run.

use crate::pipeline::{Orchestrator, RunParams, RunReport};
use chrono::{DateTime, Utc};
use odix_core::OdixError;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;

/// Stage of the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Scanning,
    Extracting,
    Resolving,
    Committing,
}

impl RunPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Scanning,
            2 => Self::Extracting,
            3 => Self::Resolving,
            4 => Self::Committing,
            _ => Self::Idle,
        }
    }
}

/// Lock-free progress counters written by the pipeline.
#[derive(Debug, Default)]
pub struct RunProgress {
    phase: AtomicU8,
    files_total: AtomicUsize,
    files_done: AtomicUsize,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_total(&self, total: usize) {
        self.files_total.store(total, Ordering::Relaxed);
        self.files_done.store(0, Ordering::Relaxed);
    }

    pub fn file_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    /// `(done, total)` files of the extraction phase.
    pub fn files(&self) -> (usize, usize) {
        (
            self.files_done.load(Ordering::Relaxed),
            self.files_total.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        self.set_phase(RunPhase::Idle);
        self.set_total(0);
    }
}

#[derive(Debug, Clone)]
struct RunInfo {
    params: RunParams,
    started: Instant,
}

#[derive(Debug, Clone)]
enum RunState {
    Idle,
    Running(RunInfo),
    /// The last run failed; a new one may start.
    Failed(String),
}

/// Outcome of the most recent finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LastRun {
    Succeeded {
        finished_at: DateTime<Utc>,
        params: RunParams,
        report: RunReport,
    },
    Failed {
        finished_at: DateTime<Utc>,
        params: RunParams,
        code: String,
        message: String,
    },
}

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingStatus {
    pub is_running: bool,
    pub phase: RunPhase,
    pub elapsed_seconds: Option<u64>,
    pub incremental: Option<bool>,
    pub modules: Option<Vec<String>>,
    pub files_done: usize,
    pub files_total: usize,
    pub last_error: Option<String>,
    pub last_run: Option<LastRun>,
}

struct CoordinatorState {
    state: RunState,
    last_run: Option<LastRun>,
}

/// Serializes indexing runs and tracks their status.
pub struct RunCoordinator {
    orchestrator: Arc<Orchestrator>,
    state: Mutex<CoordinatorState>,
    progress: Arc<RunProgress>,
    handle: Handle,
}

impl RunCoordinator {
    /// Create a coordinator that spawns background runs on `handle`.
    pub fn new(orchestrator: Orchestrator, handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            orchestrator: Arc::new(orchestrator),
            state: Mutex::new(CoordinatorState {
                state: RunState::Idle,
                last_run: None,
            }),
            progress: Arc::new(RunProgress::new()),
            handle,
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn lock(&self) -> Result<MutexGuard<'_, CoordinatorState>, OdixError> {
        self.state
            .lock()
            .map_err(|e| OdixError::LockPoisoned(format!("run coordinator: {e}")))
    }

    /// Claim the writer slot. The returned guard releases it.
    pub fn try_start(self: &Arc<Self>, params: &RunParams) -> Result<RunGuard, OdixError> {
        let mut guard = self.lock()?;
        if let RunState::Running(info) = &guard.state {
            return Err(OdixError::ConcurrentRunRejected {
                started_secs_ago: info.started.elapsed().as_secs(),
            });
        }
        guard.state = RunState::Running(RunInfo {
            params: params.clone(),
            started: Instant::now(),
        });
        self.progress.reset();
        tracing::info!(
            "Indexing run started (incremental: {}, modules: {:?}, clear_all: {})",
            params.incremental,
            params.modules,
            params.clear_all
        );
        Ok(RunGuard {
            coordinator: Arc::clone(self),
            params: params.clone(),
            finished: false,
        })
    }

    /// Start a run in the background and return immediately.
    pub fn trigger(self: &Arc<Self>, params: RunParams) -> Result<(), OdixError> {
        let guard = self.try_start(&params)?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let progress = Arc::clone(&self.progress);
        self.handle.spawn(async move {
            match orchestrator.run(&params, &progress).await {
                Ok(report) => guard.succeed(report),
                Err(err) => guard.fail(&err),
            }
        });
        Ok(())
    }

    /// Run on the current task and wait for the report.
    pub async fn run_to_completion(self: &Arc<Self>, params: RunParams) -> Result<RunReport, OdixError> {
        let guard = self.try_start(&params)?;
        match self.orchestrator.run(&params, &self.progress).await {
            Ok(report) => {
                guard.succeed(report.clone());
                Ok(report)
            }
            Err(err) => {
                guard.fail(&err);
                Err(err)
            }
        }
    }

    /// Kick off a full run when the store holds nothing yet.
    pub fn ensure_initial_index(self: &Arc<Self>) -> Result<bool, OdixError> {
        if !self.orchestrator.storage().is_empty()? {
            return Ok(false);
        }
        tracing::info!("Index is empty, starting initial full index");
        self.trigger(RunParams::full())?;
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .map(|g| matches!(g.state, RunState::Running(_)))
            .unwrap_or(false)
    }

    pub fn status(&self) -> Result<IndexingStatus, OdixError> {
        let guard = self.lock()?;
        let (done, total) = self.progress.files();
        let mut status = IndexingStatus {
            is_running: false,
            phase: RunPhase::Idle,
            elapsed_seconds: None,
            incremental: None,
            modules: None,
            files_done: done,
            files_total: total,
            last_error: None,
            last_run: guard.last_run.clone(),
        };
        match &guard.state {
            RunState::Running(info) => {
                status.is_running = true;
                status.phase = self.progress.phase();
                status.elapsed_seconds = Some(info.started.elapsed().as_secs());
                status.incremental = Some(info.params.incremental);
                status.modules = info.params.modules.clone();
            }
            RunState::Failed(message) => status.last_error = Some(message.clone()),
            RunState::Idle => {}
        }
        Ok(status)
    }

    fn finish(&self, params: &RunParams, outcome: Result<RunReport, (&'static str, String)>) {
        let Ok(mut guard) = self.state.lock() else {
            tracing::error!("Run coordinator lock poisoned; run outcome dropped");
            return;
        };
        let finished_at = Utc::now();
        match outcome {
            Ok(report) => {
                guard.state = RunState::Idle;
                guard.last_run = Some(LastRun::Succeeded {
                    finished_at,
                    params: params.clone(),
                    report,
                });
            }
            Err((code, message)) => {
                tracing::error!("Indexing run failed: {}", message);
                guard.state = RunState::Failed(message.clone());
                guard.last_run = Some(LastRun::Failed {
                    finished_at,
                    params: params.clone(),
                    code: code.to_string(),
                    message,
                });
            }
        }
        self.progress.set_phase(RunPhase::Idle);
    }
}

/// Holds the writer slot for one run. Dropping it unfinished (a panicked
/// or cancelled run) records the run as failed.
pub struct RunGuard {
    coordinator: Arc<RunCoordinator>,
    params: RunParams,
    finished: bool,
}

impl RunGuard {
    pub fn succeed(mut self, report: RunReport) {
        self.finished = true;
        self.coordinator.finish(&self.params, Ok(report));
    }

    pub fn fail(mut self, err: &OdixError) {
        self.finished = true;
        self.coordinator
            .finish(&self.params, Err((err.code(), err.to_string())));
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.finish(
                &self.params,
                Err(("internal_error", "indexing run aborted".to_string())),
            );
        }
    }
}
