//! Scheduling around [`IngestionPipeline::run_once`].
//!
//! Two interchangeable drivers with identical store effects:
//! - [`run_cooperative`] / [`PollController`]: a tokio task, cancelable at the
//!   feed fetch and at the sleep between cycles, never mid-write.
//! - [`BlockingPoller`]: a dedicated OS thread with its own runtime, checked
//!   for stop requests between cycles.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::pipeline::IngestionPipeline;
use crate::feed::FeedError;
use crate::models::RawAlertEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollStatus {
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "not running")]
    NotRunning,
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Running => f.write_str("running"),
            PollStatus::NotRunning => f.write_str("not running"),
        }
    }
}

/// Renders a session id query the way the control surface reports it.
pub fn describe_session_ids(ids: Option<&[String]>) -> String {
    match ids {
        Some(ids) => ids.join(", "),
        None => "no ids".to_string(),
    }
}

/// One pipeline cycle with errors logged. Feed failures are expected now and
/// then and never stop the loop.
async fn ingest_cycle(pipeline: &IngestionPipeline, batch: Result<Vec<RawAlertEvent>, FeedError>) {
    match batch {
        Ok(batch) if batch.is_empty() => {}
        Ok(batch) => {
            let report = pipeline.ingest(batch).await;
            if report.failures > 0 {
                warn!(
                    "Cycle finished with {} failed write(s) out of {} event(s)",
                    report.failures, report.fetched
                );
            }
        }
        Err(e) => warn!("Error fetching alerts: {}", e),
    }
}

/// Polls until `token` is cancelled. Cancellation is honoured while waiting
/// on the feed or on the interval; a batch already fetched is always written
/// out in full.
pub async fn run_cooperative(
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    token: CancellationToken,
) {
    info!("Begin polling alerts every {:?}", interval);
    loop {
        let batch = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            batch = pipeline.fetch() => batch,
        };
        ingest_cycle(&pipeline, batch).await;

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Alert polling stopped");
}

struct ActiveLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ActiveLoop {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Start/stop/status handle for the cooperative loop. Callers share one
/// controller (usually behind an `Arc`); at most one loop runs per controller.
pub struct PollController {
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    active: Mutex<Option<ActiveLoop>>,
}

impl PollController {
    pub fn new(pipeline: Arc<IngestionPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            active: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> StartOutcome {
        let mut active = self.active.lock().await;
        if active.as_ref().map_or(false, ActiveLoop::is_running) {
            return StartOutcome::AlreadyRunning;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_cooperative(
            self.pipeline.clone(),
            self.interval,
            token.clone(),
        ));
        *active = Some(ActiveLoop { token, handle });
        info!("Alert polling started");
        StartOutcome::Started
    }

    /// Requests cancellation and waits for the loop to wind down. The lock is
    /// released before waiting, so status queries answer during a long batch.
    pub async fn stop(&self) -> StopOutcome {
        let Some(running) = self.active.lock().await.take() else {
            return StopOutcome::NotRunning;
        };
        if !running.is_running() {
            return StopOutcome::NotRunning;
        }

        running.token.cancel();
        if let Err(e) = running.handle.await {
            error!("Polling task ended abnormally: {}", e);
        }
        StopOutcome::Stopped
    }

    pub async fn status(&self) -> PollStatus {
        let active = self.active.lock().await;
        if active.as_ref().map_or(false, ActiveLoop::is_running) {
            PollStatus::Running
        } else {
            PollStatus::NotRunning
        }
    }

    /// Ids stored this session, or `None` while the loop is not running.
    pub async fn session_ids(&self) -> Option<Vec<String>> {
        match self.status().await {
            PollStatus::Running => Some(self.pipeline.session_ids()),
            PollStatus::NotRunning => None,
        }
    }
}

/// Blocking variant: runs the pipeline on its own thread and runtime, so the
/// caller's runtime is never involved.
pub struct BlockingPoller {
    token: CancellationToken,
    handle: thread::JoinHandle<()>,
}

impl BlockingPoller {
    pub fn spawn(pipeline: Arc<IngestionPipeline>, interval: Duration) -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name("alert-poller".to_string())
            .spawn(move || run_blocking(pipeline, interval, worker_token))?;
        Ok(Self { token, handle })
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the worker and waits for its current cycle to finish.
    pub fn stop(self) -> StopOutcome {
        if !self.is_running() {
            return StopOutcome::NotRunning;
        }
        self.token.cancel();
        if self.handle.join().is_err() {
            error!("Polling worker panicked");
        }
        StopOutcome::Stopped
    }
}

/// Runs cycles on the calling thread until `token` is cancelled. Must not be
/// called from inside an async context.
pub fn run_blocking(pipeline: Arc<IngestionPipeline>, interval: Duration, token: CancellationToken) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not start polling runtime: {}", e);
            return;
        }
    };

    info!("Begin polling alerts every {:?} on a dedicated worker", interval);
    while !token.is_cancelled() {
        runtime.block_on(async {
            let batch = pipeline.fetch().await;
            ingest_cycle(&pipeline, batch).await;
        });
        if token.is_cancelled() {
            break;
        }
        thread::sleep(interval);
    }
    info!("Alert polling worker stopped");
}
