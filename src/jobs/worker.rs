//! In-process worker for boundary resolution jobs.
//!
//! Runs as a single actor owning the job table. Jobs are keyed by table name:
//! at most one job per table is in flight, a re-enqueue while the job is
//! queued replaces its manifest, and a re-enqueue while it runs is coalesced
//! into one follow-up run. Store failures are retried with exponential
//! backoff.

use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::boundary_resolution::{resolve_boundaries, ResolutionReport};
use crate::errors::{ResolutionError, ResolutionResult};

/// Lifecycle of a job: `Queued -> Running -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// How an enqueue request was absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueAck {
    /// A new job was queued
    Queued,
    /// A job for the table was already queued; its manifest was replaced
    Deduplicated,
    /// A job for the table is running; one follow-up run was scheduled
    Coalesced,
}

/// Point-in-time view of a table's job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub table_name: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub report: Option<ResolutionReport>,
    pub error: Option<String>,
    /// A follow-up run is scheduled after the current one
    pub rerun_pending: bool,
}

/// Retry and capacity settings for the worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub queue_capacity: usize,
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            queue_capacity: 256,
            concurrency: 2,
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    manifest: Vec<String>,
    status: JobStatus,
    attempts: u32,
    report: Option<ResolutionReport>,
    error: Option<String>,
    rerun: Option<Vec<String>>,
}

impl JobEntry {
    fn queued(manifest: Vec<String>) -> Self {
        Self {
            manifest,
            status: JobStatus::Queued,
            attempts: 0,
            report: None,
            error: None,
            rerun: None,
        }
    }
}

/// Scheduling state of every job the worker has seen.
///
/// Pure bookkeeping with no I/O; the actor drives it.
#[derive(Debug, Default)]
pub struct JobTable {
    entries: HashMap<String, JobEntry>,
    queue: VecDeque<String>,
    running: usize,
}

impl JobTable {
    pub fn enqueue(&mut self, table_name: &str, manifest: Vec<String>) -> EnqueueAck {
        if let Some(entry) = self.entries.get_mut(table_name) {
            match entry.status {
                JobStatus::Running => {
                    entry.rerun = Some(manifest);
                    return EnqueueAck::Coalesced;
                }
                JobStatus::Queued => {
                    entry.manifest = manifest;
                    return EnqueueAck::Deduplicated;
                }
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        self.entries
            .insert(table_name.to_string(), JobEntry::queued(manifest));
        self.queue.push_back(table_name.to_string());
        EnqueueAck::Queued
    }

    /// Take the next queued job if fewer than `concurrency` are running
    pub fn start_next(&mut self, concurrency: usize) -> Option<(String, Vec<String>)> {
        if self.running >= concurrency {
            return None;
        }
        let table_name = self.queue.pop_front()?;
        let entry = self.entries.get_mut(&table_name)?;
        entry.status = JobStatus::Running;
        self.running += 1;
        Some((table_name, entry.manifest.clone()))
    }

    /// Record the outcome of a run. Returns true when the table was queued
    /// again because of a coalesced enqueue.
    pub fn finish(
        &mut self,
        table_name: &str,
        attempts: u32,
        outcome: Result<ResolutionReport, String>,
    ) -> bool {
        self.running = self.running.saturating_sub(1);
        let Some(entry) = self.entries.get_mut(table_name) else {
            return false;
        };

        entry.attempts = attempts;
        match outcome {
            Ok(report) => {
                entry.status = JobStatus::Completed;
                entry.report = Some(report);
                entry.error = None;
            }
            Err(message) => {
                entry.status = JobStatus::Failed;
                entry.report = None;
                entry.error = Some(message);
            }
        }

        match entry.rerun.take() {
            Some(manifest) => {
                entry.manifest = manifest;
                entry.status = JobStatus::Queued;
                self.queue.push_back(table_name.to_string());
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, table_name: &str) -> Option<JobSnapshot> {
        self.entries.get(table_name).map(|entry| JobSnapshot {
            table_name: table_name.to_string(),
            status: entry.status,
            attempts: entry.attempts,
            report: entry.report.clone(),
            error: entry.error.clone(),
            rerun_pending: entry.rerun.is_some(),
        })
    }

    pub fn is_idle(&self) -> bool {
        self.running == 0 && self.queue.is_empty()
    }
}

enum WorkerCommand {
    Enqueue {
        table_name: String,
        manifest: Vec<String>,
        response: oneshot::Sender<ResolutionResult<EnqueueAck>>,
    },
    Status {
        table_name: String,
        response: oneshot::Sender<Option<JobSnapshot>>,
    },
    Wait {
        table_name: String,
        response: oneshot::Sender<Option<JobSnapshot>>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

struct JobFinished {
    table_name: String,
    attempts: u32,
    outcome: Result<ResolutionReport, String>,
}

/// The worker actor; owns the job table and spawns job runs
pub struct ResolutionWorker {
    db: DatabaseConnection,
    config: WorkerConfig,
    jobs: JobTable,
    waiters: HashMap<String, Vec<oneshot::Sender<Option<JobSnapshot>>>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    accepting: bool,
    command_rx: mpsc::Receiver<WorkerCommand>,
    finished_tx: mpsc::UnboundedSender<JobFinished>,
    finished_rx: mpsc::UnboundedReceiver<JobFinished>,
}

impl ResolutionWorker {
    pub fn spawn(db: DatabaseConnection, config: WorkerConfig) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let worker = Self {
            db,
            config,
            jobs: JobTable::default(),
            waiters: HashMap::new(),
            shutdown_waiters: Vec::new(),
            accepting: true,
            command_rx: rx,
            finished_tx,
            finished_rx,
        };

        tokio::spawn(async move {
            worker.run().await;
        });

        info!("ResolutionWorker spawned");
        WorkerHandle { command_tx: tx }
    }

    async fn run(mut self) {
        info!("ResolutionWorker event loop started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv(), if self.accepting => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        debug!("All worker handles dropped, draining");
                        self.accepting = false;
                    }
                },
                Some(done) = self.finished_rx.recv() => self.complete(done),
            }

            if !self.accepting && self.jobs.is_idle() {
                break;
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("ResolutionWorker event loop ended");
    }

    fn handle(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Enqueue {
                table_name,
                manifest,
                response,
            } => {
                let ack = self.jobs.enqueue(&table_name, manifest);
                info!("Resolution job for {} {:?}", table_name, ack);
                let _ = response.send(Ok(ack));
                self.dispatch();
            }

            WorkerCommand::Status {
                table_name,
                response,
            } => {
                let _ = response.send(self.jobs.snapshot(&table_name));
            }

            WorkerCommand::Wait {
                table_name,
                response,
            } => match self.jobs.snapshot(&table_name) {
                Some(snapshot) if !snapshot.status.is_settled() => {
                    self.waiters.entry(table_name).or_default().push(response);
                }
                snapshot => {
                    let _ = response.send(snapshot);
                }
            },

            WorkerCommand::Shutdown { response } => {
                info!("ResolutionWorker shutting down, draining queued jobs");
                self.accepting = false;
                self.shutdown_waiters.push(response);
            }
        }
    }

    fn dispatch(&mut self) {
        while let Some((table_name, manifest)) = self.jobs.start_next(self.config.concurrency) {
            debug!("Resolution job for {} running", table_name);
            let db = self.db.clone();
            let config = self.config.clone();
            let finished = self.finished_tx.clone();

            tokio::spawn(async move {
                let (db_ref, table_ref, manifest_ref) = (&db, table_name.as_str(), &manifest[..]);
                let (attempts, result) = retry_with_backoff(&config, table_ref, move || {
                    resolve_boundaries(db_ref, table_ref, manifest_ref)
                })
                .await;
                let outcome = result.map_err(|e| e.to_string());
                let _ = finished.send(JobFinished {
                    table_name,
                    attempts,
                    outcome,
                });
            });
        }
    }

    fn complete(&mut self, done: JobFinished) {
        match &done.outcome {
            Ok(report) => info!(
                "Resolution job for {} completed after {} attempt(s): {} resolved",
                done.table_name, done.attempts, report.resolved
            ),
            Err(message) => error!(
                "Resolution job for {} failed after {} attempt(s): {}",
                done.table_name, done.attempts, message
            ),
        }

        let requeued = self
            .jobs
            .finish(&done.table_name, done.attempts, done.outcome);
        if requeued {
            debug!("Running coalesced follow-up for {}", done.table_name);
        } else if let Some(waiters) = self.waiters.remove(&done.table_name) {
            let snapshot = self.jobs.snapshot(&done.table_name);
            for waiter in waiters {
                let _ = waiter.send(snapshot.clone());
            }
        }

        self.dispatch();
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is reached. The delay doubles after each retry.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &WorkerConfig,
    table_name: &str,
    mut attempt: F,
) -> (u32, ResolutionResult<T>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ResolutionResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.retry_backoff;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return (attempts, Ok(value)),
            Err(err) if err.is_retryable() && attempts < max_attempts => {
                warn!(
                    "Resolution of {} failed (attempt {}/{}), retrying in {:?}: {}",
                    table_name, attempts, max_attempts, delay, err
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return (attempts, Err(err)),
        }
    }
}

/// Handle to send commands to the ResolutionWorker
#[derive(Clone)]
pub struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    /// Enqueue resolution of `table_name`; returns once the worker has
    /// acknowledged the job, not when it has run.
    pub async fn enqueue(
        &self,
        table_name: impl Into<String>,
        manifest: Vec<String>,
    ) -> ResolutionResult<EnqueueAck> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Enqueue {
                table_name: table_name.into(),
                manifest,
                response: tx,
            })
            .await
            .map_err(|_| ResolutionError::QueueClosed)?;

        rx.await.map_err(|_| ResolutionError::QueueClosed)?
    }

    pub async fn status(&self, table_name: impl Into<String>) -> ResolutionResult<Option<JobSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Status {
                table_name: table_name.into(),
                response: tx,
            })
            .await
            .map_err(|_| ResolutionError::QueueClosed)?;

        rx.await.map_err(|_| ResolutionError::QueueClosed)
    }

    /// Wait until the table's job (and any coalesced follow-up) has settled
    pub async fn wait(&self, table_name: impl Into<String>) -> ResolutionResult<Option<JobSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Wait {
                table_name: table_name.into(),
                response: tx,
            })
            .await
            .map_err(|_| ResolutionError::QueueClosed)?;

        rx.await.map_err(|_| ResolutionError::QueueClosed)
    }

    /// Stop accepting jobs and return once queued and running jobs are done
    pub async fn shutdown(&self) -> ResolutionResult<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(WorkerCommand::Shutdown { response: tx })
            .await
            .map_err(|_| ResolutionError::QueueClosed)?;

        rx.await.map_err(|_| ResolutionError::QueueClosed)
    }
}
