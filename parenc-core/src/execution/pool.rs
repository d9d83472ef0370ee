//! Bounded worker pools executing queued jobs.
//!
//! A pool owns a fixed set of worker threads that pull jobs off a shared
//! channel. Process pools exist for jobs whose body drives an external OS
//! process (that child is where the parallel work happens); thread pools run
//! in-process closures. Both kinds share the same worker machinery; the kind
//! is recorded on the pool and reported in its info snapshot.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};

/// Payload type produced by jobs; JSON keeps results serializable across
/// the controller/worker boundary.
pub type JobValue = serde_json::Value;

/// A unit of work submitted to a pool.
pub type JobFn = Box<dyn FnOnce() -> Result<JobValue, String> + Send + 'static>;

/// Worker pool flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Jobs spawn an external OS process.
    Process,
    /// Jobs run as in-process closures.
    Thread,
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled)
    }
}

/// Read-only snapshot of a pool for callers; pools themselves are owned
/// exclusively by the execution manager and addressed by id.
#[derive(Debug, Clone)]
pub struct PoolInfo {
    pub id: String,
    pub kind: PoolKind,
    pub max_workers: usize,
    pub created_at: DateTime<Utc>,
    pub jobs_in_flight: usize,
}

struct JobEntry {
    status: JobStatus,
    result: Option<Result<JobValue, String>>,
}

struct JobTable {
    entries: Mutex<HashMap<String, JobEntry>>,
    done: Condvar,
}

struct QueuedJob {
    id: String,
    work: JobFn,
}

pub(crate) struct WorkerPool {
    id: String,
    kind: PoolKind,
    max_workers: usize,
    created_at: DateTime<Utc>,
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    jobs: Arc<JobTable>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("max_workers", &self.max_workers)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub(crate) fn new(id: String, kind: PoolKind, max_workers: usize) -> CoreResult<Self> {
        if max_workers < 1 {
            return Err(CoreError::Resource(format!(
                "pool size must be at least 1, got {max_workers}"
            )));
        }

        let (sender, receiver) = mpsc::channel::<QueuedJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let jobs = Arc::new(JobTable {
            entries: Mutex::new(HashMap::new()),
            done: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(max_workers);
        for n in 0..max_workers {
            let receiver = Arc::clone(&receiver);
            let jobs = Arc::clone(&jobs);
            let name = format!("{id}-worker-{n}");
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(receiver, jobs))
                .map_err(|e| CoreError::Resource(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        debug!("Created {kind:?} pool {id} with {max_workers} workers");
        Ok(Self {
            id,
            kind,
            max_workers,
            created_at: Utc::now(),
            sender: Mutex::new(Some(sender)),
            jobs,
            workers: Mutex::new(workers),
        })
    }

    pub(crate) fn info(&self) -> PoolInfo {
        let entries = self.jobs.entries.lock().unwrap();
        let jobs_in_flight = entries
            .values()
            .filter(|e| !e.status.is_terminal())
            .count();
        PoolInfo {
            id: self.id.clone(),
            kind: self.kind,
            max_workers: self.max_workers,
            created_at: self.created_at,
            jobs_in_flight,
        }
    }

    /// Enqueues a job and returns immediately.
    pub(crate) fn submit(&self, job_id: String, work: JobFn) -> CoreResult<()> {
        let sender = self.sender.lock().unwrap();
        let sender = sender
            .as_ref()
            .ok_or_else(|| CoreError::Resource(format!("pool {} has been shut down", self.id)))?;
        self.jobs.entries.lock().unwrap().insert(
            job_id.clone(),
            JobEntry { status: JobStatus::Pending, result: None },
        );
        if sender.send(QueuedJob { id: job_id.clone(), work }).is_err() {
            self.jobs.entries.lock().unwrap().remove(&job_id);
            return Err(CoreError::Resource(format!(
                "pool {} workers are gone",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs
            .entries
            .lock()
            .unwrap()
            .get(job_id)
            .map(|e| e.status)
    }

    pub(crate) fn has_job(&self, job_id: &str) -> bool {
        self.jobs.entries.lock().unwrap().contains_key(job_id)
    }

    /// Blocks until the job reaches a terminal state, or the timeout runs
    /// out (`CoreError::Timeout`, retryable).
    pub(crate) fn job_result(
        &self,
        job_id: &str,
        timeout: Option<Duration>,
    ) -> CoreResult<JobValue> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut entries = self.jobs.entries.lock().unwrap();
        loop {
            match entries.get(job_id) {
                None => return Err(CoreError::job_not_found(job_id)),
                Some(entry) => match (entry.status, &entry.result) {
                    (JobStatus::Completed, Some(Ok(value))) => return Ok(value.clone()),
                    (JobStatus::Error, Some(Err(message))) => {
                        return Err(CoreError::JobFailed(message.clone()))
                    }
                    (JobStatus::Cancelled, _) => {
                        return Err(CoreError::Cancelled(job_id.to_string()))
                    }
                    _ => {}
                },
            }
            entries = match deadline {
                None => self.jobs.done.wait(entries).unwrap(),
                Some(deadline) => {
                    let remaining = match deadline.checked_duration_since(Instant::now()) {
                        Some(remaining) => remaining,
                        None => {
                            return Err(CoreError::Timeout(format!(
                                "waiting for job {job_id}"
                            )))
                        }
                    };
                    let (guard, _) = self.jobs.done.wait_timeout(entries, remaining).unwrap();
                    guard
                }
            };
        }
    }

    /// Cancels a job for bookkeeping. Succeeds only while the job is still
    /// queued; a job already claimed by a worker cannot be preempted.
    pub(crate) fn cancel(&self, job_id: &str) -> CoreResult<bool> {
        let mut entries = self.jobs.entries.lock().unwrap();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))?;
        if entry.status == JobStatus::Pending {
            entry.status = JobStatus::Cancelled;
            entry.result = Some(Err("cancelled before start".to_string()));
            drop(entries);
            self.jobs.done.notify_all();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Shuts the pool down.
    ///
    /// With `wait` the queue drains and workers are joined. Without it,
    /// still-queued jobs are marked cancelled and workers are abandoned to
    /// finish whatever they already claimed.
    pub(crate) fn shutdown(&self, wait: bool) {
        let sender = self.sender.lock().unwrap().take();
        if sender.is_none() {
            return;
        }
        if wait {
            drop(sender);
            let mut workers = self.workers.lock().unwrap();
            for handle in workers.drain(..) {
                if handle.join().is_err() {
                    warn!("pool {} worker panicked during shutdown", self.id);
                }
            }
        } else {
            {
                let mut entries = self.jobs.entries.lock().unwrap();
                for entry in entries.values_mut() {
                    if entry.status == JobStatus::Pending {
                        entry.status = JobStatus::Cancelled;
                        entry.result = Some(Err("cancelled at shutdown".to_string()));
                    }
                }
            }
            self.jobs.done.notify_all();
            drop(sender);
            self.workers.lock().unwrap().clear();
        }
        debug!("Pool {} shut down (wait={wait})", self.id);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

fn worker_loop(receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>, jobs: Arc<JobTable>) {
    loop {
        // Hold the receiver lock only for the blocking recv; execution
        // happens with the channel free for the other workers.
        let queued = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        let queued = match queued {
            Ok(queued) => queued,
            Err(_) => break,
        };

        {
            let mut entries = jobs.entries.lock().unwrap();
            match entries.get_mut(&queued.id) {
                Some(entry) if entry.status == JobStatus::Pending => {
                    entry.status = JobStatus::Running;
                }
                // Cancelled while queued, or evicted; skip without running.
                _ => continue,
            }
        }

        let result = panic::catch_unwind(AssertUnwindSafe(queued.work))
            .unwrap_or_else(|_| Err("job panicked".to_string()));

        {
            let mut entries = jobs.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&queued.id) {
                if entry.status == JobStatus::Running {
                    entry.status = if result.is_ok() {
                        JobStatus::Completed
                    } else {
                        JobStatus::Error
                    };
                    entry.result = Some(result);
                }
            }
        }
        jobs.done.notify_all();
    }
}
