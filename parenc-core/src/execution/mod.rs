// ============================================================================
// parenc-core/src/execution/mod.rs
// ============================================================================
//
// EXECUTION MANAGER: Worker Pools, OS Processes, and IPC Primitives
//
// This module is the leaf layer of the system. It owns named worker pools,
// tracks in-flight asynchronous OS processes, and hands out the IPC
// primitives (queues, events, locks, shared scalars) that jobs use to talk
// back to the controller.
//
// DESIGN PHILOSOPHY:
// The manager is an explicitly constructed value, shared by `Arc` and passed
// to collaborators; there is no module-level singleton. Pool state, the
// process table, and the IPC registry are each guarded by their own mutex,
// held only for short bookkeeping operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

use crate::error::{CoreError, CoreResult};

pub mod ipc;
pub mod pool;
pub mod process;

pub use ipc::{IpcEvent, IpcLock, IpcLockGuard, IpcQueue, IpcRegistry, IpcScalar};
pub use pool::{JobFn, JobStatus, JobValue, PoolInfo, PoolKind};
pub use process::{check_dependency, ProcessCallback, ProcessOutput, ProcessSpec};

use pool::WorkerPool;
use process::ProcessTable;

/// Owns executors, async processes, and IPC primitives.
pub struct ExecutionManager {
    pools: Mutex<HashMap<String, Arc<WorkerPool>>>,
    /// job id -> pool id, so job operations only need the job id.
    job_index: Mutex<HashMap<String, String>>,
    processes: ProcessTable,
    ipc: IpcRegistry,
    pool_seq: AtomicU64,
    job_seq: AtomicU64,
    process_seq: AtomicU64,
}

impl Default for ExecutionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionManager {
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            job_index: Mutex::new(HashMap::new()),
            processes: ProcessTable::new(),
            ipc: IpcRegistry::new(),
            pool_seq: AtomicU64::new(1),
            job_seq: AtomicU64::new(1),
            process_seq: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Pools and jobs
    // ------------------------------------------------------------------

    /// Creates a named worker pool and returns its id.
    pub fn create_pool(&self, kind: PoolKind, max_workers: usize) -> CoreResult<String> {
        let id = format!("pool-{}", self.pool_seq.fetch_add(1, Ordering::Relaxed));
        let pool = WorkerPool::new(id.clone(), kind, max_workers)?;
        self.pools.lock().unwrap().insert(id.clone(), Arc::new(pool));
        info!("Created {kind:?} pool {id} ({max_workers} workers)");
        Ok(id)
    }

    pub fn pool_info(&self, pool_id: &str) -> CoreResult<PoolInfo> {
        Ok(self.pool(pool_id)?.info())
    }

    /// Enqueues work on the named pool and returns the job id immediately.
    pub fn submit(&self, pool_id: &str, work: JobFn) -> CoreResult<String> {
        let pool = self.pool(pool_id)?;
        let job_id = format!("job-{}", self.job_seq.fetch_add(1, Ordering::Relaxed));
        pool.submit(job_id.clone(), work)?;
        self.job_index
            .lock()
            .unwrap()
            .insert(job_id.clone(), pool_id.to_string());
        Ok(job_id)
    }

    pub fn job_status(&self, job_id: &str) -> CoreResult<JobStatus> {
        let pool = self.pool_for_job(job_id)?;
        pool.job_status(job_id)
            .ok_or_else(|| CoreError::job_not_found(job_id))
    }

    /// Blocks until the job finishes (or `timeout` elapses with a retryable
    /// `CoreError::Timeout`).
    pub fn job_result(&self, job_id: &str, timeout: Option<Duration>) -> CoreResult<JobValue> {
        self.pool_for_job(job_id)?.job_result(job_id, timeout)
    }

    /// True only if the job had not yet started executing on a worker; a
    /// running job cannot be preempted, only its future result marked
    /// cancelled for bookkeeping.
    pub fn cancel_job(&self, job_id: &str) -> CoreResult<bool> {
        self.pool_for_job(job_id)?.cancel(job_id)
    }

    /// Removes the pool. With `wait` the queue drains first; without it,
    /// queued jobs are cancelled and workers abandoned mid-flight.
    pub fn shutdown_pool(&self, pool_id: &str, wait: bool) -> CoreResult<()> {
        let pool = self
            .pools
            .lock()
            .unwrap()
            .remove(pool_id)
            .ok_or_else(|| CoreError::pool_not_found(pool_id))?;
        pool.shutdown(wait);
        Ok(())
    }

    /// Shuts down every pool without waiting.
    pub fn shutdown(&self) {
        let pools: Vec<_> = self.pools.lock().unwrap().drain().collect();
        for (_, pool) in pools {
            pool.shutdown(false);
        }
    }

    // ------------------------------------------------------------------
    // External processes
    // ------------------------------------------------------------------

    /// Runs a plain OS process to completion, capturing its output.
    pub fn run_external_process(&self, spec: &ProcessSpec) -> CoreResult<ProcessOutput> {
        process::run_process(spec)
    }

    /// Launches a process without blocking; a monitor thread records its
    /// completion and invokes `callback` once, if given.
    pub fn run_external_process_async(
        &self,
        spec: &ProcessSpec,
        callback: Option<ProcessCallback>,
    ) -> CoreResult<String> {
        let process_id = format!("proc-{}", self.process_seq.fetch_add(1, Ordering::Relaxed));
        self.processes.spawn(process_id.clone(), spec, callback)?;
        Ok(process_id)
    }

    /// Captured output of an async process, or `None` while it still runs.
    pub fn process_output(&self, process_id: &str) -> CoreResult<Option<ProcessOutput>> {
        self.processes.output(process_id)
    }

    /// Graceful stop, then kill after `grace`. False if already finished.
    pub fn terminate_process(&self, process_id: &str, grace: Duration) -> CoreResult<bool> {
        self.processes.terminate(process_id, grace)
    }

    // ------------------------------------------------------------------
    // IPC
    // ------------------------------------------------------------------

    pub fn ipc(&self) -> &IpcRegistry {
        &self.ipc
    }

    fn pool(&self, pool_id: &str) -> CoreResult<Arc<WorkerPool>> {
        self.pools
            .lock()
            .unwrap()
            .get(pool_id)
            .cloned()
            .ok_or_else(|| CoreError::pool_not_found(pool_id))
    }

    fn pool_for_job(&self, job_id: &str) -> CoreResult<Arc<WorkerPool>> {
        let pool_id = self
            .job_index
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(job_id))?;
        // The owning pool may have been shut down and evicted; the job is
        // then gone as far as callers are concerned.
        self.pools
            .lock()
            .unwrap()
            .get(&pool_id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(job_id))
    }
}
