// ============================================================================
// parenc-core/src/scheduler/mod.rs
// ============================================================================
//
// TASK SCHEDULER: Dependency- and Priority-Aware Scheduling
//
// Wraps units of work as tasks with priority and dependency lists and drives
// them onto an execution-manager pool from a single background control loop:
//
// 1. Promote: pending tasks whose dependencies have all completed are
//    submitted in descending priority order (FIFO within equal priority).
// 2. Reap: running tasks are polled; completions, failures, cancellations,
//    and timeouts are recorded and completion callbacks fired.
//
// Task tables are guarded by one mutex, held only for short bookkeeping
// operations, never across a blocking call. Errors inside a loop iteration
// are logged and the loop continues on the next tick.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::execution::{ExecutionManager, JobFn, JobStatus, JobValue};

mod task;

pub use task::{CompletionCallback, ScheduleRequest, TaskFilter, TaskSnapshot, TaskStatus};

use task::Task;

/// Default control-loop polling interval.
const CONTROL_LOOP_TICK: Duration = Duration::from_millis(100);

/// Polling interval used by [`TaskScheduler::wait`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct SchedulerState {
    tasks: HashMap<String, Task>,
    seq: u64,
}

struct SchedulerInner {
    manager: Arc<ExecutionManager>,
    pool_id: String,
    state: Mutex<SchedulerState>,
    shutdown: AtomicBool,
    tick: Duration,
}

/// Terminal outcome gathered during a reap pass, applied under the state
/// lock and then reported through the task's callback outside of it.
enum ReapOutcome {
    Completed(JobValue),
    Failed(String),
    Cancelled,
}

/// Priority scheduler over an execution-manager pool.
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    control: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Starts a scheduler whose tasks run on the given pool.
    pub fn start(manager: Arc<ExecutionManager>, pool_id: impl Into<String>) -> CoreResult<Self> {
        Self::start_with_tick(manager, pool_id, CONTROL_LOOP_TICK)
    }

    /// Same as [`start`](Self::start) with an explicit polling interval.
    pub fn start_with_tick(
        manager: Arc<ExecutionManager>,
        pool_id: impl Into<String>,
        tick: Duration,
    ) -> CoreResult<Self> {
        let pool_id = pool_id.into();
        // Fail fast on a bad pool id instead of erroring every tick.
        manager.pool_info(&pool_id)?;

        let inner = Arc::new(SchedulerInner {
            manager,
            pool_id,
            state: Mutex::new(SchedulerState { tasks: HashMap::new(), seq: 0 }),
            shutdown: AtomicBool::new(false),
            tick,
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("scheduler-control".to_string())
            .spawn(move || control_loop(&loop_inner))
            .map_err(|e| CoreError::Resource(format!("failed to spawn control loop: {e}")))?;

        info!("Task scheduler started on {}", inner.pool_id);
        Ok(Self { inner, control: Mutex::new(Some(handle)) })
    }

    /// Registers a task and returns its id. The control loop picks it up on
    /// a later tick; nothing runs synchronously here.
    pub fn schedule(&self, request: ScheduleRequest) -> CoreResult<String> {
        let mut state = self.inner.state.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| format!("task-{seq}"));
        if state.tasks.contains_key(&id) {
            return Err(CoreError::Resource(format!("task id already in use: {id}")));
        }
        debug!("Scheduled task {id} (priority {})", request.priority);
        state.tasks.insert(id.clone(), Task::new(id.clone(), seq, request));
        Ok(id)
    }

    /// Requests cancellation.
    ///
    /// A pending task is cancelled immediately and never reaches the pool.
    /// For a running task this only succeeds if the underlying job had not
    /// yet started on a worker; otherwise the task keeps running and `false`
    /// is returned (the refusal is reported, not swallowed).
    pub fn cancel(&self, task_id: &str) -> CoreResult<bool> {
        let job_id = {
            let mut state = self.inner.state.lock().unwrap();
            let task = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| CoreError::NotFound { kind: "task", id: task_id.to_string() })?;
            match task.status {
                TaskStatus::Pending => {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some("cancelled".to_string());
                    task.completed_at = Some(Utc::now());
                    task.work = None;
                    info!("Cancelled pending task {task_id}");
                    return Ok(true);
                }
                TaskStatus::Running => task.job_id.clone(),
                _ => return Ok(false),
            }
        };

        // Delegate to the execution manager; the control loop reaps the
        // cancelled job into the task record on its next pass.
        match job_id {
            Some(job_id) => {
                let cancelled = self.inner.manager.cancel_job(&job_id)?;
                if !cancelled {
                    debug!("Task {task_id} is already executing; cancel refused");
                }
                Ok(cancelled)
            }
            None => Ok(false),
        }
    }

    /// Point-in-time snapshot, or `None` for an unknown id.
    pub fn status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner
            .state
            .lock()
            .unwrap()
            .tasks
            .get(task_id)
            .map(Task::snapshot)
    }

    /// Snapshots of all tasks matching the filter, in submission order.
    pub fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        let state = self.inner.state.lock().unwrap();
        let mut tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t.status))
            .collect();
        tasks.sort_by_key(|t| t.seq);
        tasks.into_iter().map(Task::snapshot).collect()
    }

    /// Evicts every task in a terminal state; returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut state = self.inner.state.lock().unwrap();
        let before = state.tasks.len();
        state.tasks.retain(|_, t| !t.status.is_terminal());
        before - state.tasks.len()
    }

    /// Blocks the calling thread (never the control loop) until the task is
    /// terminal, returning its snapshot. `None` if the timeout elapsed first
    /// or the id is unknown; the task itself is unaffected either way.
    pub fn wait(&self, task_id: &str, timeout: Option<Duration>) -> Option<TaskSnapshot> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let snapshot = self.status(task_id)?;
            if snapshot.status.is_terminal() {
                return Some(snapshot);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return None;
                }
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Stops the control loop. Running jobs are left to the pool; pending
    /// tasks simply stop being promoted.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.control.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("scheduler control loop panicked");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// CONTROL LOOP
// ============================================================================

fn control_loop(inner: &SchedulerInner) {
    debug!("scheduler control loop running");
    while !inner.shutdown.load(Ordering::SeqCst) {
        promote(inner);
        reap(inner);
        thread::sleep(inner.tick);
    }
    debug!("scheduler control loop stopped");
}

/// Submits ready pending tasks to the pool, highest priority first.
fn promote(inner: &SchedulerInner) {
    let ready: Vec<(String, JobFn)> = {
        let mut state = inner.state.lock().unwrap();

        let mut ready_ids: Vec<(i32, u64, String)> = Vec::new();
        let mut starved: Vec<String> = Vec::new();
        for task in state.tasks.values() {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let mut promotable = true;
            let mut doomed = false;
            for dep in &task.dependencies {
                match state.tasks.get(dep).map(|d| d.status) {
                    Some(TaskStatus::Completed) => {}
                    Some(TaskStatus::Failed) | Some(TaskStatus::Cancelled) => {
                        promotable = false;
                        doomed = true;
                    }
                    // Unknown or still in flight: wait.
                    _ => promotable = false,
                }
            }
            if promotable {
                ready_ids.push((task.priority, task.seq, task.id.clone()));
            } else if doomed && !task.starvation_logged {
                starved.push(task.id.clone());
            }
        }

        // A failed or cancelled dependency leaves the dependent pending
        // forever; surface the starvation instead of auto-cancelling.
        for id in starved {
            warn!("task {id} has a failed or cancelled dependency and will never be promoted");
            if let Some(task) = state.tasks.get_mut(&id) {
                task.starvation_logged = true;
            }
        }

        ready_ids.sort_by_key(|(priority, seq, _)| (Reverse(*priority), *seq));
        ready_ids
            .into_iter()
            .filter_map(|(_, _, id)| {
                let work = state.tasks.get_mut(&id).and_then(|t| t.work.take());
                work.map(|work| (id, work))
            })
            .collect()
    };

    for (task_id, work) in ready {
        match inner.manager.submit(&inner.pool_id, work) {
            Ok(job_id) => {
                let mut state = inner.state.lock().unwrap();
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    if task.status == TaskStatus::Pending {
                        debug!("Promoted task {task_id} as {job_id}");
                        task.status = TaskStatus::Running;
                        task.started_at = Some(Utc::now());
                        task.deadline = task.timeout.map(|t| Instant::now() + t);
                        task.job_id = Some(job_id);
                    } else {
                        // Cancelled between taking the work and submitting;
                        // the queued job is still cancellable.
                        let _ = inner.manager.cancel_job(&job_id);
                    }
                }
            }
            Err(e) => {
                error!("Failed to submit task {task_id}: {e}");
                let mut state = inner.state.lock().unwrap();
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    task.status = TaskStatus::Failed;
                    task.error = Some(format!("submission failed: {e}"));
                    task.completed_at = Some(Utc::now());
                }
            }
        }
    }
}

/// Polls running tasks and records terminal outcomes.
fn reap(inner: &SchedulerInner) {
    let running: Vec<(String, String, Option<Instant>)> = {
        let state = inner.state.lock().unwrap();
        state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .filter_map(|t| {
                t.job_id
                    .clone()
                    .map(|job_id| (t.id.clone(), job_id, t.deadline))
            })
            .collect()
    };

    let mut outcomes: Vec<(String, ReapOutcome)> = Vec::new();
    for (task_id, job_id, deadline) in running {
        let outcome = match inner.manager.job_status(&job_id) {
            // An evicted job is a failure, never a silent hang.
            Err(_) => ReapOutcome::Failed(format!("job not found: {job_id}")),
            Ok(JobStatus::Completed) => {
                match inner.manager.job_result(&job_id, Some(Duration::ZERO)) {
                    Ok(value) => ReapOutcome::Completed(value),
                    Err(e) => ReapOutcome::Failed(e.to_string()),
                }
            }
            Ok(JobStatus::Error) => {
                match inner.manager.job_result(&job_id, Some(Duration::ZERO)) {
                    Err(CoreError::JobFailed(message)) => ReapOutcome::Failed(message),
                    Err(e) => ReapOutcome::Failed(e.to_string()),
                    Ok(_) => ReapOutcome::Failed("job failed".to_string()),
                }
            }
            Ok(JobStatus::Cancelled) => ReapOutcome::Cancelled,
            Ok(JobStatus::Pending) | Ok(JobStatus::Running) => {
                match deadline {
                    Some(deadline) if Instant::now() >= deadline => {
                        // The job cannot be preempted once executing; mark
                        // the task failed and ignore any late completion.
                        let _ = inner.manager.cancel_job(&job_id);
                        ReapOutcome::Failed("timed out".to_string())
                    }
                    _ => continue,
                }
            }
        };
        outcomes.push((task_id, outcome));
    }

    if outcomes.is_empty() {
        return;
    }

    let mut callbacks: Vec<(CompletionCallback, String, ReapOutcome)> = Vec::new();
    {
        let mut state = inner.state.lock().unwrap();
        for (task_id, outcome) in outcomes {
            let Some(task) = state.tasks.get_mut(&task_id) else { continue };
            // A stale notice for an already-terminal task is a no-op.
            if task.status != TaskStatus::Running {
                continue;
            }
            task.completed_at = Some(Utc::now());
            match &outcome {
                ReapOutcome::Completed(value) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(value.clone());
                    info!("Task {task_id} completed");
                }
                ReapOutcome::Failed(message) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(message.clone());
                    warn!("Task {task_id} failed: {message}");
                }
                ReapOutcome::Cancelled => {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some("cancelled".to_string());
                    info!("Task {task_id} cancelled");
                }
            }
            if let Some(callback) = task.callback.take() {
                callbacks.push((callback, task_id, outcome));
            }
        }
    }

    // User callbacks run outside the state lock; a panicking callback is
    // logged and must not take the control loop down with it.
    for (callback, task_id, outcome) in callbacks {
        let invoke = || match &outcome {
            ReapOutcome::Completed(value) => callback(&task_id, true, Ok(value)),
            ReapOutcome::Failed(message) => callback(&task_id, false, Err(message)),
            ReapOutcome::Cancelled => callback(&task_id, false, Err("cancelled")),
        };
        if panic::catch_unwind(AssertUnwindSafe(invoke)).is_err() {
            error!("completion callback for task {task_id} panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PoolKind;
    use serde_json::json;

    fn scheduler() -> (Arc<ExecutionManager>, TaskScheduler) {
        let manager = Arc::new(ExecutionManager::new());
        let pool_id = manager.create_pool(PoolKind::Thread, 1).unwrap();
        let scheduler =
            TaskScheduler::start_with_tick(Arc::clone(&manager), pool_id, Duration::from_millis(10))
                .unwrap();
        (manager, scheduler)
    }

    #[test]
    fn test_unknown_pool_is_rejected_at_start() {
        let manager = Arc::new(ExecutionManager::new());
        assert!(matches!(
            TaskScheduler::start(manager, "pool-404"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_task_id_is_rejected() {
        let (_manager, scheduler) = scheduler();
        scheduler
            .schedule(ScheduleRequest::from_fn(|| Ok(json!(1))).id("dup"))
            .unwrap();
        assert!(matches!(
            scheduler.schedule(ScheduleRequest::from_fn(|| Ok(json!(2))).id("dup")),
            Err(CoreError::Resource(_))
        ));
    }

    #[test]
    fn test_cancel_unknown_task_is_not_found() {
        let (_manager, scheduler) = scheduler();
        assert!(matches!(
            scheduler.cancel("ghost"),
            Err(CoreError::NotFound { kind: "task", .. })
        ));
        assert!(scheduler.status("ghost").is_none());
    }

    #[test]
    fn test_simple_task_runs_to_completion() {
        let (_manager, scheduler) = scheduler();
        let id = scheduler
            .schedule(ScheduleRequest::from_fn(|| Ok(json!({"frames": 100}))))
            .unwrap();
        let snapshot = scheduler.wait(&id, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result, Some(json!({"frames": 100})));
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.completed_at.is_some());
        assert!(snapshot.job_id.is_some());
    }

    #[test]
    fn test_clear_completed_sweeps_terminal_tasks() {
        let (_manager, scheduler) = scheduler();
        let done = scheduler
            .schedule(ScheduleRequest::from_fn(|| Ok(json!(1))))
            .unwrap();
        scheduler.wait(&done, Some(Duration::from_secs(5))).unwrap();
        let parked = scheduler
            .schedule(ScheduleRequest::from_fn(|| Ok(json!(2))).depends_on(["never"]))
            .unwrap();

        assert_eq!(scheduler.clear_completed(), 1);
        assert!(scheduler.status(&done).is_none());
        // The still-pending task survives the sweep.
        assert_eq!(
            scheduler.status(&parked).unwrap().status,
            TaskStatus::Pending
        );
    }
}
