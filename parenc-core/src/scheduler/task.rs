//! Task records and the schedule-request builder.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::execution::{JobFn, JobValue};

/// Invoked exactly once when a task reaches a terminal state through the
/// control loop, with `(task_id, success, result_or_error)`.
pub type CompletionCallback = Box<dyn Fn(&str, bool, Result<&JobValue, &str>) + Send + 'static>;

/// Lifecycle of a scheduled task.
///
/// Transitions are `Pending -> Running -> {Completed | Failed | Cancelled}`,
/// plus `Pending -> Cancelled` for tasks cancelled before promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Filter for [`TaskScheduler::list`](super::TaskScheduler::list).
/// `Completed` matches every terminal state, not just successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    Pending,
    Running,
    Completed,
    All,
}

impl TaskFilter {
    pub(crate) fn matches(self, status: TaskStatus) -> bool {
        match self {
            TaskFilter::Pending => status == TaskStatus::Pending,
            TaskFilter::Running => status == TaskStatus::Running,
            TaskFilter::Completed => status.is_terminal(),
            TaskFilter::All => true,
        }
    }
}

/// A deferred unit of work handed to [`TaskScheduler::schedule`].
///
/// ```no_run
/// use parenc_core::scheduler::ScheduleRequest;
/// use serde_json::json;
///
/// let request = ScheduleRequest::from_fn(|| Ok(json!("encoded")))
///     .id("encode-title")
///     .priority(10)
///     .depends_on(["probe-title"]);
/// ```
///
/// [`TaskScheduler::schedule`]: super::TaskScheduler::schedule
pub struct ScheduleRequest {
    pub(crate) id: Option<String>,
    pub(crate) work: JobFn,
    pub(crate) priority: i32,
    pub(crate) dependencies: Vec<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) callback: Option<CompletionCallback>,
}

impl ScheduleRequest {
    pub fn new(work: JobFn) -> Self {
        Self {
            id: None,
            work,
            priority: 0,
            dependencies: Vec::new(),
            timeout: None,
            callback: None,
        }
    }

    pub fn from_fn(
        work: impl FnOnce() -> Result<JobValue, String> + Send + 'static,
    ) -> Self {
        Self::new(Box::new(work))
    }

    /// Caller-chosen id; the scheduler generates one when omitted.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Higher priorities are promoted first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Ids of tasks that must complete before this one may start.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Wall-clock bound on the running phase; exceeding it fails the task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_complete(
        mut self,
        callback: impl Fn(&str, bool, Result<&JobValue, &str>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// Internal task record; mutated only by the control loop (and by explicit
/// cancellation requests).
pub(crate) struct Task {
    pub(crate) id: String,
    pub(crate) seq: u64,
    /// Consumed on promotion.
    pub(crate) work: Option<JobFn>,
    pub(crate) priority: i32,
    pub(crate) dependencies: Vec<String>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) callback: Option<CompletionCallback>,
    pub(crate) status: TaskStatus,
    pub(crate) result: Option<JobValue>,
    pub(crate) error: Option<String>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    /// Set at most once, while the task is Running.
    pub(crate) job_id: Option<String>,
    pub(crate) deadline: Option<Instant>,
    /// Keeps the starved-dependency log line from repeating every tick.
    pub(crate) starvation_logged: bool,
}

impl Task {
    pub(crate) fn new(id: String, seq: u64, request: ScheduleRequest) -> Self {
        Self {
            id,
            seq,
            work: Some(request.work),
            priority: request.priority,
            dependencies: request.dependencies,
            timeout: request.timeout,
            callback: request.callback,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            job_id: None,
            deadline: None,
            starvation_logged: false,
        }
    }

    pub(crate) fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            status: self.status,
            priority: self.priority,
            dependencies: self.dependencies.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            job_id: self.job_id.clone(),
        }
    }
}

/// Point-in-time copy of a task's bookkeeping, safe to hand to callers.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub result: Option<JobValue>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub job_id: Option<String>,
}
