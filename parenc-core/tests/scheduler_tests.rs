// parenc-core/tests/scheduler_tests.rs
//
// End-to-end behavior of the task scheduler over a real execution manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use parenc_core::execution::{ExecutionManager, PoolKind};
use parenc_core::scheduler::{ScheduleRequest, TaskFilter, TaskScheduler, TaskStatus};

const TICK: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(10);

fn single_worker_scheduler() -> (Arc<ExecutionManager>, TaskScheduler) {
    let manager = Arc::new(ExecutionManager::new());
    let pool_id = manager.create_pool(PoolKind::Thread, 1).unwrap();
    let scheduler = TaskScheduler::start_with_tick(Arc::clone(&manager), pool_id, TICK).unwrap();
    (manager, scheduler)
}

/// Work that appends its task id to a shared execution log.
fn logging_work(
    log: &Arc<Mutex<Vec<String>>>,
    id: &str,
) -> impl FnOnce() -> Result<Value, String> + Send + 'static {
    let log = Arc::clone(log);
    let id = id.to_string();
    move || {
        log.lock().unwrap().push(id);
        Ok(Value::Null)
    }
}

#[test]
fn test_priority_order_on_single_worker() {
    let (_manager, scheduler) = single_worker_scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));

    // Everything waits on a gate task scheduled last, so one promotion pass
    // sees all of them at once regardless of control-loop timing.
    let a = scheduler
        .schedule(
            ScheduleRequest::new(Box::new(logging_work(&log, "a")))
                .id("a")
                .priority(1)
                .depends_on(["gate"]),
        )
        .unwrap();
    let b = scheduler
        .schedule(
            ScheduleRequest::new(Box::new(logging_work(&log, "b")))
                .id("b")
                .priority(10)
                .depends_on(["gate"]),
        )
        .unwrap();
    let c = scheduler
        .schedule(
            ScheduleRequest::new(Box::new(logging_work(&log, "c")))
                .id("c")
                .priority(5)
                .depends_on(["gate", "a"]),
        )
        .unwrap();
    scheduler
        .schedule(ScheduleRequest::from_fn(|| Ok(Value::Null)).id("gate"))
        .unwrap();

    for id in [&a, &b, &c] {
        let snapshot = scheduler.wait(id, Some(DEADLINE)).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
    }

    // Expected start order: b (10), a (1, unblocks c), c (5).
    assert_eq!(*log.lock().unwrap(), vec!["b", "a", "c"]);
}

#[test]
fn test_fifo_within_equal_priority() {
    let (_manager, scheduler) = single_worker_scheduler();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        scheduler
            .schedule(
                ScheduleRequest::new(Box::new(logging_work(&log, name)))
                    .id(name)
                    .priority(3)
                    .depends_on(["gate"]),
            )
            .unwrap();
    }
    scheduler
        .schedule(ScheduleRequest::from_fn(|| Ok(Value::Null)).id("gate"))
        .unwrap();

    for name in ["first", "second", "third"] {
        scheduler.wait(name, Some(DEADLINE)).unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn test_dependent_never_starts_before_dependency_completes() {
    let (_manager, scheduler) = single_worker_scheduler();
    let a_done = Arc::new(AtomicBool::new(false));

    let a_flag = Arc::clone(&a_done);
    scheduler
        .schedule(
            ScheduleRequest::from_fn(move || {
                thread::sleep(Duration::from_millis(150));
                a_flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .id("upstream"),
        )
        .unwrap();

    let a_check = Arc::clone(&a_done);
    let b = scheduler
        .schedule(
            ScheduleRequest::from_fn(move || {
                if a_check.load(Ordering::SeqCst) {
                    Ok(json!("ordered"))
                } else {
                    Err("started before dependency completed".to_string())
                }
            })
            .id("downstream")
            .depends_on(["upstream"]),
        )
        .unwrap();

    let snapshot = scheduler.wait(&b, Some(DEADLINE)).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.result, Some(json!("ordered")));
}

#[test]
fn test_cancel_pending_always_succeeds() {
    let (_manager, scheduler) = single_worker_scheduler();

    scheduler
        .schedule(
            ScheduleRequest::from_fn(|| {
                thread::sleep(Duration::from_millis(300));
                Ok(Value::Null)
            })
            .id("holder"),
        )
        .unwrap();
    // Parked behind the holder by a dependency, so it stays pending.
    let parked = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| Ok(Value::Null))
                .id("parked")
                .depends_on(["holder"]),
        )
        .unwrap();

    assert!(scheduler.cancel(&parked).unwrap());
    let snapshot = scheduler.status(&parked).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    // It went straight from pending to cancelled, never through running.
    assert!(snapshot.started_at.is_none());
    assert!(snapshot.job_id.is_none());

    // The cancelled dependency must not resurrect the task later.
    scheduler.wait("holder", Some(DEADLINE)).unwrap();
    thread::sleep(TICK * 5);
    assert_eq!(
        scheduler.status(&parked).unwrap().status,
        TaskStatus::Cancelled
    );
}

#[test]
fn test_wait_timeout_leaves_task_untouched() {
    let (_manager, scheduler) = single_worker_scheduler();
    let id = scheduler
        .schedule(ScheduleRequest::from_fn(|| {
            thread::sleep(Duration::from_millis(400));
            Ok(json!("slow"))
        }))
        .unwrap();

    assert!(scheduler.wait(&id, Some(Duration::from_millis(50))).is_none());
    // The timed-out wait observed nothing and changed nothing.
    let status = scheduler.status(&id).unwrap().status;
    assert!(matches!(status, TaskStatus::Pending | TaskStatus::Running));

    let snapshot = scheduler.wait(&id, Some(DEADLINE)).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.result, Some(json!("slow")));
}

#[test]
fn test_failed_task_reports_error_through_callback() {
    let (_manager, scheduler) = single_worker_scheduler();
    let seen: Arc<Mutex<Vec<(String, bool, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let seen_ok = Arc::clone(&seen);
    let ok = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| Ok(json!(1)))
                .on_complete(move |id, success, outcome| {
                    let text = match outcome {
                        Ok(value) => value.to_string(),
                        Err(e) => e.to_string(),
                    };
                    seen_ok.lock().unwrap().push((id.to_string(), success, text));
                }),
        )
        .unwrap();

    let seen_err = Arc::clone(&seen);
    let failed = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| Err("no streams found".to_string()))
                .on_complete(move |id, success, outcome| {
                    let text = match outcome {
                        Ok(value) => value.to_string(),
                        Err(e) => e.to_string(),
                    };
                    seen_err.lock().unwrap().push((id.to_string(), success, text));
                }),
        )
        .unwrap();

    assert_eq!(
        scheduler.wait(&ok, Some(DEADLINE)).unwrap().status,
        TaskStatus::Completed
    );
    let snapshot = scheduler.wait(&failed, Some(DEADLINE)).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("no streams found"));

    // Callbacks fire on the tick that reaps the task; give it a moment.
    let deadline = Instant::now() + DEADLINE;
    while seen.lock().unwrap().len() < 2 && Instant::now() < deadline {
        thread::sleep(TICK);
    }
    let seen = seen.lock().unwrap();
    assert!(seen.contains(&(ok.clone(), true, "1".to_string())));
    assert!(seen.contains(&(failed.clone(), false, "no streams found".to_string())));
}

#[test]
fn test_dependent_of_failed_task_stays_pending() {
    let (_manager, scheduler) = single_worker_scheduler();

    let doomed = scheduler
        .schedule(ScheduleRequest::from_fn(|| Err("boom".to_string())).id("doomed"))
        .unwrap();
    let orphan = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| Ok(Value::Null))
                .id("orphan")
                .depends_on(["doomed"]),
        )
        .unwrap();

    assert_eq!(
        scheduler.wait(&doomed, Some(DEADLINE)).unwrap().status,
        TaskStatus::Failed
    );

    // The dependent is never promoted and never auto-cancelled; it sits
    // pending until someone cancels it explicitly.
    thread::sleep(TICK * 10);
    assert_eq!(
        scheduler.status(&orphan).unwrap().status,
        TaskStatus::Pending
    );
    let pending = scheduler.list(TaskFilter::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, orphan);
}

#[test]
fn test_task_timeout_fails_the_task() {
    let (_manager, scheduler) = single_worker_scheduler();
    let id = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| {
                thread::sleep(Duration::from_millis(600));
                Ok(Value::Null)
            })
            .timeout(Duration::from_millis(100)),
        )
        .unwrap();

    let snapshot = scheduler.wait(&id, Some(DEADLINE)).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert!(snapshot.error.as_deref().unwrap_or("").contains("timed out"));

    // The late completion of the abandoned job must not flip the task back.
    thread::sleep(Duration::from_millis(700));
    assert_eq!(scheduler.status(&id).unwrap().status, TaskStatus::Failed);
}

#[test]
fn test_list_and_clear_completed() {
    let (_manager, scheduler) = single_worker_scheduler();

    let done = scheduler
        .schedule(ScheduleRequest::from_fn(|| Ok(Value::Null)))
        .unwrap();
    scheduler.wait(&done, Some(DEADLINE)).unwrap();
    scheduler
        .schedule(ScheduleRequest::from_fn(|| Ok(Value::Null)).depends_on(["nothing-yet"]))
        .unwrap();

    assert_eq!(scheduler.list(TaskFilter::All).len(), 2);
    assert_eq!(scheduler.list(TaskFilter::Completed).len(), 1);
    assert_eq!(scheduler.list(TaskFilter::Pending).len(), 1);

    assert_eq!(scheduler.clear_completed(), 1);
    assert_eq!(scheduler.list(TaskFilter::All).len(), 1);
    // A second sweep has nothing left to remove.
    assert_eq!(scheduler.clear_completed(), 0);
}

#[test]
fn test_scheduler_survives_panicking_callback() {
    let (_manager, scheduler) = single_worker_scheduler();

    let bad = scheduler
        .schedule(
            ScheduleRequest::from_fn(|| Ok(Value::Null))
                .on_complete(|_, _, _| panic!("callback exploded")),
        )
        .unwrap();
    assert_eq!(
        scheduler.wait(&bad, Some(DEADLINE)).unwrap().status,
        TaskStatus::Completed
    );

    // The control loop kept going: later tasks still run.
    let after = scheduler
        .schedule(ScheduleRequest::from_fn(|| Ok(json!("still alive"))))
        .unwrap();
    let snapshot = scheduler.wait(&after, Some(DEADLINE)).unwrap();
    assert_eq!(snapshot.result, Some(json!("still alive")));
}
