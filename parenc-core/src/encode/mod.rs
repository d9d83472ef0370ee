// ============================================================================
// parenc-core/src/encode/mod.rs
// ============================================================================
//
// ENCODE ORCHESTRATOR: Parallel Encoding Across a Process Pool
//
// Drives many concurrent invocations of the encoder collaborator across a
// validated file list:
//
// 1. Validate inputs; invalid files are logged and excluded, an empty valid
//    list fails the run before any pool exists.
// 2. Create one managed queue for progress samples and one for output
//    notifications, each drained by a controller-side monitor thread that
//    forwards entries to the caller's EncodeMonitor.
// 3. Create a process pool sized to max_parallel_jobs and submit one job
//    per valid file; the job body owns its context outright, so it is safe
//    on a worker.
// 4. Consume results in submission order, checking the abort flag before
//    each one; per-file failures are logged individually and folded into
//    the final all_succeeded flag.
//
// Abort is cooperative and first-class: the pool is shut down without
// waiting, completed results are discarded, and the run reports failure
// immediately without being an error.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::EncodeConfig;
use crate::error::{CoreError, CoreResult};
use crate::execution::{ExecutionManager, IpcEvent, IpcQueue, PoolKind};
use crate::utils::format_duration;

mod encoder;
mod validation;

pub use encoder::{CommandEncoder, EncodeContext, EncodeReport, Encoder};
pub use validation::{is_processable_file, ExtensionValidator, FileValidator, PROCESSABLE_EXTENSIONS};

/// How long monitor threads block on their queue per iteration.
const MONITOR_POLL: Duration = Duration::from_millis(100);

/// How long the result loop blocks per iteration before rechecking abort.
const RESULT_POLL: Duration = Duration::from_millis(200);

/// Percent-complete sample for one task; last value wins per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSample {
    pub task_index: usize,
    pub filename: String,
    pub percent: f32,
}

/// Notification that a task produced an output artifact. Informational
/// only; never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputNotification {
    pub task_index: usize,
    pub relative_path: PathBuf,
    pub variant: Option<String>,
}

/// Caller-side sink for live run feedback. All methods default to no-ops.
pub trait EncodeMonitor: Send + Sync {
    fn on_progress(&self, _filename: &str, _percent: f32, _done: usize, _total: usize) {}
    fn on_output(&self, _path: &Path, _variant: Option<&str>) {}
}

/// Monitor that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl EncodeMonitor for NullMonitor {}

/// Clonable handle for requesting a cooperative abort of the current run.
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn request_abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fans a validated file list out across a process pool with live progress.
pub struct EncodeOrchestrator {
    manager: Arc<ExecutionManager>,
    config: EncodeConfig,
    abort: Arc<AtomicBool>,
    run_seq: AtomicU64,
}

impl EncodeOrchestrator {
    pub fn new(manager: Arc<ExecutionManager>, config: EncodeConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            manager,
            config,
            abort: Arc::new(AtomicBool::new(false)),
            run_seq: AtomicU64::new(1),
        })
    }

    /// Handle usable from any thread to stop the in-flight run.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(Arc::clone(&self.abort))
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Encodes every valid file, returning whether all of them succeeded.
    ///
    /// Per-file failures are logged and folded into the returned flag; an
    /// abort returns `Ok(false)` immediately without waiting for
    /// outstanding jobs. Only setup problems (bad pool, failed preflight)
    /// are errors.
    pub fn run(
        &self,
        validator: &dyn FileValidator,
        encoder: Arc<dyn Encoder>,
        monitor: Arc<dyn EncodeMonitor>,
    ) -> CoreResult<bool> {
        // A leftover abort request from a previous run must not poison
        // this one.
        self.abort.store(false, Ordering::SeqCst);

        let (valid_files, invalid_files) = validator.validate();
        for name in &invalid_files {
            warn!("Skipping invalid input: {name}");
        }
        if valid_files.is_empty() {
            warn!("No valid files to encode.");
            return Ok(false);
        }

        encoder.preflight(&self.config.params)?;

        let total = valid_files.len();
        let run = self.run_seq.fetch_add(1, Ordering::Relaxed);
        info!(
            "Encoding {total} file(s) with up to {} parallel job(s)",
            self.config.max_parallel_jobs
        );

        // Cross-worker plumbing: two payload queues, a stop event for the
        // monitor threads, and the shared done counter.
        let ipc = self.manager.ipc();
        let progress_queue_id = format!("encode-progress-{run}");
        let output_queue_id = format!("encode-outputs-{run}");
        let stop_event_id = format!("encode-stop-{run}");
        let progress_queue = ipc.create_queue(&progress_queue_id, None);
        let output_queue = ipc.create_queue(&output_queue_id, None);
        let stop = ipc.create_event(&stop_event_id);
        let done = Arc::new(Mutex::new(0usize));

        let cleanup_ipc = || {
            let _ = ipc.delete_queue(&progress_queue_id);
            let _ = ipc.delete_queue(&output_queue_id);
            let _ = ipc.delete_event(&stop_event_id);
        };

        let pool_id = match self
            .manager
            .create_pool(PoolKind::Process, self.config.max_parallel_jobs)
        {
            Ok(pool_id) => pool_id,
            Err(e) => {
                cleanup_ipc();
                return Err(e);
            }
        };

        // Queue handles buffer any early samples; the monitor threads are
        // only spawned once every job is safely submitted.
        let mut jobs = Vec::with_capacity(total);
        for (task_index, input) in valid_files.iter().enumerate() {
            let ctx = EncodeContext {
                input: input.clone(),
                output_root: self.config.output_root.clone(),
                params: self.config.params.clone(),
                task_index,
                progress: Arc::clone(&progress_queue),
                outputs: Arc::clone(&output_queue),
            };
            let filename = ctx.filename();
            let encoder = Arc::clone(&encoder);
            let submitted = self.manager.submit(
                &pool_id,
                Box::new(move || {
                    let report = encoder.encode(&ctx);
                    serde_json::to_value(&report)
                        .map_err(|e| format!("unserializable encode report: {e}"))
                }),
            );
            match submitted {
                Ok(job_id) => jobs.push((job_id, filename)),
                Err(e) => {
                    let _ = self.manager.shutdown_pool(&pool_id, false);
                    cleanup_ipc();
                    return Err(e);
                }
            }
        }

        let mut monitors = Vec::with_capacity(2);
        monitors.push(spawn_progress_monitor(
            Arc::clone(&progress_queue),
            Arc::clone(&stop),
            Arc::clone(&self.abort),
            Arc::clone(&monitor),
            Arc::clone(&done),
            total,
        ));
        monitors.push(spawn_output_monitor(
            Arc::clone(&output_queue),
            Arc::clone(&stop),
            Arc::clone(&self.abort),
            Arc::clone(&monitor),
        ));

        let mut all_succeeded = true;
        let mut aborted = false;
        'results: for (job_id, filename) in &jobs {
            loop {
                // The abort flag is checked before consuming each result.
                if self.abort.load(Ordering::SeqCst) {
                    warn!("Abort requested; discarding remaining encode results");
                    aborted = true;
                    break 'results;
                }
                match self.manager.job_result(job_id, Some(RESULT_POLL)) {
                    Err(CoreError::Timeout(_)) => continue,
                    Err(e) => {
                        all_succeeded = false;
                        error!("Encode job for {filename} did not complete: {e}");
                        self.bump_done(&done, &monitor, filename, total);
                        break;
                    }
                    Ok(value) => {
                        self.bump_done(&done, &monitor, filename, total);
                        match serde_json::from_value::<EncodeReport>(value) {
                            Ok(report) if report.success => {
                                info!(
                                    "Completed: {} in {}",
                                    report.filename,
                                    format_duration(Duration::from_secs_f64(
                                        report.duration_secs.max(0.0)
                                    ))
                                );
                            }
                            Ok(report) => {
                                all_succeeded = false;
                                error!(
                                    "Encoding failed for {}: {}",
                                    report.filename,
                                    report.error.as_deref().unwrap_or("unknown error")
                                );
                            }
                            Err(e) => {
                                all_succeeded = false;
                                error!("Malformed encode report for {filename}: {e}");
                            }
                        }
                        break;
                    }
                }
            }
        }

        if aborted {
            // wait=false: queued jobs are cancelled, running workers are
            // abandoned rather than waited on.
            let _ = self.manager.shutdown_pool(&pool_id, false);
        } else {
            self.manager.shutdown_pool(&pool_id, true)?;
        }

        stop.set();
        for handle in monitors {
            if handle.join().is_err() {
                warn!("encode monitor thread panicked");
            }
        }

        cleanup_ipc();

        if aborted {
            return Ok(false);
        }
        if all_succeeded {
            info!("All {total} file(s) encoded successfully");
        }
        Ok(all_succeeded)
    }

    fn bump_done(
        &self,
        done: &Arc<Mutex<usize>>,
        monitor: &Arc<dyn EncodeMonitor>,
        filename: &str,
        total: usize,
    ) {
        let count = {
            let mut done = done.lock().unwrap();
            *done += 1;
            *done
        };
        monitor.on_progress(filename, 100.0, count, total);
    }
}

// ============================================================================
// MONITOR THREADS
// ============================================================================

fn spawn_progress_monitor(
    queue: Arc<IpcQueue>,
    stop: Arc<IpcEvent>,
    abort: Arc<AtomicBool>,
    monitor: Arc<dyn EncodeMonitor>,
    done: Arc<Mutex<usize>>,
    total: usize,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        // An aborted run discards feedback; stop draining right away even
        // if abandoned workers are still producing samples.
        if abort.load(Ordering::SeqCst) {
            break;
        }
        match queue.get_as::<ProgressSample>(Some(MONITOR_POLL)) {
            Some(sample) => {
                let done = *done.lock().unwrap();
                monitor.on_progress(&sample.filename, sample.percent, done, total);
            }
            None => {
                if stop.is_set() {
                    break;
                }
            }
        }
    })
}

fn spawn_output_monitor(
    queue: Arc<IpcQueue>,
    stop: Arc<IpcEvent>,
    abort: Arc<AtomicBool>,
    monitor: Arc<dyn EncodeMonitor>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        match queue.get_as::<OutputNotification>(Some(MONITOR_POLL)) {
            Some(notification) => {
                info!(
                    "Output produced: {}{}",
                    notification.relative_path.display(),
                    notification
                        .variant
                        .as_deref()
                        .map(|v| format!(" [{v}]"))
                        .unwrap_or_default()
                );
                monitor.on_output(
                    &notification.relative_path,
                    notification.variant.as_deref(),
                );
            }
            None => {
                if stop.is_set() {
                    break;
                }
            }
        }
    })
}
