// parenc-core/tests/orchestrator_tests.rs
//
// Orchestrator behavior against mock validator/encoder collaborators.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::tempdir;

use parenc_core::config::EncodeConfig;
use parenc_core::encode::{
    EncodeContext, EncodeMonitor, EncodeOrchestrator, EncodeReport, Encoder, ExtensionValidator,
    FileValidator, OutputNotification, ProgressSample,
};
use parenc_core::error::{CoreError, CoreResult};
use parenc_core::execution::ExecutionManager;
use parenc_core::EncodeParams;

/// Encoder double: sleeps a bit, streams fixed progress samples, emits an
/// output notification, and fails for any input whose name contains "bad".
struct MockEncoder {
    calls: AtomicUsize,
    work_time: Duration,
}

impl MockEncoder {
    fn new(work_time: Duration) -> Self {
        Self { calls: AtomicUsize::new(0), work_time }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for MockEncoder {
    fn encode(&self, ctx: &EncodeContext) -> EncodeReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let filename = ctx.filename();

        for percent in [25.0_f32, 50.0, 75.0] {
            let sample = ProgressSample {
                task_index: ctx.task_index,
                filename: filename.clone(),
                percent,
            };
            ctx.progress.put(&sample).unwrap();
            if !self.work_time.is_zero() {
                thread::sleep(self.work_time / 3);
            }
        }

        let success = !filename.contains("bad");
        if success {
            let stem = ctx.input.file_stem().unwrap().to_string_lossy();
            let notification = OutputNotification {
                task_index: ctx.task_index,
                relative_path: PathBuf::from(format!(
                    "{stem}.{}",
                    ctx.params.output_extension
                )),
                variant: ctx.params.variant.clone(),
            };
            ctx.outputs.put(&notification).unwrap();
        }

        EncodeReport {
            filename,
            success,
            duration_secs: self.work_time.as_secs_f64(),
            error: if success { None } else { Some("mock encoder failure".to_string()) },
        }
    }
}

/// Encoder whose preflight probe always fails.
struct BrokenEncoder;

impl Encoder for BrokenEncoder {
    fn preflight(&self, _params: &EncodeParams) -> CoreResult<()> {
        Err(CoreError::DependencyNotFound("mock-encoder".to_string()))
    }

    fn encode(&self, _ctx: &EncodeContext) -> EncodeReport {
        unreachable!("preflight failure must prevent encoding")
    }
}

/// Monitor double recording every callback.
#[derive(Default)]
struct RecordingMonitor {
    progress: Mutex<Vec<(String, f32, usize, usize)>>,
    outputs: Mutex<Vec<(PathBuf, Option<String>)>>,
}

impl EncodeMonitor for RecordingMonitor {
    fn on_progress(&self, filename: &str, percent: f32, done: usize, total: usize) {
        self.progress
            .lock()
            .unwrap()
            .push((filename.to_string(), percent, done, total));
    }

    fn on_output(&self, path: &Path, variant: Option<&str>) {
        self.outputs
            .lock()
            .unwrap()
            .push((path.to_path_buf(), variant.map(str::to_string)));
    }
}

fn make_inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            File::create(&path).unwrap();
            path
        })
        .collect()
}

fn orchestrator(output_root: &Path, jobs: usize) -> EncodeOrchestrator {
    let manager = Arc::new(ExecutionManager::new());
    let mut config = EncodeConfig::new(output_root);
    config.max_parallel_jobs = jobs;
    EncodeOrchestrator::new(manager, config).unwrap()
}

#[test]
fn test_invalid_files_are_excluded_and_failures_reported() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();

    // 10 candidates: 8 real files (one of which will fail to encode) plus
    // 2 that do not exist on disk.
    let mut candidates = make_inputs(
        input_dir.path(),
        &[
            "a.mkv", "b.mkv", "c.mkv", "d.mkv", "e.mkv", "f.mkv", "g.mkv", "bad.mkv",
        ],
    );
    candidates.push(input_dir.path().join("missing1.mkv"));
    candidates.push(input_dir.path().join("missing2.mkv"));

    let orchestrator = orchestrator(output_dir.path(), 4);
    let encoder = Arc::new(MockEncoder::new(Duration::ZERO));
    let monitor = Arc::new(RecordingMonitor::default());

    let all_ok = orchestrator
        .run(
            &ExtensionValidator::new(candidates),
            Arc::clone(&encoder) as Arc<dyn Encoder>,
            Arc::clone(&monitor) as Arc<dyn EncodeMonitor>,
        )
        .unwrap();

    assert!(!all_ok, "one of the eight files failed");
    assert_eq!(encoder.calls(), 8, "exactly the valid files are processed");

    // Every resolved job bumped the shared counter up to the total of 8.
    let progress = monitor.progress.lock().unwrap();
    let final_done = progress
        .iter()
        .filter(|(_, percent, _, _)| *percent == 100.0)
        .map(|(_, _, done, _)| *done)
        .max();
    assert_eq!(final_done, Some(8));
    assert!(progress.iter().all(|(_, _, _, total)| *total == 8));
}

#[test]
fn test_all_success_with_outputs_and_progress() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = make_inputs(input_dir.path(), &["one.mkv", "two.mkv", "three.mkv"]);

    let orchestrator = orchestrator(output_dir.path(), 2);
    let encoder = Arc::new(MockEncoder::new(Duration::from_millis(60)));
    let monitor = Arc::new(RecordingMonitor::default());

    let all_ok = orchestrator
        .run(
            &ExtensionValidator::new(inputs),
            Arc::clone(&encoder) as Arc<dyn Encoder>,
            Arc::clone(&monitor) as Arc<dyn EncodeMonitor>,
        )
        .unwrap();
    assert!(all_ok);

    // All mid-flight samples were drained to the monitor before the run
    // returned.
    let progress = monitor.progress.lock().unwrap();
    let halfway: Vec<_> = progress
        .iter()
        .filter(|(_, percent, _, _)| *percent == 50.0)
        .collect();
    assert_eq!(halfway.len(), 3, "one 50% sample per file: {progress:?}");

    let outputs = monitor.outputs.lock().unwrap();
    let mut produced: Vec<_> = outputs
        .iter()
        .map(|(path, _)| path.to_string_lossy().into_owned())
        .collect();
    produced.sort();
    assert_eq!(produced, vec!["one.mkv", "three.mkv", "two.mkv"]);
}

#[test]
fn test_variant_tag_travels_with_output_notifications() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = make_inputs(input_dir.path(), &["clip.mkv"]);

    let manager = Arc::new(ExecutionManager::new());
    let mut config = EncodeConfig::new(output_dir.path());
    config.max_parallel_jobs = 1;
    config.params.variant = Some("av1-high".to_string());
    let orchestrator = EncodeOrchestrator::new(manager, config).unwrap();

    let monitor = Arc::new(RecordingMonitor::default());
    let all_ok = orchestrator
        .run(
            &ExtensionValidator::new(inputs),
            Arc::new(MockEncoder::new(Duration::ZERO)),
            Arc::clone(&monitor) as Arc<dyn EncodeMonitor>,
        )
        .unwrap();
    assert!(all_ok);

    let outputs = monitor.outputs.lock().unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].1.as_deref(), Some("av1-high"));
}

#[test]
fn test_empty_valid_list_fails_without_encoding() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    // Only nonexistent candidates: validation rejects everything.
    let candidates = vec![
        input_dir.path().join("ghost1.mkv"),
        input_dir.path().join("ghost2.mkv"),
    ];

    let orchestrator = orchestrator(output_dir.path(), 2);
    let encoder = Arc::new(MockEncoder::new(Duration::ZERO));

    let all_ok = orchestrator
        .run(
            &ExtensionValidator::new(candidates),
            Arc::clone(&encoder) as Arc<dyn Encoder>,
            Arc::new(RecordingMonitor::default()),
        )
        .unwrap();

    assert!(!all_ok);
    assert_eq!(encoder.calls(), 0);
}

#[test]
fn test_failed_preflight_aborts_the_run_as_an_error() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = make_inputs(input_dir.path(), &["movie.mkv"]);

    let orchestrator = orchestrator(output_dir.path(), 1);
    let result = orchestrator.run(
        &ExtensionValidator::new(inputs),
        Arc::new(BrokenEncoder),
        Arc::new(RecordingMonitor::default()),
    );
    assert!(matches!(result, Err(CoreError::DependencyNotFound(_))));
}

#[test]
fn test_abort_returns_immediately() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = make_inputs(input_dir.path(), &["w.mkv", "x.mkv", "y.mkv", "z.mkv"]);

    // Each encode takes ~3s; without the abort this run would need two
    // waves of the 2-worker pool, roughly 6s of wall time.
    let slow_encode = Duration::from_secs(3);
    let orchestrator = Arc::new(orchestrator(output_dir.path(), 2));
    let abort = orchestrator.abort_handle();

    let runner = Arc::clone(&orchestrator);
    let run_thread = thread::spawn(move || {
        let started = Instant::now();
        let result = runner.run(
            &ExtensionValidator::new(inputs),
            Arc::new(MockEncoder::new(slow_encode)),
            Arc::new(RecordingMonitor::default()),
        );
        (result, started.elapsed())
    });

    thread::sleep(Duration::from_millis(150));
    abort.request_abort();
    let (result, elapsed) = run_thread.join().unwrap();

    assert!(matches!(result, Ok(false)), "abort reports failure, not an error");
    assert!(
        elapsed < Duration::from_secs(2),
        "aborted run took {elapsed:?}, should not wait for in-flight encodes"
    );
}

#[test]
fn test_abort_flag_resets_between_runs() {
    let input_dir = tempdir().unwrap();
    let output_dir = tempdir().unwrap();
    let inputs = make_inputs(input_dir.path(), &["again.mkv"]);

    let orchestrator = orchestrator(output_dir.path(), 1);
    orchestrator.request_abort();

    // The stale abort request is cleared when the next run starts.
    let all_ok = orchestrator
        .run(
            &ExtensionValidator::new(inputs),
            Arc::new(MockEncoder::new(Duration::ZERO)),
            Arc::new(RecordingMonitor::default()),
        )
        .unwrap();
    assert!(all_ok);
}
