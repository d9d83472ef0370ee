//! Launching and monitoring plain OS processes.
//!
//! This is the sole place the core touches the OS process boundary. The
//! synchronous helper captures stdout/stderr and enforces an optional
//! timeout; the asynchronous variant parks a monitor thread on the child
//! and records completion for later inspection or a one-shot callback.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::{CoreError, CoreResult};

/// Poll interval while waiting on a child process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// SPEC AND OUTPUT
// ============================================================================

/// Description of an external process to launch.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured result of a finished external process.
///
/// A non-zero exit is not an error at this layer; callers classify the
/// outcome from the exit code and the captured stderr text.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ============================================================================
// SYNCHRONOUS EXECUTION
// ============================================================================

fn spawn_line_reader<R: std::io::Read + Send + 'static>(
    reader: R,
) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut lines = Vec::new();
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => lines.push(line),
                Err(_) => break,
            }
        }
        lines
    })
}

/// Runs an external process to completion, capturing its output.
///
/// Exceeding `spec.timeout` kills the child and fails with
/// `CoreError::Timeout`; the caller decides whether to retry.
pub(crate) fn run_process(spec: &ProcessSpec) -> CoreResult<ProcessOutput> {
    let start = Instant::now();
    debug!("Running external process: {} {}", spec.program, spec.args.join(" "));

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| CoreError::CommandStart(spec.program.clone(), e))?;

    if let Some(payload) = &spec.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early may close its end first; that is fine.
            let _ = stdin.write_all(payload.as_bytes());
        }
    }

    let stdout_handle = spawn_line_reader(child.stdout.take().expect("stdout piped"));
    let stderr_handle = spawn_line_reader(child.stderr.take().expect("stderr piped"));

    let status = match spec.timeout {
        Some(timeout) => {
            let mut status = None;
            while start.elapsed() < timeout {
                match child.try_wait()? {
                    Some(s) => {
                        status = Some(s);
                        break;
                    }
                    None => thread::sleep(WAIT_POLL_INTERVAL),
                }
            }
            match status {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    drop(stdout_handle.join());
                    drop(stderr_handle.join());
                    return Err(CoreError::Timeout(format!(
                        "process '{}' exceeded {}s",
                        spec.program,
                        timeout.as_secs()
                    )));
                }
            }
        }
        None => child.wait()?,
    };

    let stdout = stdout_handle.join().unwrap_or_default().join("\n");
    let stderr = stderr_handle.join().unwrap_or_default().join("\n");
    let output = ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: start.elapsed(),
    };
    if !output.success() {
        debug!(
            "Process '{}' exited with code {:?}",
            spec.program, output.exit_code
        );
    }
    Ok(output)
}

// ============================================================================
// DEPENDENCY CHECKING
// ============================================================================

/// Checks that a required external command exists and starts.
///
/// Runs `<cmd> -version` discarding output, the same probe the encode path
/// uses before creating any pool.
pub fn check_dependency(cmd_name: &str) -> CoreResult<()> {
    let result = Command::new(cmd_name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(_) => {
            debug!("Found dependency: {cmd_name}");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Dependency '{cmd_name}' not found.");
            Err(CoreError::DependencyNotFound(cmd_name.to_string()))
        }
        Err(e) => {
            error!("Failed to start dependency check command '{cmd_name}': {e}");
            Err(CoreError::CommandStart(cmd_name.to_string(), e))
        }
    }
}

// ============================================================================
// ASYNCHRONOUS EXECUTION
// ============================================================================

/// Callback invoked once by the monitor thread when an async process ends.
pub type ProcessCallback = Box<dyn FnOnce(&str, &ProcessOutput) + Send + 'static>;

struct AsyncProcessInner {
    /// Present while the child is running; taken by the monitor on exit and
    /// by `terminate` when it has to kill.
    child: Mutex<Option<Child>>,
    output: Mutex<Option<ProcessOutput>>,
    done: Condvar,
}

/// Table of in-flight asynchronous processes, owned by the execution manager.
#[derive(Default)]
pub(crate) struct ProcessTable {
    entries: Mutex<HashMap<String, Arc<AsyncProcessInner>>>,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawns the process and a monitor thread that records completion and
    /// fires the optional callback.
    pub(crate) fn spawn(
        &self,
        process_id: String,
        spec: &ProcessSpec,
        callback: Option<ProcessCallback>,
    ) -> CoreResult<()> {
        let start = Instant::now();
        debug!(
            "Spawning async process {}: {} {}",
            process_id,
            spec.program,
            spec.args.join(" ")
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::CommandStart(spec.program.clone(), e))?;

        if let Some(payload) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(payload.as_bytes());
            }
        }

        let stdout_handle = spawn_line_reader(child.stdout.take().expect("stdout piped"));
        let stderr_handle = spawn_line_reader(child.stderr.take().expect("stderr piped"));

        let inner = Arc::new(AsyncProcessInner {
            child: Mutex::new(Some(child)),
            output: Mutex::new(None),
            done: Condvar::new(),
        });
        self.entries
            .lock()
            .unwrap()
            .insert(process_id.clone(), Arc::clone(&inner));

        let monitor_inner = Arc::clone(&inner);
        thread::spawn(move || {
            let status = loop {
                let waited = {
                    let mut guard = monitor_inner.child.lock().unwrap();
                    match guard.as_mut() {
                        Some(child) => child.try_wait().ok().flatten(),
                        // Child already reaped elsewhere; nothing to record.
                        None => return,
                    }
                };
                match waited {
                    Some(status) => {
                        *monitor_inner.child.lock().unwrap() = None;
                        break status;
                    }
                    None => thread::sleep(WAIT_POLL_INTERVAL),
                }
            };

            let stdout = stdout_handle.join().unwrap_or_default().join("\n");
            let stderr = stderr_handle.join().unwrap_or_default().join("\n");
            let output = ProcessOutput {
                exit_code: status.code(),
                stdout,
                stderr,
                duration: start.elapsed(),
            };
            debug!(
                "Async process {} finished with code {:?}",
                process_id, output.exit_code
            );
            *monitor_inner.output.lock().unwrap() = Some(output.clone());
            monitor_inner.done.notify_all();
            if let Some(callback) = callback {
                callback(&process_id, &output);
            }
        });
        Ok(())
    }

    pub(crate) fn output(&self, process_id: &str) -> CoreResult<Option<ProcessOutput>> {
        let inner = self.entry(process_id)?;
        let output = inner.output.lock().unwrap().clone();
        Ok(output)
    }

    /// Requests a graceful stop (closing stdin), waits up to `grace`, then
    /// kills. Returns false if the process had already finished.
    pub(crate) fn terminate(&self, process_id: &str, grace: Duration) -> CoreResult<bool> {
        let inner = self.entry(process_id)?;

        {
            let mut guard = inner.child.lock().unwrap();
            match guard.as_mut() {
                Some(child) => drop(child.stdin.take()),
                None => return Ok(false),
            }
        }

        // Wait for the monitor to observe a graceful exit.
        let mut output = inner.output.lock().unwrap();
        let deadline = Instant::now() + grace;
        while output.is_none() {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => break,
            };
            let (guard, _) = inner.done.wait_timeout(output, remaining).unwrap();
            output = guard;
        }
        if output.is_some() {
            return Ok(true);
        }
        drop(output);

        warn!("Process {process_id} did not stop within grace period, killing");
        if let Some(child) = inner.child.lock().unwrap().as_mut() {
            let _ = child.kill();
        }
        // The monitor thread reaps the killed child and records its output.
        let mut output = inner.output.lock().unwrap();
        while output.is_none() {
            let (guard, _) = inner
                .done
                .wait_timeout(output, WAIT_POLL_INTERVAL)
                .unwrap();
            output = guard;
        }
        Ok(true)
    }

    fn entry(&self, process_id: &str) -> CoreResult<Arc<AsyncProcessInner>> {
        self.entries
            .lock()
            .unwrap()
            .get(process_id)
            .cloned()
            .ok_or_else(|| CoreError::ipc_not_found("process", process_id))
    }
}
