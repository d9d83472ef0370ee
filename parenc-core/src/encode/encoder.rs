//! The encoder collaborator and its default command-line implementation.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::EncodeParams;
use crate::error::CoreResult;
use crate::execution::{check_dependency, IpcQueue};

use super::{OutputNotification, ProgressSample};

/// Number of trailing stderr lines kept as the failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// Everything an encoder needs for one file.
///
/// The context is self-contained and safe to move onto a pool worker: the
/// only shared state it carries are the two queue handles.
pub struct EncodeContext {
    pub input: PathBuf,
    pub output_root: PathBuf,
    pub params: EncodeParams,
    pub task_index: usize,
    /// Receives [`ProgressSample`] payloads.
    pub progress: Arc<IpcQueue>,
    /// Receives [`OutputNotification`] payloads.
    pub outputs: Arc<IpcQueue>,
}

impl EncodeContext {
    pub fn filename(&self) -> String {
        self.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.display().to_string())
    }
}

/// Result tuple of one encode job. Serializable so it can travel back from
/// the worker as the job's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeReport {
    pub filename: String,
    pub success: bool,
    pub duration_secs: f64,
    pub error: Option<String>,
}

/// Worker-safe encoding collaborator.
///
/// Implementations must not hold controller-side state beyond the queue
/// handles in the context; progress travels exclusively through the
/// progress queue, produced artifacts through the output queue.
pub trait Encoder: Send + Sync {
    /// Verifies the encoder can run at all; called once per run before any
    /// pool is created.
    fn preflight(&self, _params: &EncodeParams) -> CoreResult<()> {
        Ok(())
    }

    fn encode(&self, ctx: &EncodeContext) -> EncodeReport;
}

/// Default [`Encoder`] driving an external ffmpeg-style binary.
///
/// The command line is `<bin> -y -i <input> <video_args...> <output>`; the
/// child's stderr is streamed for `time=`/`duration=` progress lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandEncoder;

impl CommandEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder for CommandEncoder {
    fn preflight(&self, params: &EncodeParams) -> CoreResult<()> {
        check_dependency(&params.encoder_bin)
    }

    fn encode(&self, ctx: &EncodeContext) -> EncodeReport {
        let start = Instant::now();
        let filename = ctx.filename();

        let stem = ctx
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.clone());
        let output_path = ctx
            .output_root
            .join(format!("{stem}.{}", ctx.params.output_extension));

        let mut cmd = Command::new(&ctx.params.encoder_bin);
        cmd.arg("-y").arg("-i").arg(&ctx.input);
        for arg in &ctx.params.video_args {
            cmd.arg(arg);
        }
        cmd.arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("Encoding {filename} -> {}", output_path.display());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return EncodeReport {
                    filename,
                    success: false,
                    duration_secs: start.elapsed().as_secs_f64(),
                    error: Some(format!(
                        "failed to start {}: {e}",
                        ctx.params.encoder_bin
                    )),
                }
            }
        };

        // Stream stderr: progress lines feed the queue, the tail is kept
        // as the diagnostic for failures.
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if let Some(fraction) = parse_encoder_progress(&line) {
                    let sample = ProgressSample {
                        task_index: ctx.task_index,
                        filename: filename.clone(),
                        percent: fraction * 100.0,
                    };
                    if let Err(e) = ctx.progress.put(&sample) {
                        warn!("Dropping progress sample for {filename}: {e}");
                    }
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait();
        let success = matches!(&status, Ok(status) if status.success());

        if success {
            let relative_path = output_path
                .strip_prefix(&ctx.output_root)
                .map(PathBuf::from)
                .unwrap_or_else(|_| output_path.clone());
            let notification = OutputNotification {
                task_index: ctx.task_index,
                relative_path,
                variant: ctx.params.variant.clone(),
            };
            if let Err(e) = ctx.outputs.put(&notification) {
                warn!("Dropping output notification for {filename}: {e}");
            }
        }

        let error = if success {
            None
        } else {
            let mut message = match &status {
                Ok(status) => format!("encoder exited with {status}"),
                Err(e) => format!("failed waiting for encoder: {e}"),
            };
            if !tail.is_empty() {
                message.push('\n');
                message.push_str(&tail.iter().cloned().collect::<Vec<_>>().join("\n"));
            }
            Some(message)
        };

        EncodeReport {
            filename,
            success,
            duration_secs: start.elapsed().as_secs_f64(),
            error,
        }
    }
}

// ============================================================================
// PROGRESS PARSING
// ============================================================================

/// Parses encoder output for progress information, returning the completed
/// fraction when both a position (`time=`/`out_time=`) and a `duration=`
/// appear in the line.
pub(crate) fn parse_encoder_progress(line: &str) -> Option<f32> {
    let position = field_value(line, "out_time=").or_else(|| field_value(line, "time="))?;
    let position = parse_time_to_seconds(position)?;
    let duration = parse_time_to_seconds(field_value(line, "duration=")?)?;
    if duration > 0.0 {
        Some((position / duration).clamp(0.0, 1.0))
    } else {
        None
    }
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest.find(' ').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Parses a time string in the format HH:MM:SS(.ms) to seconds.
pub(crate) fn parse_time_to_seconds(time_str: &str) -> Option<f32> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f32 = parts[0].parse().ok()?;
    let minutes: f32 = parts[1].parse().ok()?;
    let seconds: f32 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
