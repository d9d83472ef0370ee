//! Configuration for a parallel encode run.
//!
//! Construction is the caller's job (there is no file or profile loading
//! here); `validate` catches the mistakes that would otherwise surface as
//! confusing pool or encoder failures mid-run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default number of concurrent encode jobs.
pub const DEFAULT_MAX_PARALLEL_JOBS: usize = 2;

/// Default external encoder binary.
pub const DEFAULT_ENCODER_BIN: &str = "ffmpeg";

/// Default container extension for produced files.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mkv";

/// Parameters handed to the encoder for every file in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeParams {
    /// Encoder executable name or path.
    pub encoder_bin: String,
    /// Arguments placed between the input and the output on the command
    /// line (codec, preset, quality and friends).
    pub video_args: Vec<String>,
    /// Extension of produced output files, without the dot.
    pub output_extension: String,
    /// Optional variant tag attached to output notifications.
    pub variant: Option<String>,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            encoder_bin: DEFAULT_ENCODER_BIN.to_string(),
            video_args: vec![
                "-c:v".to_string(),
                "libsvtav1".to_string(),
                "-preset".to_string(),
                "6".to_string(),
            ],
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            variant: None,
        }
    }
}

/// Configuration for [`EncodeOrchestrator`](crate::encode::EncodeOrchestrator).
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    /// Directory that receives encoded files.
    pub output_root: PathBuf,
    /// Size of the encode process pool.
    pub max_parallel_jobs: usize,
    pub params: EncodeParams,
}

impl EncodeConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            params: EncodeParams::default(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.output_root.as_os_str().is_empty() {
            return Err(CoreError::Config("output_root must not be empty".to_string()));
        }
        if self.max_parallel_jobs < 1 {
            return Err(CoreError::Config(format!(
                "max_parallel_jobs must be at least 1, got {}",
                self.max_parallel_jobs
            )));
        }
        if self.params.encoder_bin.is_empty() {
            return Err(CoreError::Config("encoder_bin must not be empty".to_string()));
        }
        if self.params.output_extension.is_empty() {
            return Err(CoreError::Config(
                "output_extension must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
