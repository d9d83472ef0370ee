//! The `encode` subcommand: discover inputs, configure the orchestrator,
//! and run the parallel encode.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use console::style;
use log::info;

use parenc_core::encode::is_processable_file;
use parenc_core::{
    find_processable_files, format_duration, CommandEncoder, CoreError, EncodeConfig,
    EncodeMonitor, EncodeOrchestrator, ExecutionManager, ExtensionValidator, NullMonitor,
};

use crate::cli::EncodeArgs;
use crate::logging::get_timestamp;
use crate::progress::ProgressRenderer;

/// Runs one encode batch; returns whether every file succeeded.
pub fn run_encode(args: EncodeArgs) -> anyhow::Result<bool> {
    let total_start = Instant::now();

    let input_path = args
        .input_path
        .canonicalize()
        .with_context(|| format!("Invalid input path '{}'", args.input_path.display()))?;

    // A directory is scanned top-level; a single file must itself be
    // processable.
    let metadata = fs::metadata(&input_path)
        .with_context(|| format!("Failed to access input path '{}'", input_path.display()))?;
    let files: Vec<PathBuf> = if metadata.is_dir() {
        match find_processable_files(&input_path) {
            Ok(files) => files,
            Err(CoreError::NoFilesFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        }
    } else if is_processable_file(&input_path) {
        vec![input_path.clone()]
    } else {
        bail!(
            "Input file '{}' is not a processable video file",
            input_path.display()
        );
    };

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            args.output_dir.display()
        )
    })?;

    let mut config = EncodeConfig::new(&args.output_dir);
    if let Some(jobs) = args.jobs {
        config.max_parallel_jobs = jobs;
    }
    if let Some(bin) = args.encoder_bin {
        config.params.encoder_bin = bin;
    }
    if let Some(extension) = args.output_extension {
        config.params.output_extension = extension;
    }
    if args.variant.is_some() {
        config.params.variant = args.variant;
    }
    if !args.video_args.is_empty() {
        config.params.video_args = args.video_args;
    }

    info!(
        "Found {} file(s) to encode into {}",
        files.len(),
        args.output_dir.display()
    );

    let manager = Arc::new(ExecutionManager::new());
    let orchestrator = EncodeOrchestrator::new(manager, config)?;

    let monitor: Arc<dyn EncodeMonitor> = if args.no_progress {
        Arc::new(NullMonitor)
    } else {
        Arc::new(ProgressRenderer::new())
    };

    let validator = ExtensionValidator::new(files);
    let all_ok = orchestrator.run(&validator, Arc::new(CommandEncoder::new()), monitor)?;

    let elapsed = format_duration(total_start.elapsed());
    if all_ok {
        println!(
            "{} Encoding finished successfully in {} (run {})",
            style("✓").green().bold(),
            elapsed,
            get_timestamp()
        );
    } else {
        println!(
            "{} Encoding finished with failures in {} (run {})",
            style("✗").red().bold(),
            elapsed,
            get_timestamp()
        );
    }
    Ok(all_ok)
}
