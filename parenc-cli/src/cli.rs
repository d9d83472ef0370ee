//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version, // Reads from Cargo.toml via "cargo" feature in clap
    about = "Parenc: parallel video encoding tool",
    long_about = "Schedules parallel encodes of video files across a bounded pool of \
                  external encoder processes via the parenc-core library."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encodes video files from an input path into an output directory
    Encode(EncodeArgs),
}

#[derive(Parser, Debug)]
pub struct EncodeArgs {
    /// Input file or directory containing video files
    #[arg(required = true, value_name = "INPUT_PATH")]
    pub input_path: PathBuf,

    /// Directory where encoded files will be saved
    #[arg(required = true, value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Maximum number of parallel encoder processes
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Encoder binary to invoke (default: ffmpeg)
    #[arg(long, value_name = "BIN")]
    pub encoder_bin: Option<String>,

    /// Extension for produced output files, without the dot
    #[arg(long, value_name = "EXT")]
    pub output_extension: Option<String>,

    /// Variant tag attached to output notifications
    #[arg(long, value_name = "TAG")]
    pub variant: Option<String>,

    /// Extra encoder argument placed between input and output; repeatable
    #[arg(long = "video-arg", value_name = "ARG")]
    pub video_args: Vec<String>,

    /// Disable progress bars (plain log output only)
    #[arg(long)]
    pub no_progress: bool,
}
