// parenc-cli/src/main.rs
//
// Command-line interface for the parenc parallel encoding tool.
//
// Responsibilities:
// - Parsing CLI arguments (clap).
// - Setting up logging (env_logger, RUST_LOG).
// - Building the execution manager, orchestrator, and collaborators, and
//   wiring them together as the composition root.
// - Mapping results onto process exit codes: 0 all succeeded, 1 some file
//   failed (or nothing to do), 2 setup error.

use clap::Parser;
use console::style;
use std::process;

mod cli;
mod commands;
mod logging;
mod progress;

fn main() {
    logging::init_logging();
    let parsed = cli::Cli::parse();

    let exit_code = match parsed.command {
        cli::Commands::Encode(args) => match commands::encode::run_encode(args) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(e) => {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                2
            }
        },
    };
    process::exit(exit_code);
}
