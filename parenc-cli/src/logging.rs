//! Logging setup for the CLI.
//!
//! The application uses env_logger with the RUST_LOG environment variable:
//! - RUST_LOG=info (default): normal operation logs
//! - RUST_LOG=debug: detailed debugging information

use env_logger::Env;

/// Initializes the `log` backend, defaulting to info level.
pub fn init_logging() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
}

/// Returns the current local timestamp formatted as "YYYYMMDD_HHMMSS".
pub fn get_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
