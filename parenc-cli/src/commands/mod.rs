//! CLI subcommand implementations.

pub mod encode;
