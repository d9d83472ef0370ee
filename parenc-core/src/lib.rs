//! Core library for scheduling and executing parallel encode work.
//!
//! Three layers, each depending only on the one below:
//!
//! - [`execution`]: named worker pools, external OS processes, and the IPC
//!   primitives (queues, events, locks, shared scalars) jobs use to talk
//!   back to the controller.
//! - [`scheduler`]: priority- and dependency-aware tasks promoted onto a
//!   pool by a background control loop.
//! - [`encode`]: the parallel encode orchestrator fanning a validated file
//!   list out across a process pool with live progress.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use parenc_core::{
//!     CommandEncoder, EncodeConfig, EncodeOrchestrator, ExecutionManager,
//!     ExtensionValidator, NullMonitor,
//! };
//!
//! let manager = Arc::new(ExecutionManager::new());
//! let mut config = EncodeConfig::new("/path/to/output");
//! config.max_parallel_jobs = 4;
//!
//! let files = parenc_core::find_processable_files(Path::new("/path/to/input")).unwrap();
//! let orchestrator = EncodeOrchestrator::new(Arc::clone(&manager), config).unwrap();
//! let all_ok = orchestrator
//!     .run(
//!         &ExtensionValidator::new(files),
//!         Arc::new(CommandEncoder::new()),
//!         Arc::new(NullMonitor),
//!     )
//!     .unwrap();
//! assert!(all_ok);
//! ```

pub mod config;
pub mod discovery;
pub mod encode;
pub mod error;
pub mod execution;
pub mod scheduler;
pub mod utils;

// Re-exports for public API
pub use config::{EncodeConfig, EncodeParams};
pub use discovery::find_processable_files;
pub use encode::{
    AbortHandle, CommandEncoder, EncodeContext, EncodeMonitor, EncodeOrchestrator, EncodeReport,
    Encoder, ExtensionValidator, FileValidator, NullMonitor, OutputNotification, ProgressSample,
};
pub use error::{CoreError, CoreResult};
pub use execution::{ExecutionManager, JobStatus, JobValue, PoolKind, ProcessOutput, ProcessSpec};
pub use scheduler::{
    ScheduleRequest, TaskFilter, TaskScheduler, TaskSnapshot, TaskStatus,
};
pub use utils::{format_bytes, format_duration};
