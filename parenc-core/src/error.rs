use thiserror::Error;

/// Custom error types for parenc
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Failed to start command '{0}': {1}")]
    CommandStart(String, #[source] std::io::Error),

    #[error("Required external tool not found: {0}")]
    DependencyNotFound(String),

    #[error("No processable files found in input directory")]
    NoFilesFound,

    #[error("Invalid path: {0}")]
    PathError(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Builds a `NotFound` error for an unknown executor pool id.
    pub(crate) fn pool_not_found(id: &str) -> Self {
        CoreError::NotFound { kind: "executor", id: id.to_string() }
    }

    /// Builds a `NotFound` error for an unknown job id.
    pub(crate) fn job_not_found(id: &str) -> Self {
        CoreError::NotFound { kind: "job", id: id.to_string() }
    }

    /// Builds a `NotFound` error for an unknown IPC primitive id.
    pub(crate) fn ipc_not_found(kind: &'static str, id: &str) -> Self {
        CoreError::NotFound { kind, id: id.to_string() }
    }

    /// True for errors the caller may retry (currently only timeouts).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Timeout(_))
    }
}

/// Result type for parenc operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;
