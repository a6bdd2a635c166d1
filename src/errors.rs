/*!
 * Error types for the booktrans application.
 *
 * This module contains custom error types for different parts of the application,
 * using the thiserror crate for ergonomic error definitions.
 *
 * Structural and durability failures (configuration mismatch, corrupt checkpoint,
 * backend failure) abort a job. Content-level anomalies such as an unrestorable
 * placeholder are never errors; they are reported as `TermRestorationWarning`s.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The requested model is not installed on the backend
    #[error("Model not available: {0}")]
    ModelUnavailable(String),
}

/// Errors that abort a translation worker.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source unreadable or malformed
    #[error("Input error: {0}")]
    Input(String),

    /// Existing checkpoint was produced by a different configuration
    #[error(
        "Checkpoint at {path:?} was produced by a different configuration \
         (checkpoint: {found}, current: {expected}); rerun without --resume to discard it"
    )]
    ConfigMismatch {
        /// Checkpoint file
        path: PathBuf,
        /// Fingerprint or chunk count of the current configuration
        expected: String,
        /// Fingerprint or chunk count recorded in the checkpoint
        found: String,
    },

    /// Persisted checkpoint is unparsable or internally inconsistent
    #[error("Checkpoint at {path:?} is corrupt: {reason}")]
    CheckpointCorrupt {
        /// Checkpoint file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Backend failed while translating a chunk
    #[error("Backend unavailable while translating chunk {chunk}: {source}")]
    BackendUnavailable {
        /// Index of the chunk that could not be translated
        chunk: usize,
        /// Underlying provider error
        #[source]
        source: ProviderError,
    },

    /// Output or progress file could not be written
    #[error("Output error: {0}")]
    Output(String),

    /// Any other filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Short machine-readable kind, written to the failure marker
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::ConfigMismatch { .. } => "config_mismatch",
            Self::CheckpointCorrupt { .. } => "checkpoint_corrupt",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Output(_) => "output",
            Self::Io(_) => "io",
        }
    }
}

/// Errors raised by packaged-document export
#[derive(Error, Debug)]
pub enum ExportError {
    /// The converter binary could not be found
    #[error("{0} is not installed")]
    ConverterMissing(String),

    /// The requested format is not supported
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// There is nothing to export yet
    #[error("Translation is not ready: {0:?}")]
    NotReady(PathBuf),

    /// The converter ran and failed
    #[error("Converter exited with status {status}: {stderr}")]
    ConverterFailed {
        /// Exit status code, if any
        status: i32,
        /// Captured stderr (truncated)
        stderr: String,
    },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the job controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// No job with the given id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job's source file is gone, so it cannot be restarted
    #[error("Source file for job {id} is missing: {path:?}")]
    MissingSource {
        /// Job id
        id: String,
        /// Expected source path
        path: PathBuf,
    },

    /// The worker process could not be spawned
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Registry file unreadable or unwritable
    #[error("Registry error: {0}")]
    Registry(String),

    /// Job files could not be put into their initial state
    #[error("Cannot initialize job files: {0}")]
    Initialize(#[from] PipelineError),

    /// Export failed
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    /// The controller actor is no longer running
    #[error("Controller has shut down")]
    Shutdown,

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A placeholder that could not be restored cleanly.
///
/// Never fatal: the chunk is still recorded, and the warning is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRestorationWarning {
    /// The placeholder token that was issued
    pub token: String,
    /// The protected span it stood for
    pub original: String,
    /// What happened to it
    pub reason: String,
}

impl std::fmt::Display for TermRestorationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "placeholder {} ({:?}) {}", self.token, self.original, self.reason)
    }
}
