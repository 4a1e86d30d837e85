//! Error types for process management

use std::io;
use thiserror::Error;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Failed to deliver a signal
    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    /// Failed to kill process
    #[error("Failed to kill process: {0}")]
    KillFailed(String),

    /// Process survived a forced kill
    #[error("Process {} is still alive after forced kill", pid.map(|p| p.to_string()).unwrap_or_else(|| "<unknown>".to_string()))]
    StillAlive { pid: Option<u32> },

    /// Waiting on the process failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
