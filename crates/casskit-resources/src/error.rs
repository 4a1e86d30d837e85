//! Error types for shared resources

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Resource allocation errors
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No free port could be found within the attempt budget
    #[error("No free port found on {address} after {attempts} attempts")]
    PortsExhausted { address: IpAddr, attempts: usize },

    /// Lock could not be acquired before the retry budget ran out
    #[error("Failed to acquire lock {}: {reason}", path.display())]
    LockTimeout { path: PathBuf, reason: String },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, ResourceError>;
