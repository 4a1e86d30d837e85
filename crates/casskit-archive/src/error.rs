//! Error types for archive extraction

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Archive extraction errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// File name does not end in a known archive suffix
    #[error("Unsupported archive format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Archive path is missing or not a regular file
    #[error("Archive is not a readable regular file: {}", path.display())]
    NotAFile { path: PathBuf },

    /// Entry would be written outside the destination directory
    #[error("Archive entry escapes the destination: {name}")]
    UnsafeEntry { name: String },

    /// Restoring recorded Unix permissions failed
    #[error("Failed to restore permissions: {0}")]
    Permissions(String),

    /// Extraction was cancelled between entries
    #[error("Extraction cancelled")]
    Cancelled,

    /// Read/write failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;
