//! # casskit-archive
//!
//! Extracts Cassandra distribution archives. Supports the {tar, zip, ar, cpio}
//! containers combined with {none, gzip, bzip2, xz} compression, detected by
//! file-name suffix.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use casskit_archive::ArchiveExtractor;
//!
//! let summary = ArchiveExtractor::new().extract(
//!     Path::new("apache-cassandra-4.1.3-bin.tar.gz"),
//!     Path::new("/tmp/cassandra"),
//!     Some(&|path: &Path| !path.starts_with("javadoc")),
//! )?;
//! println!("extracted {} files", summary.files);
//! # Ok::<(), casskit_archive::ArchiveError>(())
//! ```

pub mod error;
pub mod extractor;
pub mod format;

pub use error::{ArchiveError, Result};
pub use extractor::{ArchiveExtractor, ExtractionSummary, PathFilter};
pub use format::{ArchiveFormat, ArchiveKind, Compression};
