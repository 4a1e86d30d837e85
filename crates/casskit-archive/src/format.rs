//! Archive format detection by file-name suffix

use std::fmt;
use std::path::Path;

use crate::error::{ArchiveError, Result};

/// Container layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    Zip,
    Ar,
    Cpio,
}

/// Stream compression wrapped around the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

/// A supported container/compression pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFormat {
    pub kind: ArchiveKind,
    pub compression: Compression,
}

/// Known suffixes; none is a suffix of another, so order is irrelevant
const SUFFIXES: &[(&str, ArchiveKind, Compression)] = &[
    (".tar.bz2", ArchiveKind::Tar, Compression::Bzip2),
    (".cpio.bz2", ArchiveKind::Cpio, Compression::Bzip2),
    (".cpio.gz", ArchiveKind::Cpio, Compression::Gzip),
    (".cpio.xz", ArchiveKind::Cpio, Compression::Xz),
    (".tar.gz", ArchiveKind::Tar, Compression::Gzip),
    (".tar.xz", ArchiveKind::Tar, Compression::Xz),
    (".ar.bz2", ArchiveKind::Ar, Compression::Bzip2),
    (".ar.gz", ArchiveKind::Ar, Compression::Gzip),
    (".ar.xz", ArchiveKind::Ar, Compression::Xz),
    (".tbz2", ArchiveKind::Tar, Compression::Bzip2),
    (".cpio", ArchiveKind::Cpio, Compression::None),
    (".tbz", ArchiveKind::Tar, Compression::Bzip2),
    (".tgz", ArchiveKind::Tar, Compression::Gzip),
    (".txz", ArchiveKind::Tar, Compression::Xz),
    (".tar", ArchiveKind::Tar, Compression::None),
    (".zip", ArchiveKind::Zip, Compression::None),
    (".jar", ArchiveKind::Zip, Compression::None),
    (".ar", ArchiveKind::Ar, Compression::None),
];

impl ArchiveFormat {
    /// Detect the format of `path` from its file name
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::matching_suffix(path)
            .map(|(_, kind, compression)| ArchiveFormat { kind, compression })
            .ok_or_else(|| ArchiveError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    /// File name with the archive suffix removed (`apache-cassandra-4.1.3-bin`)
    pub fn strip_extension(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let (suffix, _, _) = Self::matching_suffix(path)?;
        Some(name[..name.len() - suffix.len()].to_string())
    }

    fn matching_suffix(path: &Path) -> Option<(&'static str, ArchiveKind, Compression)> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .copied()
            .find(|(suffix, _, _)| name.len() > suffix.len() && name.ends_with(suffix))
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ArchiveKind::Tar => "tar",
            ArchiveKind::Zip => "zip",
            ArchiveKind::Ar => "ar",
            ArchiveKind::Cpio => "cpio",
        };
        match self.compression {
            Compression::None => write!(f, "{}", kind),
            Compression::Gzip => write!(f, "{}+gzip", kind),
            Compression::Bzip2 => write!(f, "{}+bzip2", kind),
            Compression::Xz => write!(f, "{}+xz", kind),
        }
    }
}
