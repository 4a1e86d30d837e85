//! Cassandra distributions a node can be started from

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Where the distribution files come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionSource {
    /// Already unpacked directory containing `bin/` and `conf/`
    Directory(PathBuf),
    /// Archive unpacked into the shared distribution cache on first use
    Archive(PathBuf),
}

/// Operating system family the distribution is launched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform of the running process
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// A version-specific Cassandra build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    version: Version,
    source: DistributionSource,
    platform: Platform,
}

impl Distribution {
    /// Distribution already unpacked at `path`
    pub fn directory(version: Version, path: impl Into<PathBuf>) -> Self {
        Self {
            version,
            source: DistributionSource::Directory(path.into()),
            platform: Platform::current(),
        }
    }

    /// Distribution packed in an archive at `path`
    pub fn archive(version: Version, path: impl Into<PathBuf>) -> Self {
        Self {
            version,
            source: DistributionSource::Archive(path.into()),
            platform: Platform::current(),
        }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn source(&self) -> &DistributionSource {
        &self.source
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Path of the directory or archive
    pub fn path(&self) -> &Path {
        match &self.source {
            DistributionSource::Directory(path) | DistributionSource::Archive(path) => path,
        }
    }
}
