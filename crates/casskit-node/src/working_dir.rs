//! Per-node working directories
//!
//! Each supervisor owns one directory under the harness working root,
//! populated from the distribution before materialization. Archive
//! distributions are unpacked once into a shared cache guarded by a
//! cross-process [`FileLock`] and copied from there.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use casskit_archive::{ArchiveExtractor, ArchiveFormat};
use casskit_resources::{FileLock, LockOptions, ShutdownRegistry};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::blocking::{cancelled, BlockingTasks};
use crate::distribution::{Distribution, DistributionSource};
use crate::error::{NodeError, Result};

/// Marker written once an archive is fully unpacked into the cache
pub const EXTRACTED_MARKER: &str = ".casskit-extracted";

/// Directories the node writes at runtime
const RUNTIME_DIRS: &[&str] = &["data", "logs"];

/// Where shared extraction happens and how long to wait for it
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub cache_dir: PathBuf,
    pub lock: LockOptions,
}

/// Directory tree owned by one node for one start/stop cycle
#[derive(Debug)]
pub struct WorkingDirectory {
    path: PathBuf,
}

impl WorkingDirectory {
    /// Create an empty working directory named `name` under `root`
    ///
    /// A directory kept from an earlier start/stop cycle is removed first.
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        let path = root.join(name);
        if path.exists() {
            debug!(path = %path.display(), "Removing working directory from an earlier run");
            fs::remove_dir_all(&path)
                .map_err(|e| NodeError::io(format!("clearing {}", path.display()), e))?;
        }
        fs::create_dir_all(&path)
            .map_err(|e| NodeError::io(format!("creating {}", path.display()), e))?;
        debug!(path = %path.display(), "Created working directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the distribution into this directory
    ///
    /// Extraction and copying run on `tasks`, so a torn-down start attempt
    /// can stop them and wait for them to return.
    pub async fn populate(
        &self,
        distribution: &Distribution,
        cache: &CacheOptions,
        registry: Arc<ShutdownRegistry>,
        tasks: &BlockingTasks,
    ) -> Result<()> {
        let source = match distribution.source() {
            DistributionSource::Directory(path) => path.clone(),
            DistributionSource::Archive(archive) => {
                ensure_extracted(archive, cache, registry, tasks).await?
            }
        };

        let root = distribution_root(&source)?;
        let target = self.path.clone();
        tasks
            .run("copying the distribution", move |cancel| {
                copy_tree(&root, &target, &cancel)
            })
            .await?;

        for dir in RUNTIME_DIRS {
            let path = self.path.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| NodeError::io(format!("creating {}", path.display()), e))?;
        }
        Ok(())
    }

    /// Remove the directory and everything in it
    pub fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Deleted working directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NodeError::io(
                format!("deleting {}", self.path.display()),
                e,
            )),
        }
    }
}

/// Unpack `archive` into the shared cache unless a complete copy exists
///
/// Returns the cache directory holding the unpacked files. The cache lock is
/// held by the blocking task itself and released only when it returns.
pub async fn ensure_extracted(
    archive: &Path,
    cache: &CacheOptions,
    registry: Arc<ShutdownRegistry>,
    tasks: &BlockingTasks,
) -> Result<PathBuf> {
    let stem = ArchiveFormat::strip_extension(archive).ok_or_else(|| {
        NodeError::from(casskit_archive::ArchiveError::UnsupportedFormat {
            path: archive.to_path_buf(),
        })
    })?;
    let target = cache.cache_dir.join(&stem);
    let lock_path = cache.cache_dir.join(format!("{}.lock", stem));

    let lock = FileLock::acquire(&lock_path, &cache.lock, registry).await?;
    let archive = archive.to_path_buf();
    tasks
        .run("extracting the distribution", move |cancel| {
            let _lock = lock;
            extract_locked(&archive, target, cancel)
        })
        .await
}

/// Extraction proper, run while the cache lock is held
fn extract_locked(archive: &Path, target: PathBuf, cancel: Arc<AtomicBool>) -> Result<PathBuf> {
    if target.join(EXTRACTED_MARKER).is_file() {
        debug!(archive = %archive.display(), target = %target.display(), "Using cached distribution");
        return Ok(target);
    }

    if target.exists() {
        warn!(target = %target.display(), "Discarding incomplete extraction");
        fs::remove_dir_all(&target)
            .map_err(|e| NodeError::io(format!("clearing {}", target.display()), e))?;
    }

    let summary = ArchiveExtractor::new()
        .with_cancel(cancel)
        .extract(archive, &target, None)?;

    fs::write(target.join(EXTRACTED_MARKER), b"")
        .map_err(|e| NodeError::io("marking the extraction complete", e))?;
    info!(
        archive = %archive.display(),
        target = %target.display(),
        files = summary.files,
        skipped = summary.skipped,
        "Extracted distribution"
    );
    Ok(target)
}

/// Directory holding `bin/`, either `dir` itself or its single subdirectory
pub fn distribution_root(dir: &Path) -> Result<PathBuf> {
    if dir.join("bin").is_dir() {
        return Ok(dir.to_path_buf());
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| NodeError::io(format!("reading {}", dir.display()), e))?;
    let candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join("bin").is_dir())
        .collect();

    match candidates.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(NodeError::InvalidDistribution(format!(
            "no bin/ directory found in {}",
            dir.display()
        ))),
    }
}

/// Copy `source` into `target`, keeping permissions and symlinks
fn copy_tree(source: &Path, target: &Path, cancel: &AtomicBool) -> Result<()> {
    let mut copied = 0usize;
    for entry in WalkDir::new(source).follow_links(false) {
        if cancel.load(Ordering::Acquire) {
            debug!(target = %target.display(), files = copied, "Distribution copy cancelled");
            return Err(cancelled("copying the distribution"));
        }
        let entry = entry.map_err(|e| {
            NodeError::io(
                format!("walking {}", source.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            )
        })?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) if relative.as_os_str().is_empty() => continue,
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if relative == Path::new(EXTRACTED_MARKER) {
            continue;
        }

        let destination = target.join(relative);
        let file_type = entry.file_type();
        let result = if file_type.is_dir() {
            fs::create_dir_all(&destination)
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &destination)
        } else {
            fs::copy(entry.path(), &destination).map(|_| {
                copied += 1;
            })
        };
        result.map_err(|e| NodeError::io(format!("copying {}", relative.display()), e))?;
    }

    debug!(source = %source.display(), target = %target.display(), files = copied, "Copied distribution");
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, destination: &Path) -> std::io::Result<()> {
    let target = fs::read_link(link)?;
    std::os::unix::fs::symlink(target, destination)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, destination: &Path) -> std::io::Result<()> {
    fs::copy(link, destination).map(|_| ())
}
