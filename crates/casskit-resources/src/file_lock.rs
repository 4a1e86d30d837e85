//! Cross-process exclusive file locks
//!
//! Guards resources shared between concurrently running test processes, such
//! as an archive-extraction cache. Acquisition retries `try_lock_exclusive`
//! with exponential backoff up to a deadline. The lock is released when the
//! guard drops, and a shutdown hook releases it if the process is interrupted
//! while the guard is alive.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{ResourceError, Result};
use crate::shutdown::ShutdownRegistry;

/// Retry policy for lock acquisition
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Upper bound on a single backoff delay
    pub max_backoff: Duration,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Exclusive lock on a file, released on drop
pub struct FileLock {
    path: PathBuf,
    file: Arc<File>,
    hook_owner: String,
    registry: Arc<ShutdownRegistry>,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating the file if needed
    pub async fn acquire(
        path: impl AsRef<Path>,
        options: &LockOptions,
        registry: Arc<ShutdownRegistry>,
    ) -> Result<FileLock> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let started = Instant::now();
        let mut backoff = options.initial_backoff;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if started.elapsed() >= options.timeout => {
                    return Err(ResourceError::LockTimeout {
                        path,
                        reason: format!("gave up after {} attempts: {}", attempts, e),
                    });
                }
                Err(_) => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(options.max_backoff);
                }
            }
        }

        let file = Arc::new(file);
        let hook_owner = format!("file-lock:{}", path.display());
        let hook_file = Arc::clone(&file);
        registry.register(
            hook_owner.clone(),
            Box::new(move || {
                let _ = FileExt::unlock(&*hook_file);
            }),
        );

        debug!(path = %path.display(), attempts, "Acquired file lock");
        Ok(FileLock {
            path,
            file,
            hook_owner,
            registry,
        })
    }

    /// Locked file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.registry.unregister(&self.hook_owner);
        if let Err(e) = FileExt::unlock(&*self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release file lock");
        } else {
            debug!(path = %self.path.display(), "Released file lock");
        }
    }
}
