//! Blocking filesystem work tied to one start attempt
//!
//! A timed-out `start()` drops its future, but tasks handed to
//! `spawn_blocking` keep running. Every blocking task of an attempt is
//! registered here so teardown can cancel them and wait until they have
//! returned before it removes the directories they write into.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{NodeError, Result};

/// Blocking tasks sharing one cancellation flag
#[derive(Debug, Clone, Default)]
pub struct BlockingTasks {
    cancel: Arc<AtomicBool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BlockingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag long-running work polls between units of work
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Run `work` on the blocking pool and wait for its result
    ///
    /// `work` receives the cancellation flag. Dropping the returned future
    /// does not stop the task; [`BlockingTasks::cancel_and_wait`] does.
    pub async fn run<T, F>(&self, what: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<AtomicBool>) -> Result<T> + Send + 'static,
    {
        if self.is_cancelled() {
            return Err(cancelled(what));
        }

        let (tx, rx) = oneshot::channel();
        let cancel = self.cancel_flag();
        let handle = tokio::task::spawn_blocking(move || {
            let _ = tx.send(work(cancel));
        });
        self.handles.lock().push(handle);

        rx.await
            .map_err(|_| NodeError::io(what, io::Error::other("blocking task panicked")))?
    }

    /// Raise the flag without waiting
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Raise the flag and wait for every registered task to return
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return;
        }
        debug!(tasks = handles.len(), "Waiting for blocking tasks");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Blocking task ended abnormally");
            }
        }
    }
}

/// Error for work abandoned because its start attempt was torn down
pub fn cancelled(what: &str) -> NodeError {
    NodeError::io(what, io::Error::new(io::ErrorKind::Interrupted, "cancelled"))
}
