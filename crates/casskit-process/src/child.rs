//! Managed child process wrapper

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ProcessError, Result};
use crate::tree;

/// Liveness poll interval while waiting for exit
const POLL_INTERVAL_MS: u64 = 100;

/// How long a forced kill may take before the process is reported alive
const FORCED_KILL_TIMEOUT_MS: u64 = 5_000;

/// Wrapper around tokio::process::Child with lifecycle management
pub struct ManagedChild {
    /// Underlying tokio child process
    child: Child,
    /// Process ID (None = platform could not report one)
    pid: Option<u32>,
    /// Rendered command line
    command: String,
}

impl ManagedChild {
    /// Create new managed child
    pub(crate) fn new(child: Child, command: String) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            command,
        }
    }

    /// Get process ID, `None` when unknown
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Command line the process was started with
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Poll for exit until `timeout` elapses
    ///
    /// Returns `None` when the process is still running at the deadline.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    /// Ask the process tree to terminate
    ///
    /// - Unix: SIGTERM to the process group, falling back to the process
    /// - Windows: `taskkill /pid <pid> /t` without `/f`
    pub async fn terminate(&mut self) -> Result<()> {
        let Some(pid) = self.pid else {
            // No pid, no graceful channel: the forced path handles it.
            return Ok(());
        };
        debug!(pid, "Sending graceful termination");

        #[cfg(windows)]
        {
            use tokio::process::Command;

            let status = Command::new("taskkill")
                .args(["/pid", &pid.to_string(), "/t"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await?;
            if !status.success() {
                return Err(ProcessError::SignalFailed {
                    pid,
                    reason: format!("taskkill exited with {}", status),
                });
            }
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, killpg, Signal};
            use nix::unistd::Pid;

            let target = Pid::from_raw(pid as i32);
            match killpg(target, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => return Ok(()),
                Err(e) => {
                    warn!(pid, error = %e, "Failed to SIGTERM process group, trying process only");
                }
            }
            return match kill(target, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(ProcessError::SignalFailed {
                    pid,
                    reason: e.to_string(),
                }),
            };
        }

        #[allow(unreachable_code)]
        Ok(())
    }

    /// Kill process tree (process and all descendants) without grace
    pub async fn kill_tree(&mut self) -> Result<()> {
        debug!(pid = ?self.pid, "Killing process tree");

        let mut outcome = Ok(());
        if let Some(pid) = self.pid {
            if let Err(e) = tree::kill_tree(pid) {
                warn!(pid, error = %e, "Failed to kill process tree");
                outcome = Err(ProcessError::KillFailed(e.to_string()));
            }
        }

        // Always kill the direct child through its handle as well.
        if let Err(e) = self.child.start_kill() {
            if self.is_running() {
                return Err(ProcessError::KillFailed(e.to_string()));
            }
        }
        outcome
    }

    /// Graceful shutdown with forced escalation
    ///
    /// Terminates, polls liveness for `grace`, then kills the process tree.
    /// Errors on the graceful path are logged and the forced kill still runs.
    /// Fails with [`ProcessError::StillAlive`] only if the process survives
    /// the forced kill.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<ExitStatus> {
        let graceful = self.graceful_stop(grace).await;
        self.escalate(graceful).await
    }

    async fn graceful_stop(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(Some(status));
        }

        debug!(pid = ?self.pid, grace_ms = grace.as_millis() as u64, "Shutting down process");
        if let Err(e) = self.terminate().await {
            warn!(pid = ?self.pid, error = %e, "Graceful termination failed");
        }
        self.wait_for_exit(grace).await
    }

    /// Finish a shutdown from the outcome of its graceful phase
    async fn escalate(&mut self, graceful: Result<Option<ExitStatus>>) -> Result<ExitStatus> {
        match graceful {
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "Process shut down gracefully");
                return Ok(status);
            }
            Ok(None) => {
                warn!(pid = ?self.pid, "Process did not exit within grace period, killing");
            }
            Err(e) => {
                warn!(pid = ?self.pid, error = %e, "Graceful shutdown failed, killing");
            }
        }

        if let Err(e) = self.kill_tree().await {
            warn!(pid = ?self.pid, error = %e, "Forced kill reported an error");
        }

        match self
            .wait_for_exit(Duration::from_millis(FORCED_KILL_TIMEOUT_MS))
            .await?
        {
            Some(status) => {
                debug!(pid = ?self.pid, %status, "Process killed");
                Ok(status)
            }
            None => Err(ProcessError::StillAlive { pid: self.pid }),
        }
    }

    /// Take stdout handle
    pub fn stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take stderr handle
    pub fn stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{CommandSpec, ProcessManager};

    #[tokio::test]
    async fn test_is_running() {
        let manager = ProcessManager::new();
        let spec = CommandSpec::new("sleep").args(["1"]);

        let mut child = manager.spawn(spec).unwrap();
        assert!(child.is_running());

        let status = child.wait_for_exit(Duration::from_secs(5)).await.unwrap();
        assert!(status.is_some());
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let manager = ProcessManager::new();
        let spec = CommandSpec::new("sleep").args(["30"]);

        let mut child = manager.spawn(spec).unwrap();
        let pid = child.pid().unwrap();

        child.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!child.is_running());
        assert!(!tree::is_alive(pid));
    }

    #[tokio::test]
    async fn test_shutdown_escalates_when_term_is_ignored() {
        let manager = ProcessManager::new();
        let spec = CommandSpec::new("sh").args(["-c", "trap '' TERM; sleep 30"]);

        let mut child = manager.spawn(spec).unwrap();
        // Give the shell time to install its trap.
        sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        child.shutdown(Duration::from_millis(300)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn test_failed_graceful_phase_still_kills() {
        let manager = ProcessManager::new();
        let mut child = manager.spawn(CommandSpec::new("sleep").args(["30"])).unwrap();
        let pid = child.pid().unwrap();

        let failed = Err(ProcessError::Io(std::io::Error::other("try_wait failed")));
        let status = child.escalate(failed).await.unwrap();

        assert!(!status.success());
        assert!(!tree::is_alive(pid));
    }

    #[tokio::test]
    async fn test_shutdown_after_exit_is_noop() {
        let manager = ProcessManager::new();
        let mut child = manager.spawn(CommandSpec::new("true")).unwrap();
        child.wait_for_exit(Duration::from_secs(5)).await.unwrap();

        let status = child.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(status.success());
    }
}
