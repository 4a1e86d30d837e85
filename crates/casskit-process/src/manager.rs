//! Process manager - spawning

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{
    child::ManagedChild,
    config::CommandSpec,
    error::{ProcessError, Result},
};

/// Spawns managed processes
#[derive(Debug, Clone, Default)]
pub struct ProcessManager;

impl ProcessManager {
    /// Create new process manager
    pub fn new() -> Self {
        Self
    }

    /// Spawn a managed process
    ///
    /// The pid is read from the child handle; a platform that cannot report
    /// one yields a child whose [`ManagedChild::pid`] is `None` instead of an
    /// error.
    ///
    /// # Examples
    /// ```no_run
    /// use casskit_process::{CommandSpec, ProcessManager};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = ProcessManager::new();
    /// let spec = CommandSpec::new("bin/cassandra").args(["-f"]);
    /// let child = manager.spawn(spec)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn spawn(&self, spec: CommandSpec) -> Result<ManagedChild> {
        debug!(
            command = %spec.command,
            args = ?spec.args,
            working_dir = ?spec.working_dir,
            "Spawning process"
        );

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);

        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        if spec.new_process_group {
            cmd.process_group(0);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(if spec.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(if spec.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let rendered = spec.display_line();
        let child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            command: rendered.clone(),
            source,
        })?;

        match child.id() {
            Some(pid) => info!(pid, command = %rendered, "Process spawned"),
            None => warn!(command = %rendered, "Process spawned but its pid is unknown"),
        }

        Ok(ManagedChild::new(child, rendered))
    }
}
