//! Pid-level process tree utilities
//!
//! Synchronous so they can run from shutdown hooks and `Drop`, where no async
//! runtime is guaranteed.

use std::io;

/// Kill a process and all its descendants without waiting.
///
/// On Windows this uses `taskkill /t /f /pid {pid}`.
/// On Unix this targets the process group `-pid` (the child must lead its own
/// group; see [`crate::CommandSpec::new_process_group`]) and falls back to the
/// single pid when the group is gone.
pub fn kill_tree(pid: u32) -> io::Result<()> {
    if pid == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pid must be non-zero",
        ));
    }

    #[cfg(windows)]
    {
        let output = std::process::Command::new("taskkill")
            .args(["/t", "/f", "/pid", &pid.to_string()])
            .output()?;

        if !output.status.success() && is_alive(pid) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "taskkill failed for pid {} (exit {:?})",
                    pid,
                    output.status.code()
                ),
            ));
        }

        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;

        let target = Pid::from_raw(pid as i32);
        match killpg(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(_) => match kill(target, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(io::Error::from(e)),
            },
        }

        return Ok(());
    }

    #[allow(unreachable_code)]
    Ok(())
}

/// Whether a process with `pid` currently exists
///
/// Unreaped zombies still count as alive on Unix.
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        return match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        };
    }

    #[cfg(windows)]
    {
        let filter = format!("PID eq {}", pid);
        return std::process::Command::new("tasklist")
            .args(["/FI", &filter, "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false);
    }

    #[allow(unreachable_code)]
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pid_rejected() {
        assert!(kill_tree(0).is_err());
        assert!(!is_alive(0));
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }
}
