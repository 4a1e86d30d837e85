//! Node process launch
//!
//! The distribution's launch script is run unmodified. System properties and
//! raw JVM flags reach the JVM through the `JVM_EXTRA_OPTS` environment
//! variable, which the script appends to its own options.

use std::path::Path;

use casskit_config::ProcessConfig;
use casskit_process::{CommandSpec, ManagedChild, ProcessManager};
use tracing::{debug, info};

use crate::distribution::Platform;
use crate::error::{NodeError, Result};

/// Environment variable carrying extra JVM options
pub const JVM_EXTRA_OPTS: &str = "JVM_EXTRA_OPTS";

/// Starts the node's launch script
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    manager: ProcessManager,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Command that starts the node in the foreground from `working_dir`
    pub fn command(
        &self,
        working_dir: &Path,
        config: &ProcessConfig,
        platform: Platform,
    ) -> Result<CommandSpec> {
        let bin = working_dir.join("bin");
        let spec = match platform {
            Platform::Unix => {
                let script = bin.join("cassandra");
                if !script.is_file() {
                    return Err(NodeError::InvalidDistribution(format!(
                        "launch script {} not found",
                        script.display()
                    )));
                }
                let mut spec = CommandSpec::new(script.to_string_lossy()).arg("-f");
                if running_as_root() {
                    spec = spec.arg("-R");
                }
                spec
            }
            Platform::Windows => {
                let powershell = bin.join("cassandra.ps1");
                if powershell.is_file() && powershell_available() {
                    CommandSpec::new("powershell.exe").args([
                        "-NoProfile".to_string(),
                        "-NonInteractive".to_string(),
                        "-ExecutionPolicy".to_string(),
                        "Unrestricted".to_string(),
                        "-File".to_string(),
                        powershell.to_string_lossy().into_owned(),
                        "-f".to_string(),
                    ])
                } else {
                    let batch = bin.join("cassandra.bat");
                    if !batch.is_file() {
                        return Err(NodeError::InvalidDistribution(format!(
                            "launch script {} not found",
                            batch.display()
                        )));
                    }
                    CommandSpec::new("cmd.exe").args([
                        "/C".to_string(),
                        batch.to_string_lossy().into_owned(),
                        "-f".to_string(),
                    ])
                }
            }
        };

        let mut spec = spec
            .working_dir(working_dir)
            .env("CASSANDRA_HOME", working_dir.to_string_lossy())
            .env("CASSANDRA_CONF", working_dir.join("conf").to_string_lossy())
            .envs(config.environment.clone());

        let extra = jvm_extra_opts(config);
        if !extra.is_empty() {
            spec = spec.env(JVM_EXTRA_OPTS, extra);
        }
        if let Some(java_home) = &config.java_home {
            spec = spec.env("JAVA_HOME", java_home.to_string_lossy());
        }
        Ok(spec)
    }

    /// Spawn the node with stdout and stderr piped
    pub fn launch(
        &self,
        working_dir: &Path,
        config: &ProcessConfig,
        platform: Platform,
    ) -> Result<ManagedChild> {
        let spec = self.command(working_dir, config, platform)?;
        debug!(command = %spec.display_line(), "Launching node");

        let child = self.manager.spawn(spec).map_err(NodeError::Launch)?;
        info!(pid = ?child.pid(), working_dir = %working_dir.display(), "Node process started");
        Ok(child)
    }
}

/// Value for [`JVM_EXTRA_OPTS`]: the caller's own value first, then
/// `-Dkey=value` tokens, then raw JVM flags, space separated
pub fn jvm_extra_opts(config: &ProcessConfig) -> String {
    let inherited = config
        .environment
        .get(JVM_EXTRA_OPTS)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let properties = config.effective_system_properties();
    inherited
        .into_iter()
        .chain(
            properties
                .iter()
                .map(|(key, value)| format!("-D{}={}", key, value)),
        )
        .chain(config.jvm_options.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

#[cfg(windows)]
fn powershell_available() -> bool {
    which::which("powershell.exe").is_ok()
}

#[cfg(not(windows))]
fn powershell_available() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use casskit_config::PortKind;
    use tempfile::TempDir;

    #[test]
    fn test_jvm_extra_opts() {
        let config = ProcessConfig::new()
            .system_property("cassandra.ring_delay_ms", "100")
            .port(PortKind::Jmx, 7299)
            .jvm_option("-Xmx512m");

        assert_eq!(
            jvm_extra_opts(&config),
            "-Dcassandra.jmx.local.port=7299 -Dcassandra.ring_delay_ms=100 -Xmx512m"
        );
        assert_eq!(jvm_extra_opts(&ProcessConfig::new()), "");
    }

    #[test]
    fn test_caller_jvm_extra_opts_are_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/cassandra"), "#!/bin/sh\n").unwrap();

        let config = ProcessConfig::new()
            .env(JVM_EXTRA_OPTS, "-XX:+UseG1GC -Dcaller.flag=1")
            .system_property("cassandra.ring_delay_ms", "100")
            .jvm_option("-Xss256k");
        let spec = ProcessLauncher::new()
            .command(dir.path(), &config, Platform::Unix)
            .unwrap();

        assert_eq!(
            spec.env.get(JVM_EXTRA_OPTS).map(String::as_str),
            Some("-XX:+UseG1GC -Dcaller.flag=1 -Dcassandra.ring_delay_ms=100 -Xss256k")
        );

        let only_caller = ProcessConfig::new().env(JVM_EXTRA_OPTS, "-XX:+UseG1GC");
        assert_eq!(jvm_extra_opts(&only_caller), "-XX:+UseG1GC");
    }

    #[test]
    fn test_missing_launch_script() {
        let dir = TempDir::new().unwrap();
        let result = ProcessLauncher::new().command(dir.path(), &ProcessConfig::new(), Platform::Unix);
        assert!(matches!(result, Err(NodeError::InvalidDistribution(_))));
    }

    #[test]
    fn test_unix_command_and_environment() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/cassandra"), "#!/bin/sh\n").unwrap();

        let config = ProcessConfig::new()
            .env("MAX_HEAP_SIZE", "256M")
            .java_home("/opt/java")
            .jvm_option("-Xss256k");
        let spec = ProcessLauncher::new()
            .command(dir.path(), &config, Platform::Unix)
            .unwrap();

        assert!(spec.command.ends_with("cassandra"));
        assert_eq!(spec.args[0], "-f");
        assert_eq!(spec.env.get("MAX_HEAP_SIZE").map(String::as_str), Some("256M"));
        assert_eq!(spec.env.get("JAVA_HOME").map(String::as_str), Some("/opt/java"));
        assert_eq!(spec.env.get(JVM_EXTRA_OPTS).map(String::as_str), Some("-Xss256k"));
        let conf = dir.path().join("conf").to_string_lossy().into_owned();
        assert_eq!(spec.env.get("CASSANDRA_CONF"), Some(&conf));
        assert!(spec.new_process_group);
    }

    #[test]
    fn test_windows_falls_back_to_batch_script() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/cassandra.bat"), "@echo off\n").unwrap();

        let spec = ProcessLauncher::new()
            .command(dir.path(), &ProcessConfig::new(), Platform::Windows)
            .unwrap();
        assert_eq!(spec.command, "cmd.exe");
        assert_eq!(spec.args[0], "/C");
        assert_eq!(spec.args.last().map(String::as_str), Some("-f"));
    }
}
