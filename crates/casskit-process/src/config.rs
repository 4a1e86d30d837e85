//! Command specification

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable command
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Environment variables (added to parent env)
    pub env: BTreeMap<String, String>,
    /// Capture stdout
    pub capture_stdout: bool,
    /// Capture stderr
    pub capture_stderr: bool,
    /// Start the child as leader of its own process group (Unix)
    pub new_process_group: bool,
}

impl CommandSpec {
    /// Create new command specification
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec![],
            working_dir: None,
            env: BTreeMap::new(),
            capture_stdout: true,
            capture_stderr: true,
            new_process_group: true,
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Enable/disable stdout capture
    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    /// Enable/disable stderr capture
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    /// Enable/disable a dedicated process group
    pub fn new_process_group(mut self, enabled: bool) -> Self {
        self.new_process_group = enabled;
        self
    }

    /// Command line rendered for logs and error messages
    pub fn display_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = CommandSpec::new("bin/cassandra")
            .args(["-f"])
            .arg("-R")
            .env("JVM_EXTRA_OPTS", "-Dx=1")
            .envs([("A", "1"), ("B", "2")])
            .working_dir("/tmp/node");

        assert_eq!(spec.args, vec!["-f", "-R"]);
        assert_eq!(spec.env.len(), 3);
        assert_eq!(spec.working_dir.as_deref(), Some(std::path::Path::new("/tmp/node")));
        assert!(spec.new_process_group);
        assert_eq!(spec.display_line(), "bin/cassandra -f -R");
    }
}
