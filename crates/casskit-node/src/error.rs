//! Error types for node lifecycle

use std::fmt;
use std::io;
use std::time::Duration;

use casskit_archive::ArchiveError;
use casskit_config::{ConfigError, PortKind};
use casskit_process::ProcessError;
use casskit_resources::ResourceError;
use thiserror::Error;

/// What was known about a node when its start failed
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    /// Process id, when a process was launched and its pid is known
    pub pid: Option<u32>,
    /// Ports requested for the node after ephemeral resolution
    pub requested_ports: Vec<(PortKind, u16)>,
    /// Most recent output lines, oldest first
    pub recent_output: Vec<String>,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "\n  pid: {}", pid)?,
            None => write!(f, "\n  pid: <unknown>")?,
        }
        if !self.requested_ports.is_empty() {
            let ports: Vec<String> = self
                .requested_ports
                .iter()
                .map(|(kind, port)| format!("{}={}", kind, port))
                .collect();
            write!(f, "\n  requested ports: {}", ports.join(", "))?;
        }
        if self.recent_output.is_empty() {
            write!(f, "\n  no output captured")?;
        } else {
            write!(f, "\n  recent output:")?;
            for line in &self.recent_output {
                write!(f, "\n    {}", line)?;
            }
        }
        Ok(())
    }
}

/// Node lifecycle errors
#[derive(Debug, Error)]
pub enum NodeError {
    /// No free port could be found
    #[error("Resources exhausted: {0}")]
    ResourceExhausted(#[source] ResourceError),

    /// Distribution archive has an unknown suffix
    #[error("Unsupported distribution archive: {0}")]
    UnsupportedFormat(#[source] ArchiveError),

    /// Filesystem, stream or lock failure
    #[error("I/O failure while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A materialization step failed
    #[error("Configuration error: {0}")]
    Configuration(#[source] ConfigError),

    /// The OS refused to spawn the node
    #[error("Failed to launch node: {0}")]
    Launch(#[source] ProcessError),

    /// No terminal readiness state within the deadline
    #[error("Node did not become ready within {timeout:?}{context}")]
    StartupTimeout {
        timeout: Duration,
        context: FailureContext,
    },

    /// A fatal marker appeared in the node output
    #[error("Node failed to start: {line}{context}")]
    StartupFailed {
        line: String,
        context: FailureContext,
    },

    /// The node survived the forced kill
    #[error("Failed to stop node: {0}")]
    StopFailed(#[source] ProcessError),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Distribution is unusable (bad version, missing launch script, ...)
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),
}

impl NodeError {
    /// Wrap an I/O error with what was being done
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        NodeError::Io {
            context: context.into(),
            source,
        }
    }

    /// Failure context, for startup errors that carry one
    pub fn context(&self) -> Option<&FailureContext> {
        match self {
            NodeError::StartupTimeout { context, .. } | NodeError::StartupFailed { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}

impl From<ResourceError> for NodeError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::PortsExhausted { .. } => NodeError::ResourceExhausted(err),
            ResourceError::LockTimeout { .. } => NodeError::io(
                "locking the distribution cache",
                io::Error::new(io::ErrorKind::TimedOut, err),
            ),
            ResourceError::Io(source) => NodeError::io("accessing shared resources", source),
        }
    }
}

impl From<ArchiveError> for NodeError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::UnsupportedFormat { .. } => NodeError::UnsupportedFormat(err),
            ArchiveError::Io(source) => NodeError::io("extracting the distribution", source),
            other => NodeError::io(
                "extracting the distribution",
                io::Error::new(io::ErrorKind::Other, other),
            ),
        }
    }
}

impl From<ConfigError> for NodeError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Ports(ports) => NodeError::from(ports),
            ConfigError::Step { step, source } => match *source {
                ConfigError::Ports(ports) => NodeError::from(ports),
                inner => NodeError::Configuration(ConfigError::Step {
                    step,
                    source: Box::new(inner),
                }),
            },
            other => NodeError::Configuration(other),
        }
    }
}

impl From<ProcessError> for NodeError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::StillAlive { .. } => NodeError::StopFailed(err),
            other => NodeError::Launch(other),
        }
    }
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;
