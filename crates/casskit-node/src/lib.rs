//! # casskit-node
//!
//! Disposable Cassandra nodes for integration tests. A [`NodeSupervisor`]
//! turns a distribution into a running, verified-ready server and reliably
//! stops it again:
//!
//! 1. copy (or extract and copy) the distribution into a fresh working directory
//! 2. materialize the caller's [`ProcessConfig`] into its config files
//! 3. launch the unmodified launch script in its own process group
//! 4. watch the output until the node reports its transports bound, or fails
//!
//! All four steps run under one startup deadline; a failed or timed-out start
//! never leaves a process behind.
//!
//! ```rust,no_run
//! use casskit_node::{Distribution, NodeSupervisor, PortKind, ProcessConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), casskit_node::NodeError> {
//! let distribution = Distribution::directory("4.1.3".parse()?, "/opt/apache-cassandra-4.1.3");
//! let config = ProcessConfig::new().port(PortKind::Native, 0);
//!
//! let node = NodeSupervisor::new(distribution, config);
//! node.start().await?;
//! let settings = node.settings().expect("running node has settings");
//! println!("CQL on {}:{:?}", settings.address, settings.native_port);
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod distribution;
pub mod error;
pub mod java;
pub mod launcher;
pub mod output;
pub mod profile;
pub mod readiness;
pub mod settings;
pub mod supervisor;
pub mod version;
pub mod working_dir;

pub use casskit_config::{HarnessConfig, JvmOptionsMode, PortKind, ProcessConfig};
pub use blocking::BlockingTasks;
pub use distribution::{Distribution, DistributionSource, Platform};
pub use error::{FailureContext, NodeError, Result};
pub use launcher::ProcessLauncher;
pub use profile::NodeProfile;
pub use readiness::{
    LineConsumer, ReadinessState, ReadinessStatus, ReadinessStrategy, ReadinessWatcher,
};
pub use settings::Settings;
pub use supervisor::{NodeState, NodeSupervisor, NodeSupervisorBuilder, SupervisorOptions};
pub use version::Version;
pub use working_dir::WorkingDirectory;
