//! # casskit-config
//!
//! Configuration for disposable Cassandra nodes:
//!
//! - [`ProcessConfig`]: what the caller wants the node to look like (YAML
//!   overrides, ports, addresses, JVM settings, extra files)
//! - [`ConfigMaterializer`]: the ordered pipeline that writes a
//!   [`ProcessConfig`] into a node's working directory
//! - [`HarnessConfig`]: harness-wide settings from file and environment
//!
//! ```rust,no_run
//! use casskit_config::{ConfigMaterializer, MaterializeOptions, PortKind, ProcessConfig};
//!
//! let config = ProcessConfig::new()
//!     .port(PortKind::Native, 0)
//!     .config_property("cluster_name", "Test Cluster");
//!
//! let materialized = ConfigMaterializer::new(MaterializeOptions::default())
//!     .materialize(std::path::Path::new("/tmp/node"), &config)?;
//! assert_ne!(materialized.config.ports.native, Some(0));
//! # Ok::<(), casskit_config::ConfigError>(())
//! ```

pub mod error;
pub mod harness;
pub mod materializer;
pub mod process_config;
pub mod yaml;

pub use error::{ConfigError, Result};
pub use harness::HarnessConfig;
pub use materializer::{ConfigMaterializer, MaterializeOptions, Materialized};
pub use process_config::{
    Addresses, JvmOptionsMode, PortKind, Ports, ProcessConfig, Resource, EPHEMERAL_PORT,
    JMX_PORT_PROPERTY,
};
