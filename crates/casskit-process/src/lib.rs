//! # casskit-process
//!
//! **Purpose**: Child process lifecycle for disposable Cassandra nodes
//!
//! Provides cross-platform process spawning, pid tracking, graceful shutdown
//! with forced escalation, and tree-kill functionality.
//!
//! ## Features
//!
//! - **Process Spawning**: tokio child with piped stdout/stderr
//! - **PID Tracking**: pid from the child handle, `None` when unavailable
//! - **Graceful Shutdown**: SIGTERM→SIGKILL escalation after a grace period
//! - **Process Tree Kill**: process groups on Unix, task trees on Windows
//! - **Liveness**: pid-level checks usable from shutdown hooks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use casskit_process::{CommandSpec, ProcessManager};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ProcessManager::new();
//! let spec = CommandSpec::new("bin/cassandra").args(["-f"]);
//!
//! let mut child = manager.spawn(spec)?;
//! child.shutdown(Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod manager;
pub mod tree;

pub use child::ManagedChild;
pub use config::CommandSpec;
pub use error::{ProcessError, Result};
pub use manager::ProcessManager;
pub use tree::{is_alive, kill_tree};
