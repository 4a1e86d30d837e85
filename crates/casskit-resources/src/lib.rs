//! # casskit-resources
//!
//! Resources shared between concurrently starting nodes:
//!
//! - **Ports**: randomized bind-then-connect probing for free TCP ports
//! - **File locks**: cross-process exclusive locks with bounded backoff
//! - **Shutdown hooks**: an explicit registry of per-owner exit hooks
//!
//! ```rust,no_run
//! use casskit_resources::PortAllocator;
//!
//! let port = PortAllocator::new().free_port_local()?;
//! assert!(port >= 1024);
//! # Ok::<(), casskit_resources::ResourceError>(())
//! ```

pub mod error;
pub mod file_lock;
pub mod ports;
pub mod shutdown;

pub use error::{ResourceError, Result};
pub use file_lock::{FileLock, LockOptions};
pub use ports::{PortAllocator, MAX_PORT, MIN_PORT};
pub use shutdown::{ShutdownHook, ShutdownRegistry};
