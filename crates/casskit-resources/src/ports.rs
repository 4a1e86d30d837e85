//! Free TCP port allocation
//!
//! Candidates are drawn at random from the unprivileged range instead of
//! scanning linearly, so that several test processes starting at the same time
//! rarely try the same port. A candidate is accepted only when a throwaway
//! listener can bind it and a follow-up connect attempt is refused.
//!
//! The two checks narrow, but do not close, the window in which another
//! allocator can hand out the same port. The residual collision rate is an
//! operational property tuned through [`PortAllocator::with_attempts`] and
//! [`PortAllocator::with_connect_timeout`].

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace};

use crate::error::{ResourceError, Result};

/// Lowest port handed out (first unprivileged port)
pub const MIN_PORT: u16 = 1024;

/// Highest port handed out
pub const MAX_PORT: u16 = 65535;

/// Default number of candidates tried per requested port
const DEFAULT_ATTEMPTS: usize = 1024;

/// Default timeout for the connect check
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 100;

/// Finds locally free TCP ports
#[derive(Debug, Clone)]
pub struct PortAllocator {
    attempts: usize,
    connect_timeout: Duration,
}

impl PortAllocator {
    /// Create an allocator with the default attempt budget
    pub fn new() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    /// Set the number of candidates tried per requested port
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Set the connect-check timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Find a free port on the loopback interface
    pub fn free_port_local(&self) -> Result<u16> {
        self.free_port(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Find a port that is free on `address` at call time
    pub fn free_port(&self, address: IpAddr) -> Result<u16> {
        self.free_ports(address, 1).map(|ports| ports[0])
    }

    /// Find `count` distinct free ports on `address`
    ///
    /// Every candidate is checked at most once per call, so a batched request
    /// never retries a port it already handed out.
    pub fn free_ports(&self, address: IpAddr, count: usize) -> Result<Vec<u16>> {
        let budget = self.attempts.saturating_mul(count.max(1));
        let mut tried = HashSet::new();
        let mut ports = Vec::with_capacity(count);
        let mut rng = rand::thread_rng();

        let mut attempts = 0;
        while ports.len() < count {
            if attempts >= budget {
                return Err(ResourceError::PortsExhausted { address, attempts });
            }
            attempts += 1;

            let candidate = rng.gen_range(MIN_PORT..=MAX_PORT);
            if !tried.insert(candidate) {
                continue;
            }
            if self.is_free(address, candidate) {
                trace!(port = candidate, %address, "Allocated free port");
                ports.push(candidate);
            }
        }

        debug!(?ports, %address, attempts, "Allocated free ports");
        Ok(ports)
    }

    /// Bind-then-connect availability check
    pub fn is_free(&self, address: IpAddr, port: u16) -> bool {
        match TcpListener::bind(SocketAddr::new(address, port)) {
            Ok(listener) => drop(listener),
            Err(_) => return false,
        }

        let target = SocketAddr::new(connect_address(address), port);
        TcpStream::connect_timeout(&target, self.connect_timeout).is_err()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wildcard addresses cannot be connected to; check loopback instead
fn connect_address(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    }
}
