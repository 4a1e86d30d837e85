//! Connection settings of a running node

use std::net::IpAddr;

use serde::Serialize;

use crate::version::Version;

/// Default inter-node port when neither the caller nor the config sets one
pub const DEFAULT_STORAGE_PORT: u16 = 7000;
/// Default encrypted inter-node port
pub const DEFAULT_SSL_STORAGE_PORT: u16 = 7001;
/// Default JMX port
pub const DEFAULT_JMX_PORT: u16 = 7199;

/// Snapshot published when the node becomes ready
///
/// Transport ports are `None` when that transport is disabled; a port is
/// never 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub address: IpAddr,
    pub native_port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub rpc_port: Option<u16>,
    pub storage_port: u16,
    pub ssl_storage_port: u16,
    pub jmx_port: u16,
    pub version: Version,
}

impl Settings {
    /// Port clients should connect to, preferring the plain native port
    pub fn client_port(&self) -> Option<u16> {
        self.native_port.or(self.ssl_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_client_port_prefers_plain_native() {
        let mut settings = Settings {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            native_port: Some(9042),
            ssl_port: Some(9142),
            rpc_port: None,
            storage_port: DEFAULT_STORAGE_PORT,
            ssl_storage_port: DEFAULT_SSL_STORAGE_PORT,
            jmx_port: DEFAULT_JMX_PORT,
            version: "4.1.3".parse().unwrap(),
        };
        assert_eq!(settings.client_port(), Some(9042));

        settings.native_port = None;
        assert_eq!(settings.client_port(), Some(9142));

        settings.ssl_port = None;
        assert_eq!(settings.client_port(), None);
    }
}
