//! Caller-supplied node process configuration

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::yaml;

/// Port value meaning "allocate any free port"
pub const EPHEMERAL_PORT: u16 = 0;

/// System property carrying the JMX port
pub const JMX_PORT_PROPERTY: &str = "cassandra.jmx.local.port";

/// Ports a node can be asked to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortKind {
    Native,
    NativeSsl,
    Rpc,
    Storage,
    SslStorage,
    Jmx,
}

impl PortKind {
    pub const ALL: [PortKind; 6] = [
        PortKind::Native,
        PortKind::NativeSsl,
        PortKind::Rpc,
        PortKind::Storage,
        PortKind::SslStorage,
        PortKind::Jmx,
    ];

    /// Key in `cassandra.yaml`; JMX is configured through a system property
    pub fn config_key(&self) -> Option<&'static str> {
        match self {
            PortKind::Native => Some("native_transport_port"),
            PortKind::NativeSsl => Some("native_transport_port_ssl"),
            PortKind::Rpc => Some("rpc_port"),
            PortKind::Storage => Some("storage_port"),
            PortKind::SslStorage => Some("ssl_storage_port"),
            PortKind::Jmx => None,
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Native => "native",
            PortKind::NativeSsl => "native-ssl",
            PortKind::Rpc => "rpc",
            PortKind::Storage => "storage",
            PortKind::SslStorage => "ssl-storage",
            PortKind::Jmx => "jmx",
        };
        f.write_str(name)
    }
}

/// Requested ports; `Some(0)` asks for an ephemeral port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    pub native: Option<u16>,
    pub native_ssl: Option<u16>,
    pub rpc: Option<u16>,
    pub storage: Option<u16>,
    pub ssl_storage: Option<u16>,
    pub jmx: Option<u16>,
}

impl Ports {
    /// Requested value for `kind`
    pub fn get(&self, kind: PortKind) -> Option<u16> {
        match kind {
            PortKind::Native => self.native,
            PortKind::NativeSsl => self.native_ssl,
            PortKind::Rpc => self.rpc,
            PortKind::Storage => self.storage,
            PortKind::SslStorage => self.ssl_storage,
            PortKind::Jmx => self.jmx,
        }
    }

    /// Set the value for `kind`
    pub fn set(&mut self, kind: PortKind, port: u16) {
        let slot = match kind {
            PortKind::Native => &mut self.native,
            PortKind::NativeSsl => &mut self.native_ssl,
            PortKind::Rpc => &mut self.rpc,
            PortKind::Storage => &mut self.storage,
            PortKind::SslStorage => &mut self.ssl_storage,
            PortKind::Jmx => &mut self.jmx,
        };
        *slot = Some(port);
    }
}

/// Addresses written into `cassandra.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    pub listen: Option<String>,
    pub rpc: Option<String>,
    pub broadcast: Option<String>,
    pub broadcast_rpc: Option<String>,
}

/// How JVM-options-file lines are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JvmOptionsMode {
    /// Keep the distribution's options and add ours in a marked block
    #[default]
    Append,
    /// Replace the whole file
    Replace,
}

/// File copied into the working directory before launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Source file or directory
    pub source: PathBuf,
    /// Destination relative to the working directory
    pub destination: PathBuf,
}

/// Process-level overrides for one node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Nested overrides mirroring the `cassandra.yaml` schema
    pub overrides: Mapping,
    /// `-Dkey=value` properties passed through the launch environment
    pub system_properties: BTreeMap<String, String>,
    /// Extra environment variables, passed verbatim
    pub environment: BTreeMap<String, String>,
    /// Raw JVM flags passed through the launch environment
    pub jvm_options: Vec<String>,
    /// Lines for the distribution's JVM options file
    pub jvm_options_file: Vec<String>,
    /// Append to or replace the JVM options file
    pub jvm_options_mode: JvmOptionsMode,
    /// Replacement contents for the logging configuration
    pub logging_config: Option<String>,
    pub ports: Ports,
    pub addresses: Addresses,
    /// Java installation used to run the node
    pub java_home: Option<PathBuf>,
    pub resources: Vec<Resource>,
}

impl ProcessConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a `cassandra.yaml` value at a dotted path
    pub fn config_property(mut self, path: &str, value: impl Into<Value>) -> Self {
        yaml::insert_path(&mut self.overrides, path, value.into());
        self
    }

    /// Merge a nested override mapping
    pub fn config_overrides(mut self, overrides: Mapping) -> Self {
        let mut merged = Value::Mapping(std::mem::take(&mut self.overrides));
        yaml::deep_merge(&mut merged, &Value::Mapping(overrides));
        if let Value::Mapping(map) = merged {
            self.overrides = map;
        }
        self
    }

    /// Add a system property
    pub fn system_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system_properties.insert(key.into(), value.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a raw JVM flag
    pub fn jvm_option(mut self, option: impl Into<String>) -> Self {
        self.jvm_options.push(option.into());
        self
    }

    /// Set the JVM options file lines and how they are applied
    pub fn jvm_options_file<I, S>(mut self, lines: I, mode: JvmOptionsMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jvm_options_file = lines.into_iter().map(Into::into).collect();
        self.jvm_options_mode = mode;
        self
    }

    /// Replace the logging configuration
    pub fn logging_config(mut self, contents: impl Into<String>) -> Self {
        self.logging_config = Some(contents.into());
        self
    }

    /// Request a port; pass [`EPHEMERAL_PORT`] for any free port
    pub fn port(mut self, kind: PortKind, port: u16) -> Self {
        self.ports.set(kind, port);
        self
    }

    pub fn listen_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.listen = Some(address.into());
        self
    }

    pub fn rpc_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.rpc = Some(address.into());
        self
    }

    pub fn broadcast_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.broadcast = Some(address.into());
        self
    }

    pub fn broadcast_rpc_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.broadcast_rpc = Some(address.into());
        self
    }

    /// Set the Java installation
    pub fn java_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.java_home = Some(path.into());
        self
    }

    /// Copy `source` to `destination` (relative to the working directory)
    pub fn resource(mut self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        self.resources.push(Resource {
            source: source.into(),
            destination: destination.into(),
        });
        self
    }

    /// Requested value for a port, from the typed field or the overrides
    pub fn port_value(&self, kind: PortKind) -> Option<u16> {
        if let Some(port) = self.ports.get(kind) {
            return Some(port);
        }
        match kind.config_key() {
            Some(key) => self.overrides.get(key).and_then(yaml::as_port),
            None => self
                .system_properties
                .get(JMX_PORT_PROPERTY)
                .and_then(|p| p.trim().parse().ok()),
        }
    }

    /// Every explicitly requested port
    pub fn requested_ports(&self) -> Vec<(PortKind, u16)> {
        PortKind::ALL
            .iter()
            .filter_map(|kind| self.port_value(*kind).map(|port| (*kind, port)))
            .collect()
    }

    /// Ports still set to the ephemeral sentinel
    pub fn ephemeral_ports(&self) -> Vec<PortKind> {
        PortKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.port_value(*kind) == Some(EPHEMERAL_PORT))
            .collect()
    }

    /// Address used when probing for free ports
    pub fn bind_address(&self) -> IpAddr {
        self.addresses
            .listen
            .as_deref()
            .or_else(|| self.overrides.get("listen_address").and_then(Value::as_str))
            .and_then(|a| a.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Overrides with typed ports and addresses folded in
    ///
    /// Typed fields take precedence over the same keys in `overrides`.
    pub fn effective_overrides(&self) -> Mapping {
        let mut overrides = self.overrides.clone();
        for kind in PortKind::ALL {
            if let (Some(key), Some(port)) = (kind.config_key(), self.ports.get(kind)) {
                overrides.insert(Value::from(key), Value::from(port));
            }
        }
        let addresses = [
            ("listen_address", &self.addresses.listen),
            ("rpc_address", &self.addresses.rpc),
            ("broadcast_address", &self.addresses.broadcast),
            ("broadcast_rpc_address", &self.addresses.broadcast_rpc),
        ];
        for (key, address) in addresses {
            if let Some(address) = address {
                overrides.insert(Value::from(key), Value::from(address.as_str()));
            }
        }
        overrides
    }

    /// System properties including the resolved JMX port
    pub fn effective_system_properties(&self) -> BTreeMap<String, String> {
        let mut properties = self.system_properties.clone();
        if let Some(port) = self.ports.jmx {
            properties.insert(JMX_PORT_PROPERTY.to_string(), port.to_string());
        }
        properties
    }
}
