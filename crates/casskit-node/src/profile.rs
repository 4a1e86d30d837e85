//! Version-dependent behavior, decided once per run

use std::path::PathBuf;

use casskit_config::MaterializeOptions;
use tracing::debug;

use crate::distribution::Platform;
use crate::version::Version;

/// First Java feature release that rejects the flags older distributions ship
const FIRST_MODULAR_JAVA: u32 = 9;

/// Strategy object for one start, computed from the Cassandra version, the
/// Java runtime and the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProfile {
    version: Version,
    java_major: Option<u32>,
    platform: Platform,
}

impl NodeProfile {
    pub fn new(version: Version, java_major: Option<u32>, platform: Platform) -> Self {
        let profile = Self {
            version,
            java_major,
            platform,
        };
        debug!(
            version = %profile.version,
            java = ?profile.java_major,
            platform = ?profile.platform,
            rpc = profile.supports_rpc(),
            jvm_compat = profile.needs_jvm_compat(),
            "Resolved node profile"
        );
        profile
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The legacy Thrift RPC transport exists before 4.0
    pub fn supports_rpc(&self) -> bool {
        self.version.below(4, 0)
    }

    /// Pre-4.0 launch scripts pass flags that Java 9+ refuses
    pub fn needs_jvm_compat(&self) -> bool {
        self.version.below(4, 0)
            && self.java_major.map_or(false, |major| major >= FIRST_MODULAR_JAVA)
    }

    /// File layout and switches for the materializer
    pub fn materialize_options(&self) -> MaterializeOptions {
        let jvm_options_files = if self.version.at_least(4, 0) {
            vec![
                PathBuf::from("conf/jvm-server.options"),
                PathBuf::from("conf/jvm.options"),
            ]
        } else {
            vec![PathBuf::from("conf/jvm.options")]
        };
        MaterializeOptions {
            jvm_options_files,
            apply_jvm_compat: self.needs_jvm_compat(),
            ..MaterializeOptions::default()
        }
    }
}
