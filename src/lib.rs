//! Fixtures for casskit end-to-end tests
//!
//! [`FakeDistribution`] lays out a directory that looks enough like a
//! Cassandra distribution for the harness: `conf/cassandra.yaml`, the JVM
//! options and logging files, and a `bin/cassandra` shell script that prints
//! Cassandra's boot lines for the configured ports and then blocks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

/// Default `cassandra.yaml` shipped by the fake distribution
pub const DEFAULT_CONFIG: &str = "\
cluster_name: 'Test Cluster'
num_tokens: 16
listen_address: 127.0.0.1
rpc_address: 127.0.0.1
start_native_transport: true
native_transport_port: 9042
start_rpc: false
rpc_port: 9160
storage_port: 7000
ssl_storage_port: 7001
client_encryption_options:
  enabled: false
  keystore: conf/.keystore
";

/// Reads the bound native port from the materialized config, refuses to
/// start when the port is taken, and otherwise announces the transport.
const LAUNCH_SCRIPT: &str = r#"#!/bin/sh
cd "$(dirname "$0")/.." || exit 1
echo "INFO  [main] CassandraDaemon.java:600 - JVM_EXTRA_OPTS=$JVM_EXTRA_OPTS"
sleep "${CASSKIT_FAKE_BOOT_DELAY:-0}"
port=$(sed -n 's/^native_transport_port: *//p' conf/cassandra.yaml | tr -d "'\" ")
native=$(sed -n 's/^start_native_transport: *//p' conf/cassandra.yaml | tr -d "'\" ")
ports="${CASSKIT_FAKE_PORT_DIR:-/tmp}"
mkdir -p "$ports"
lock="$ports/casskit-fake-port-$port"
if [ "$native" != "false" ]; then
    if ! mkdir "$lock" 2>/dev/null; then
        echo "ERROR [main] CassandraDaemon.java:803 - Port already in use: $port; nested exception is: java.net.BindException: Address already in use"
        exit 3
    fi
    trap 'rmdir "$lock"; exit 0' TERM INT
    echo "INFO  [main] Server.java:159 - Starting listening for CQL clients on localhost/127.0.0.1:$port (unencrypted)..."
else
    trap 'exit 0' TERM INT
    echo "INFO  [main] CassandraDaemon.java:556 - Not starting native transport as requested."
fi
while true; do
    sleep 1 &
    wait $!
done
"#;

/// A scripted stand-in for an unpacked Cassandra distribution
pub struct FakeDistribution {
    dir: TempDir,
    ports: TempDir,
}

impl FakeDistribution {
    /// Create the fake distribution in a fresh temporary directory
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();
        fs::create_dir_all(root.join("bin"))?;
        fs::create_dir_all(root.join("conf"))?;
        fs::create_dir_all(root.join("lib"))?;

        fs::write(root.join("conf/cassandra.yaml"), DEFAULT_CONFIG)?;
        fs::write(root.join("conf/jvm-server.options"), "-Xss256k\n")?;
        fs::write(root.join("conf/logback.xml"), "<configuration/>\n")?;
        let script = root.join("bin/cassandra");
        fs::write(&script, LAUNCH_SCRIPT)?;
        make_executable(&script)?;

        Ok(Self {
            dir,
            ports: TempDir::new()?,
        })
    }

    /// Directory to hand to `Distribution::directory`
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory for the script's port markers, isolated per fixture
    ///
    /// Pass it to nodes as `CASSKIT_FAKE_PORT_DIR`.
    pub fn port_dir(&self) -> PathBuf {
        self.ports.path().to_path_buf()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Poll until no process with `pid` exists; `false` if one is still alive at `timeout`
pub async fn eventually_dead(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !casskit_process::is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
