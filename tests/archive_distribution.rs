//! Starting nodes from distribution archives through the shared cache
#![cfg(unix)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use casskit_integration_tests::FakeDistribution;
use casskit_node::working_dir::EXTRACTED_MARKER;
use casskit_node::{Distribution, NodeError, NodeState, NodeSupervisor, PortKind, ProcessConfig};
use casskit_resources::ShutdownRegistry;
use flate2::write::GzEncoder;
use flate2::Compression;
use serial_test::serial;
use tempfile::TempDir;

const STEM: &str = "apache-cassandra-4.1.3-bin";

/// Pack the fake distribution the way release tarballs are laid out
fn pack(fake: &FakeDistribution, dir: &Path) -> PathBuf {
    let archive = dir.join(format!("{}.tar.gz", STEM));
    let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all("apache-cassandra-4.1.3", fake.path()).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    archive
}

fn node(archive: &Path, work: &TempDir, fake: &FakeDistribution, port: u16) -> NodeSupervisor {
    NodeSupervisor::builder(Distribution::archive("4.1.3".parse().unwrap(), archive))
        .config(
            ProcessConfig::new()
                .env("CASSKIT_FAKE_PORT_DIR", fake.port_dir().to_string_lossy())
                .port(PortKind::Native, port),
        )
        .working_root(work.path().join("nodes"))
        .cache_dir(work.path().join("cache"))
        .startup_timeout(Duration::from_secs(30))
        .stop_timeout(Duration::from_secs(5))
        .shutdown_registry(Arc::new(ShutdownRegistry::new()))
        .build()
}

#[tokio::test]
#[serial]
async fn archive_distribution_is_extracted_once_and_started() {
    let fake = FakeDistribution::new().unwrap();
    let work = TempDir::new().unwrap();
    let archive = pack(&fake, work.path());

    let first = node(&archive, &work, &fake, 19142);
    let second = node(&archive, &work, &fake, 19143);
    first.start().await.unwrap();
    second.start().await.unwrap();

    let cached = work.path().join("cache").join(STEM);
    assert!(cached.join(EXTRACTED_MARKER).is_file());
    assert_eq!(
        std::fs::read_dir(work.path().join("cache"))
            .unwrap()
            .filter(|entry| entry.as_ref().unwrap().path().is_dir())
            .count(),
        1
    );

    // The launch script kept its executable bit through the archive.
    let script = first.working_directory().unwrap().join("bin/cassandra");
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    assert_eq!(first.settings().unwrap().native_port, Some(19142));
    assert_eq!(second.settings().unwrap().native_port, Some(19143));

    first.stop().await.unwrap();
    second.stop().await.unwrap();
    assert_eq!(first.state(), NodeState::Stopped);
}

#[tokio::test]
async fn unknown_archive_suffix_is_unsupported() {
    let fake = FakeDistribution::new().unwrap();
    let work = TempDir::new().unwrap();
    let archive = work.path().join("apache-cassandra-4.1.3-bin.rar");
    std::fs::write(&archive, b"not an archive").unwrap();

    let node = node(&archive, &work, &fake, 19144);
    let error = node.start().await.unwrap_err();

    assert!(matches!(error, NodeError::UnsupportedFormat(_)), "{}", error);
    assert_eq!(node.state(), NodeState::Failed);
}
