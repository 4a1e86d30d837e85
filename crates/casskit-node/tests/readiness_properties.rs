//! Property tests for the readiness state machine

use std::net::{IpAddr, Ipv4Addr};

use casskit_node::readiness::FATAL_MARKERS;
use casskit_node::{LineConsumer, ReadinessStatus, ReadinessStrategy, ReadinessWatcher};
use proptest::prelude::*;

const NATIVE_ONLY: ReadinessStrategy = ReadinessStrategy {
    native: true,
    native_ssl: false,
    rpc: false,
};

fn any_line() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ -~]{0,80}",
        prop::sample::select(FATAL_MARKERS.to_vec()).prop_map(|m| format!("ERROR {}", m)),
        (1024u16..=65535).prop_map(|p| format!(
            "INFO Starting listening for CQL clients on localhost/127.0.0.1:{} (unencrypted)...",
            p
        )),
    ]
}

proptest! {
    #[test]
    fn prop_terminal_state_never_changes(
        prefix in prop::collection::vec(any_line(), 0..20),
        suffix in prop::collection::vec(any_line(), 0..20),
    ) {
        let (mut watcher, receiver) =
            ReadinessWatcher::new(NATIVE_ONLY, IpAddr::V4(Ipv4Addr::LOCALHOST));
        for line in &prefix {
            watcher.accept(line);
        }
        watcher.close();
        let terminal = receiver.borrow().clone();
        prop_assert!(terminal.status.is_terminal());

        for line in &suffix {
            watcher.accept(line);
        }
        watcher.close();
        prop_assert_eq!(receiver.borrow().clone(), terminal);
    }

    #[test]
    fn prop_bound_port_is_read_from_the_line(port in 1u16..=65535, octet in 1u8..=254) {
        let (mut watcher, _receiver) =
            ReadinessWatcher::new(NATIVE_ONLY, IpAddr::V4(Ipv4Addr::LOCALHOST));
        watcher.accept(&format!(
            "INFO  [main] 2024-01-01 Server.java:159 - Starting listening for CQL clients on localhost/127.0.0.{}:{} (unencrypted)...",
            octet, port
        ));

        let state = watcher.state();
        prop_assert_eq!(state.status, ReadinessStatus::Ready);
        prop_assert_eq!(state.native_port, Some(port));
        prop_assert_eq!(state.address, Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, octet))));
    }

    #[test]
    fn prop_fatal_marker_always_fails(
        marker in prop::sample::select(FATAL_MARKERS.to_vec()),
        port in 1024u16..=65535,
    ) {
        let (mut watcher, _receiver) =
            ReadinessWatcher::new(NATIVE_ONLY, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let line = format!(
            "Starting listening for CQL clients on /127.0.0.1:{} failed: {}",
            port,
            marker.to_uppercase()
        );
        watcher.accept(&line);

        prop_assert_eq!(watcher.state().status, ReadinessStatus::Failed);
        prop_assert_eq!(watcher.state().reason.as_deref(), Some(line.as_str()));
    }
}
