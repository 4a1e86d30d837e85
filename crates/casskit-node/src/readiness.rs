//! Readiness detection from node output
//!
//! A [`ReadinessWatcher`] inspects stdout lines until it reaches a terminal
//! state, `Ready` or `Failed`, and publishes that state once on a
//! `tokio::sync::watch` channel. Fatal markers are checked before success
//! markers, so a line matching both fails the start. Lines arriving after the
//! terminal transition are never inspected.

use std::net::IpAddr;

use casskit_config::yaml;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::profile::NodeProfile;

/// Receives node output one line at a time
pub trait LineConsumer: Send {
    fn accept(&mut self, line: &str);
}

/// Native (CQL) transport bound
pub const NATIVE_MARKER: &str = "Starting listening for CQL clients on";

/// Legacy Thrift RPC transport bound
pub const RPC_MARKER: &str = "Binding thrift service to";

/// Reason recorded when output ends before a terminal state
pub const EXITED_BEFORE_READY: &str = "process exited before becoming ready";

/// Substrings that mean the node will never become ready (case-insensitive)
pub const FATAL_MARKERS: &[&str] = &[
    "address already in use",
    "exception encountered during startup",
    "invalid yaml",
    "missing required directive",
    "unsupported java version",
    "unrecognized vm option",
    "unsupported major.minor version",
    "could not create the java virtual machine",
    "fatal configuration error",
];

static ENDPOINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\S*/)?(\S+):(\d+)").expect("valid endpoint regex"));

/// Terminal-or-not status of a start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadinessStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl ReadinessStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadinessStatus::Pending)
    }
}

/// What the watcher has learned so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessState {
    pub status: ReadinessStatus,
    /// Address the node reported binding, else the configured one
    pub address: Option<IpAddr>,
    pub native_port: Option<u16>,
    pub ssl_port: Option<u16>,
    pub rpc_port: Option<u16>,
    /// Offending line when `Failed`
    pub reason: Option<String>,
}

/// Transports whose bind lines must all appear before the node is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessStrategy {
    pub native: bool,
    /// A separate encrypted native port is bound as well
    pub native_ssl: bool,
    pub rpc: bool,
}

impl ReadinessStrategy {
    /// Decide the expected transports from the profile and merged node config
    pub fn resolve(profile: &NodeProfile, node_config: &Value) -> Self {
        let flag = |key: &str| node_config.get(key).and_then(yaml::as_bool);
        let port = |key: &str| node_config.get(key).and_then(yaml::as_port);

        let native = flag("start_native_transport").unwrap_or(true);
        let rpc = profile.supports_rpc() && flag("start_rpc").unwrap_or(false);
        let encrypted = yaml::get_path(node_config, "client_encryption_options.enabled")
            .and_then(yaml::as_bool)
            .unwrap_or(false);
        let native_ssl = native
            && encrypted
            && match (port("native_transport_port_ssl"), port("native_transport_port")) {
                (Some(ssl), Some(plain)) => ssl != plain,
                (Some(_), None) => true,
                _ => false,
            };

        let strategy = Self {
            native,
            native_ssl,
            rpc,
        };
        debug!(?strategy, "Resolved readiness strategy");
        strategy
    }

    /// Neither transport enabled: the node is ready as soon as it runs
    pub fn expects_nothing(&self) -> bool {
        !self.native && !self.rpc
    }
}

/// Single-writer readiness state machine fed by the stdout reader
pub struct ReadinessWatcher {
    strategy: ReadinessStrategy,
    state: ReadinessState,
    sender: watch::Sender<ReadinessState>,
}

impl ReadinessWatcher {
    /// Create a watcher; `address` is reported unless a bind line names one
    pub fn new(
        strategy: ReadinessStrategy,
        address: IpAddr,
    ) -> (Self, watch::Receiver<ReadinessState>) {
        let mut state = ReadinessState {
            address: Some(address),
            ..ReadinessState::default()
        };
        if strategy.expects_nothing() {
            info!(%address, "No client transport enabled, node is ready on launch");
            state.status = ReadinessStatus::Ready;
        }
        let (sender, receiver) = watch::channel(state.clone());
        (
            Self {
                strategy,
                state,
                sender,
            },
            receiver,
        )
    }

    pub fn state(&self) -> &ReadinessState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.status.is_terminal()
    }

    /// Output ended; a pending start has failed
    pub fn close(&mut self) {
        if !self.is_terminal() {
            self.fail(EXITED_BEFORE_READY.to_string());
        }
    }

    fn fail(&mut self, reason: String) {
        warn!(reason = %reason, "Node failed to become ready");
        self.state.status = ReadinessStatus::Failed;
        self.state.reason = Some(reason);
        self.sender.send_replace(self.state.clone());
    }

    fn record_endpoint(&mut self, rest: &str) -> Option<u16> {
        let captures = ENDPOINT.captures(rest)?;
        let port = captures.get(2)?.as_str().parse().ok()?;
        let host = captures.get(1)?.as_str().trim_matches(|c| c == '[' || c == ']');
        if let Ok(address) = host.parse::<IpAddr>() {
            self.state.address = Some(address);
        }
        Some(port)
    }

    fn is_complete(&self) -> bool {
        (!self.strategy.native || self.state.native_port.is_some())
            && (!self.strategy.native_ssl || self.state.ssl_port.is_some())
            && (!self.strategy.rpc || self.state.rpc_port.is_some())
    }
}

impl LineConsumer for ReadinessWatcher {
    fn accept(&mut self, line: &str) {
        if self.is_terminal() {
            return;
        }

        let lowered = line.to_ascii_lowercase();
        if FATAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            self.fail(line.trim().to_string());
            return;
        }

        let mut progressed = false;
        if self.strategy.native {
            if let Some(index) = line.find(NATIVE_MARKER) {
                let rest = &line[index + NATIVE_MARKER.len()..];
                if let Some(port) = self.record_endpoint(rest) {
                    let encrypted = rest.contains("(encrypted)");
                    if self.strategy.native_ssl && encrypted {
                        self.state.ssl_port = Some(port);
                    } else {
                        self.state.native_port = Some(port);
                    }
                    progressed = true;
                }
            }
        }
        if self.strategy.rpc {
            if let Some(index) = line.find(RPC_MARKER) {
                if let Some(port) = self.record_endpoint(&line[index + RPC_MARKER.len()..]) {
                    self.state.rpc_port = Some(port);
                    progressed = true;
                }
            }
        }

        if progressed && self.is_complete() {
            self.state.status = ReadinessStatus::Ready;
            info!(
                address = ?self.state.address,
                native_port = ?self.state.native_port,
                ssl_port = ?self.state.ssl_port,
                rpc_port = ?self.state.rpc_port,
                "Node is ready"
            );
            self.sender.send_replace(self.state.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Platform;
    use std::net::Ipv4Addr;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn native_only() -> ReadinessStrategy {
        ReadinessStrategy {
            native: true,
            native_ssl: false,
            rpc: false,
        }
    }

    fn feed(watcher: &mut ReadinessWatcher, lines: &[&str]) {
        for line in lines {
            watcher.accept(line);
        }
    }

    #[test]
    fn test_ready_on_native_marker() {
        let (mut watcher, receiver) = ReadinessWatcher::new(native_only(), "10.0.0.1".parse().unwrap());
        feed(
            &mut watcher,
            &[
                "INFO starting...",
                "Starting listening for CQL clients on 127.0.0.1:9042 (unencrypted)",
            ],
        );

        let state = receiver.borrow().clone();
        assert_eq!(state.status, ReadinessStatus::Ready);
        assert_eq!(state.address, Some(LOOPBACK));
        assert_eq!(state.native_port, Some(9042));
        assert_eq!(state.ssl_port, None);
        assert_eq!(state.rpc_port, None);
    }

    #[test]
    fn test_fatal_marker_fails_with_line() {
        let (mut watcher, receiver) = ReadinessWatcher::new(native_only(), LOOPBACK);
        watcher.accept("Address already in use");

        let state = receiver.borrow().clone();
        assert_eq!(state.status, ReadinessStatus::Failed);
        assert_eq!(state.reason.as_deref(), Some("Address already in use"));
    }

    #[test]
    fn test_terminal_state_is_never_flipped() {
        let (mut watcher, receiver) = ReadinessWatcher::new(native_only(), LOOPBACK);
        feed(
            &mut watcher,
            &[
                "INFO  [main] Starting listening for CQL clients on localhost/127.0.0.1:9042 (unencrypted)...",
                "ERROR Exception encountered during startup",
                "Address already in use",
            ],
        );
        watcher.close();

        assert_eq!(receiver.borrow().status, ReadinessStatus::Ready);
        assert_eq!(receiver.borrow().reason, None);
    }

    #[test]
    fn test_fatal_wins_over_success_on_the_same_line() {
        let (mut watcher, _receiver) = ReadinessWatcher::new(native_only(), LOOPBACK);
        watcher.accept("Starting listening for CQL clients on /127.0.0.1:9042: Address already in use");
        assert_eq!(watcher.state().status, ReadinessStatus::Failed);
    }

    #[test]
    fn test_no_transport_is_ready_on_attach() {
        let strategy = ReadinessStrategy {
            native: false,
            native_ssl: false,
            rpc: false,
        };
        let (_watcher, receiver) = ReadinessWatcher::new(strategy, "127.0.0.2".parse().unwrap());
        let state = receiver.borrow().clone();
        assert_eq!(state.status, ReadinessStatus::Ready);
        assert_eq!(state.address, Some("127.0.0.2".parse().unwrap()));
        assert_eq!(state.native_port, None);
    }

    #[test]
    fn test_eof_while_pending_fails() {
        let (mut watcher, receiver) = ReadinessWatcher::new(native_only(), LOOPBACK);
        watcher.accept("INFO starting...");
        watcher.close();

        let state = receiver.borrow().clone();
        assert_eq!(state.status, ReadinessStatus::Failed);
        assert_eq!(state.reason.as_deref(), Some(EXITED_BEFORE_READY));
    }

    #[test]
    fn test_waits_for_every_expected_transport() {
        let strategy = ReadinessStrategy {
            native: true,
            native_ssl: true,
            rpc: true,
        };
        let (mut watcher, _receiver) = ReadinessWatcher::new(strategy, LOOPBACK);

        watcher.accept("Starting listening for CQL clients on localhost/127.0.0.1:9142 (encrypted)...");
        assert_eq!(watcher.state().status, ReadinessStatus::Pending);
        watcher.accept("Starting listening for CQL clients on localhost/127.0.0.1:9042 (unencrypted)...");
        assert_eq!(watcher.state().status, ReadinessStatus::Pending);
        watcher.accept("Binding thrift service to localhost/127.0.0.1:9160");

        let state = watcher.state();
        assert_eq!(state.status, ReadinessStatus::Ready);
        assert_eq!(state.native_port, Some(9042));
        assert_eq!(state.ssl_port, Some(9142));
        assert_eq!(state.rpc_port, Some(9160));
    }

    #[test]
    fn test_ipv6_endpoint_uses_last_colon() {
        let (mut watcher, _receiver) = ReadinessWatcher::new(native_only(), LOOPBACK);
        watcher.accept("Starting listening for CQL clients on /0:0:0:0:0:0:0:1:9042 (unencrypted)...");

        assert_eq!(watcher.state().address, Some("::1".parse().unwrap()));
        assert_eq!(watcher.state().native_port, Some(9042));
    }

    #[test]
    fn test_strategy_from_node_config() {
        let old = NodeProfile::new("3.11".parse().unwrap(), Some(8), Platform::Unix);
        let new = NodeProfile::new("4.1".parse().unwrap(), Some(11), Platform::Unix);
        let config: Value = serde_yaml::from_str(
            "start_native_transport: true\nstart_rpc: true\nnative_transport_port: 9042\n\
             native_transport_port_ssl: 9142\nclient_encryption_options:\n  enabled: true\n",
        )
        .unwrap();

        let strategy = ReadinessStrategy::resolve(&old, &config);
        assert!(strategy.native && strategy.native_ssl && strategy.rpc);
        assert!(!ReadinessStrategy::resolve(&new, &config).rpc);

        let disabled: Value = serde_yaml::from_str("start_native_transport: false\n").unwrap();
        assert!(ReadinessStrategy::resolve(&new, &disabled).expects_nothing());
        assert!(ReadinessStrategy::resolve(&new, &Value::Null).native);
    }
}
