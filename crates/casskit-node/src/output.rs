//! Node output readers
//!
//! One reader task per child stream. Each line goes, in order, to the
//! readiness watcher (stdout only, while it is pending), the recent-lines
//! buffer and the pass-through logger.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::readiness::{LineConsumer, ReadinessWatcher};

/// Lines kept for failure reports
pub const RECENT_LINES: usize = 20;

/// Which child stream a reader drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Shared ring buffer of the most recent lines from both streams
#[derive(Debug, Clone)]
pub struct RecentLines {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl RecentLines {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Copy of the buffered lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LineConsumer for RecentLines {
    fn accept(&mut self, line: &str) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}

/// Forwards node output to `tracing` under the `casskit::node` target
#[derive(Debug, Clone)]
pub struct LogForwarder {
    node: String,
    stream: OutputStream,
}

impl LogForwarder {
    pub fn new(node: impl Into<String>, stream: OutputStream) -> Self {
        Self {
            node: node.into(),
            stream,
        }
    }
}

impl LineConsumer for LogForwarder {
    fn accept(&mut self, line: &str) {
        match self.stream {
            OutputStream::Stdout => info!(target: "casskit::node", node = %self.node, "{}", line),
            OutputStream::Stderr => warn!(target: "casskit::node", node = %self.node, "{}", line),
        }
    }
}

/// Drain `reader` line by line on a new task
///
/// The watcher, when given, sees each line first and only until it reaches a
/// terminal state; it is closed when the stream ends.
pub fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    mut watcher: Option<ReadinessWatcher>,
    mut consumers: Vec<Box<dyn LineConsumer>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buffer);
                    let line = text.trim_end_matches(['\r', '\n']);
                    if let Some(watcher) = watcher.as_mut().filter(|w| !w.is_terminal()) {
                        watcher.accept(line);
                    }
                    for consumer in consumers.iter_mut() {
                        consumer.accept(line);
                    }
                }
                Err(e) => {
                    debug!(stream = stream.as_str(), error = %e, "Output stream read failed");
                    break;
                }
            }
        }
        if let Some(watcher) = watcher.as_mut() {
            watcher.close();
        }
        debug!(stream = stream.as_str(), "Output stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{ReadinessStatus, ReadinessStrategy, EXITED_BEFORE_READY};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_recent_lines_keeps_the_tail() {
        let mut recent = RecentLines::new(3);
        for i in 0..5 {
            recent.accept(&format!("line {}", i));
        }
        assert_eq!(recent.snapshot(), vec!["line 2", "line 3", "line 4"]);
        recent.clear();
        assert!(recent.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_reader_feeds_watcher_then_consumers() {
        let strategy = ReadinessStrategy {
            native: true,
            native_ssl: false,
            rpc: false,
        };
        let (watcher, mut receiver) = ReadinessWatcher::new(strategy, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let recent = RecentLines::new(RECENT_LINES);

        let input: &[u8] = b"INFO starting\r\nStarting listening for CQL clients on /127.0.0.1:19042 (unencrypted)...\nAddress already in use\n";
        let handle = spawn_reader(
            input,
            OutputStream::Stdout,
            Some(watcher),
            vec![Box::new(recent.clone()), Box::new(LogForwarder::new("test", OutputStream::Stdout))],
        );

        let state = receiver
            .wait_for(|state| state.status.is_terminal())
            .await
            .unwrap()
            .clone();
        handle.await.unwrap();

        assert_eq!(state.status, ReadinessStatus::Ready);
        assert_eq!(state.native_port, Some(19042));
        assert_eq!(receiver.borrow().status, ReadinessStatus::Ready);
        assert_eq!(recent.snapshot().len(), 3);
        assert_eq!(recent.snapshot()[0], "INFO starting");
    }

    #[tokio::test]
    async fn test_stream_end_fails_pending_watcher() {
        let strategy = ReadinessStrategy {
            native: true,
            native_ssl: false,
            rpc: false,
        };
        let (watcher, receiver) = ReadinessWatcher::new(strategy, IpAddr::V4(Ipv4Addr::LOCALHOST));
        let input: &[u8] = b"INFO starting\n";

        spawn_reader(input, OutputStream::Stdout, Some(watcher), Vec::new())
            .await
            .unwrap();

        assert_eq!(receiver.borrow().status, ReadinessStatus::Failed);
        assert_eq!(receiver.borrow().reason.as_deref(), Some(EXITED_BEFORE_READY));
    }

    #[tokio::test]
    async fn test_lines_split_across_reads_are_joined() {
        let recent = RecentLines::new(RECENT_LINES);
        let reader = tokio_test::io::Builder::new()
            .read(b"INFO  [main] Server.java:159 - Starting lis")
            .read(b"tening\nERROR \xff bad byte\n")
            .read(b"tail without newline")
            .build();

        spawn_reader(reader, OutputStream::Stderr, None, vec![Box::new(recent.clone())])
            .await
            .unwrap();

        assert_eq!(
            recent.snapshot(),
            vec![
                "INFO  [main] Server.java:159 - Starting listening".to_string(),
                "ERROR \u{FFFD} bad byte".to_string(),
                "tail without newline".to_string(),
            ]
        );
    }
}
