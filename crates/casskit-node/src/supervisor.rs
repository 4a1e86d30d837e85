//! Node lifecycle state machine
//!
//! ```text
//! Created ──start──▶ Starting ──ready──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                        │                                    ▲
//!                        └──fatal line / timeout──▶ Failed ───┘
//! ```
//!
//! Lifecycle transitions are serialized by an async mutex, so at most one
//! `start()` or `stop()` runs per supervisor. Accessors read a separate
//! snapshot and never wait on a transition in progress.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use casskit_config::{yaml, ConfigMaterializer, HarnessConfig, Materialized, PortKind, ProcessConfig};
use casskit_process::ManagedChild;
use casskit_resources::{LockOptions, PortAllocator, ShutdownRegistry};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blocking::BlockingTasks;
use crate::distribution::Distribution;
use crate::error::{FailureContext, NodeError, Result};
use crate::java;
use crate::launcher::ProcessLauncher;
use crate::output::{spawn_reader, LogForwarder, OutputStream, RecentLines, RECENT_LINES};
use crate::profile::NodeProfile;
use crate::readiness::{ReadinessState, ReadinessStatus, ReadinessStrategy, ReadinessWatcher};
use crate::settings::{Settings, DEFAULT_JMX_PORT, DEFAULT_SSL_STORAGE_PORT, DEFAULT_STORAGE_PORT};
use crate::working_dir::{CacheOptions, WorkingDirectory};

/// Lifecycle state of a supervised node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Starting,
    Running,
    Failed,
    Stopping,
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Created => "created",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Failed => "failed",
            NodeState::Stopping => "stopping",
            NodeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Timeouts and directories for one supervisor
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Deadline for working directory, materialization, launch and readiness
    pub startup_timeout: Duration,
    /// Grace period before a forced kill
    pub stop_timeout: Duration,
    /// Parent of the node's working directory
    pub working_root: PathBuf,
    /// Shared cache for archive distributions
    pub cache_dir: PathBuf,
    /// Remove the working directory on stop
    pub delete_working_directory: bool,
    /// Java installation when the process config names none
    pub java_home: Option<PathBuf>,
    /// Retry policy for the extraction cache lock
    pub lock: LockOptions,
}

impl SupervisorOptions {
    pub fn from_harness(harness: &HarnessConfig) -> Self {
        Self {
            startup_timeout: harness.startup_timeout(),
            stop_timeout: harness.stop_timeout(),
            working_root: harness.working_root.clone(),
            cache_dir: harness.cache_dir.clone(),
            delete_working_directory: !harness.keep_working_directory,
            java_home: harness.java_home.clone(),
            lock: LockOptions::default(),
        }
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_harness(&HarnessConfig::default())
    }
}

/// Builder for [`NodeSupervisor`]
pub struct NodeSupervisorBuilder {
    distribution: Distribution,
    config: ProcessConfig,
    options: SupervisorOptions,
    registry: Option<Arc<ShutdownRegistry>>,
    allocator: PortAllocator,
}

impl NodeSupervisorBuilder {
    pub fn config(mut self, config: ProcessConfig) -> Self {
        self.config = config;
        self
    }

    /// Take timeouts and directories from harness settings
    pub fn harness(mut self, harness: &HarnessConfig) -> Self {
        self.options = SupervisorOptions::from_harness(harness);
        self
    }

    pub fn options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.options.startup_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.stop_timeout = timeout;
        self
    }

    pub fn working_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.options.working_root = root.into();
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.cache_dir = dir.into();
        self
    }

    pub fn delete_working_directory(mut self, delete: bool) -> Self {
        self.options.delete_working_directory = delete;
        self
    }

    /// Registry for the node's exit hook; defaults to the global one
    pub fn shutdown_registry(mut self, registry: Arc<ShutdownRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn port_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn build(self) -> NodeSupervisor {
        NodeSupervisor {
            id: Uuid::new_v4(),
            distribution: self.distribution,
            config: self.config,
            options: self.options,
            registry: self.registry.unwrap_or_else(ShutdownRegistry::global),
            allocator: self.allocator,
            launcher: ProcessLauncher::new(),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            snapshot: parking_lot::Mutex::new(Snapshot {
                state: NodeState::Created,
                settings: None,
                pid: None,
                working_dir: None,
            }),
        }
    }
}

/// Cheap-to-read view of the supervisor
struct Snapshot {
    state: NodeState,
    settings: Option<Settings>,
    pid: Option<u32>,
    working_dir: Option<PathBuf>,
}

/// Resources owned during one start/stop cycle
#[derive(Default)]
struct Lifecycle {
    child: Option<ManagedChild>,
    readers: Vec<JoinHandle<()>>,
    tasks: BlockingTasks,
    working_dir: Option<WorkingDirectory>,
    requested_ports: Vec<(PortKind, u16)>,
}

/// Starts, supervises and stops one disposable node
pub struct NodeSupervisor {
    id: Uuid,
    distribution: Distribution,
    config: ProcessConfig,
    options: SupervisorOptions,
    registry: Arc<ShutdownRegistry>,
    allocator: PortAllocator,
    launcher: ProcessLauncher,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    snapshot: parking_lot::Mutex<Snapshot>,
}

impl NodeSupervisor {
    /// Supervisor with default harness settings
    pub fn new(distribution: Distribution, config: ProcessConfig) -> Self {
        Self::builder(distribution).config(config).build()
    }

    pub fn builder(distribution: Distribution) -> NodeSupervisorBuilder {
        NodeSupervisorBuilder {
            distribution,
            config: ProcessConfig::default(),
            options: SupervisorOptions::default(),
            registry: None,
            allocator: PortAllocator::new(),
        }
    }

    /// Instance identity, also the working directory name
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn state(&self) -> NodeState {
        self.snapshot.lock().state
    }

    /// Connection settings while running
    pub fn settings(&self) -> Option<Settings> {
        self.snapshot.lock().settings.clone()
    }

    /// Pid of the node process, when launched and known
    pub fn pid(&self) -> Option<u32> {
        self.snapshot.lock().pid
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    /// Current (or retained) working directory
    pub fn working_directory(&self) -> Option<PathBuf> {
        self.snapshot.lock().working_dir.clone()
    }

    fn hook_owner(&self) -> String {
        format!("casskit-node:{}", self.id)
    }

    fn update(&self, apply: impl FnOnce(&mut Snapshot)) {
        apply(&mut self.snapshot.lock());
    }

    /// Start the node and wait until it is ready
    ///
    /// A no-op when already running. On failure or timeout anything launched
    /// is stopped before the error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            NodeState::Running => {
                debug!(node = %self.id, "Node already running");
                return Ok(());
            }
            state @ (NodeState::Starting | NodeState::Stopping) => {
                return Err(NodeError::InvalidState(format!("cannot start a {} node", state)));
            }
            NodeState::Created | NodeState::Failed | NodeState::Stopped => {}
        }

        info!(
            node = %self.id,
            version = %self.distribution.version(),
            source = %self.distribution.path().display(),
            "Starting node"
        );
        self.update(|s| {
            s.state = NodeState::Starting;
            s.settings = None;
            s.pid = None;
        });

        lifecycle.tasks = BlockingTasks::new();
        let recent = RecentLines::new(RECENT_LINES);
        let timeout = self.options.startup_timeout;
        let outcome = tokio::time::timeout(timeout, self.boot(&mut lifecycle, &recent)).await;

        let error = match outcome {
            Ok(Ok(settings)) => {
                info!(
                    node = %self.id,
                    address = %settings.address,
                    client_port = ?settings.client_port(),
                    "Node running"
                );
                debug!(node = %self.id, settings = ?settings, "Published node settings");
                self.update(|s| {
                    s.state = NodeState::Running;
                    s.settings = Some(settings);
                });
                return Ok(());
            }
            Ok(Err(error)) => error,
            Err(_) => NodeError::StartupTimeout {
                timeout,
                context: failure_context(&lifecycle, &recent),
            },
        };

        warn!(node = %self.id, error = %error, "Node failed to start, cleaning up");
        if let Err(cleanup) = self.teardown(&mut lifecycle).await {
            warn!(node = %self.id, error = %cleanup, "Cleanup after failed start reported an error");
        }
        self.update(|s| {
            s.state = NodeState::Failed;
            s.pid = None;
        });
        Err(error)
    }

    async fn boot(&self, lifecycle: &mut Lifecycle, recent: &RecentLines) -> Result<Settings> {
        let tasks = lifecycle.tasks.clone();
        let working_dir =
            WorkingDirectory::create(&self.options.working_root, &self.id.to_string())?;
        let root = working_dir.path().to_path_buf();
        self.update(|s| s.working_dir = Some(root.clone()));
        let cache = CacheOptions {
            cache_dir: self.options.cache_dir.clone(),
            lock: self.options.lock.clone(),
        };
        let working_dir = lifecycle.working_dir.insert(working_dir);
        working_dir
            .populate(&self.distribution, &cache, Arc::clone(&self.registry), &tasks)
            .await?;

        let java_home = self
            .config
            .java_home
            .clone()
            .or_else(|| self.options.java_home.clone());
        let java_major = java::detect_major_version(java_home.as_deref()).await;
        let profile = NodeProfile::new(
            self.distribution.version().clone(),
            java_major,
            self.distribution.platform(),
        );

        let mut config = self.config.clone();
        config.java_home = java_home;
        let materializer = ConfigMaterializer::new(profile.materialize_options())
            .with_allocator(self.allocator.clone());
        let materialize_root = root.clone();
        let materialized = tasks
            .run("materializing configuration", move |_| {
                materializer
                    .materialize(&materialize_root, &config)
                    .map_err(NodeError::from)
            })
            .await?;

        lifecycle.requested_ports = materialized.config.requested_ports();
        let strategy = ReadinessStrategy::resolve(&profile, &materialized.node_config);
        let address = materialized.config.bind_address();

        let mut child = self
            .launcher
            .launch(&root, &materialized.config, profile.platform())?;
        let pid = child.pid();
        self.update(|s| s.pid = pid);
        if let Some(pid) = pid {
            let node = self.id;
            self.registry.register(
                self.hook_owner(),
                Box::new(move || {
                    if let Err(e) = casskit_process::kill_tree(pid) {
                        warn!(node = %node, pid, error = %e, "Failed to kill node at shutdown");
                    }
                }),
            );
        }
        let stdout = child.stdout();
        let stderr = child.stderr();
        lifecycle.child = Some(child);

        let node = self.id.to_string();
        let (watcher, mut readiness) = ReadinessWatcher::new(strategy, address);
        let stdout = stdout.ok_or_else(|| {
            NodeError::io("capturing node output", io::Error::other("stdout is not piped"))
        })?;
        lifecycle.readers.push(spawn_reader(
            stdout,
            OutputStream::Stdout,
            Some(watcher),
            vec![
                Box::new(recent.clone()),
                Box::new(LogForwarder::new(node.clone(), OutputStream::Stdout)),
            ],
        ));
        if let Some(stderr) = stderr {
            lifecycle.readers.push(spawn_reader(
                stderr,
                OutputStream::Stderr,
                None,
                vec![
                    Box::new(recent.clone()),
                    Box::new(LogForwarder::new(node, OutputStream::Stderr)),
                ],
            ));
        }

        let state = readiness
            .wait_for(|state| state.status.is_terminal())
            .await
            .map(|state| state.clone())
            .map_err(|_| {
                NodeError::io("waiting for readiness", io::Error::other("output reader stopped"))
            })?;

        match state.status {
            ReadinessStatus::Ready => Ok(self.settings_for(&state, &materialized)),
            _ => Err(NodeError::StartupFailed {
                line: state.reason.unwrap_or_default(),
                context: failure_context(lifecycle, recent),
            }),
        }
    }

    fn settings_for(&self, state: &ReadinessState, materialized: &Materialized) -> Settings {
        let config = &materialized.config;
        let node_config = &materialized.node_config;
        let port = |kind: PortKind, default: u16| {
            config
                .port_value(kind)
                .or_else(|| {
                    kind.config_key()
                        .and_then(|key| node_config.get(key))
                        .and_then(yaml::as_port)
                })
                .filter(|port| *port != 0)
                .unwrap_or(default)
        };

        Settings {
            address: state.address.unwrap_or_else(|| config.bind_address()),
            native_port: state.native_port,
            ssl_port: state.ssl_port,
            rpc_port: state.rpc_port,
            storage_port: port(PortKind::Storage, DEFAULT_STORAGE_PORT),
            ssl_storage_port: port(PortKind::SslStorage, DEFAULT_SSL_STORAGE_PORT),
            jmx_port: port(PortKind::Jmx, DEFAULT_JMX_PORT),
            version: self.distribution.version().clone(),
        }
    }

    /// Stop the node and release its resources
    ///
    /// A no-op before the first start and after a completed stop. Resources
    /// are released even when stopping the process fails; the failure is
    /// returned afterwards.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            NodeState::Created | NodeState::Stopped => {
                debug!(node = %self.id, state = %self.state(), "Nothing to stop");
                return Ok(());
            }
            _ => {}
        }

        info!(node = %self.id, pid = ?self.pid(), "Stopping node");
        self.update(|s| s.state = NodeState::Stopping);
        let outcome = self.teardown(&mut lifecycle).await;
        self.update(|s| {
            s.state = NodeState::Stopped;
            s.settings = None;
            s.pid = None;
        });

        match &outcome {
            Ok(()) => info!(node = %self.id, "Node stopped"),
            Err(e) => warn!(node = %self.id, error = %e, "Node stop reported an error"),
        }
        outcome
    }

    /// Stop the process, then release readers, the exit hook and the directory
    async fn teardown(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        // Blocking work of an abandoned start may still be writing into the
        // working directory.
        lifecycle.tasks.cancel_and_wait().await;

        let mut outcome = Ok(());
        if let Some(mut child) = lifecycle.child.take() {
            if let Err(e) = child.shutdown(self.options.stop_timeout).await {
                outcome = Err(NodeError::StopFailed(e));
            }
        }

        for reader in lifecycle.readers.drain(..) {
            reader.abort();
        }
        self.registry.unregister(&self.hook_owner());
        lifecycle.requested_ports.clear();

        if let Some(working_dir) = lifecycle.working_dir.take() {
            if self.options.delete_working_directory {
                match working_dir.delete() {
                    Ok(()) => self.update(|s| s.working_dir = None),
                    Err(e) if outcome.is_ok() => outcome = Err(e),
                    Err(e) => {
                        warn!(node = %self.id, error = %e, "Failed to delete working directory")
                    }
                }
            } else {
                debug!(
                    node = %self.id,
                    path = %working_dir.path().display(),
                    "Keeping working directory"
                );
            }
        }
        outcome
    }
}

fn failure_context(lifecycle: &Lifecycle, recent: &RecentLines) -> FailureContext {
    FailureContext {
        pid: lifecycle.child.as_ref().and_then(ManagedChild::pid),
        requested_ports: lifecycle.requested_ports.clone(),
        recent_output: recent.snapshot(),
    }
}

impl Drop for NodeSupervisor {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        lifecycle.tasks.cancel();
        for reader in lifecycle.readers.drain(..) {
            reader.abort();
        }
        if let Some(mut child) = lifecycle.child.take() {
            if let (true, Some(pid)) = (child.is_running(), child.pid()) {
                warn!(node = %self.id, pid, "Node dropped while running, killing process tree");
                if let Err(e) = casskit_process::kill_tree(pid) {
                    warn!(node = %self.id, pid, error = %e, "Failed to kill node on drop");
                }
            }
        }
        self.registry.unregister(&self.hook_owner());
    }
}
