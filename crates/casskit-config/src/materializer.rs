//! Working-directory materialization
//!
//! Rewrites the copied distribution's configuration to reflect a
//! [`ProcessConfig`] before launch. The pipeline is a fixed, ordered list of
//! steps, each a `(name, predicate, transform)` triple run by one driver loop.
//! Steps touch only files that exist in this distribution version and may be
//! re-run on the same directory with the same result.
//!
//! | step             | effect                                                       |
//! |------------------|--------------------------------------------------------------|
//! | `resources`      | copy caller files into the working directory                 |
//! | `resolve-ports`  | replace ephemeral ports with concrete free ports (one batch) |
//! | `write-config`   | merge overrides into `conf/cassandra.yaml`                   |
//! | `jvm-options`    | append to / replace the JVM options file                     |
//! | `jvm-compat`     | comment out JVM flags newer runtimes reject                  |
//! | `logging-config` | overwrite `conf/logback.xml`                                 |

use std::fs;
use std::path::{Component, Path, PathBuf};

use casskit_resources::PortAllocator;
use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::process_config::{JvmOptionsMode, ProcessConfig};
use crate::yaml;

/// First line of the block managed in an appended JVM options file
pub const JVM_OPTIONS_MARKER: &str = "### casskit jvm options (managed) ###";

/// Flags removed from (or deprecated into errors by) Java 9+ runtimes that
/// pre-4.0 distributions still ship
pub const INCOMPATIBLE_JVM_FLAGS: &[&str] = &[
    "-XX:+UseParNewGC",
    "-XX:+UseConcMarkSweepGC",
    "-XX:+CMSParallelRemarkEnabled",
    "-XX:CMSInitiatingOccupancyFraction",
    "-XX:+UseCMSInitiatingOccupancyOnly",
    "-XX:CMSWaitDuration",
    "-XX:+CMSParallelInitialMarkEnabled",
    "-XX:+CMSEdenChunksRecordAlways",
    "-XX:+CMSClassUnloadingEnabled",
    "-XX:ThreadPriorityPolicy",
    "-XX:+PrintGCDetails",
    "-XX:+PrintGCDateStamps",
    "-XX:+PrintHeapAtGC",
    "-XX:+PrintTenuringDistribution",
    "-XX:+PrintGCApplicationStoppedTime",
    "-XX:+PrintPromotionFailure",
    "-XX:+UseGCLogFileRotation",
    "-XX:NumberOfGCLogFiles",
    "-XX:GCLogFileSize",
    "-Xloggc",
];

/// Distribution-specific file locations and switches
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Main config file, relative to the working directory
    pub config_file: PathBuf,
    /// JVM options file candidates, first existing one is used
    pub jvm_options_files: Vec<PathBuf>,
    /// Environment script sourced by the launch script
    pub env_script: PathBuf,
    /// Logging configuration file
    pub logging_file: PathBuf,
    /// Neutralize flags the detected Java runtime rejects
    pub apply_jvm_compat: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("conf/cassandra.yaml"),
            jvm_options_files: vec![
                PathBuf::from("conf/jvm-server.options"),
                PathBuf::from("conf/jvm.options"),
            ],
            env_script: PathBuf::from("conf/cassandra-env.sh"),
            logging_file: PathBuf::from("conf/logback.xml"),
            apply_jvm_compat: false,
        }
    }
}

/// Result of a successful materialization
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Configuration with every ephemeral port resolved
    pub config: ProcessConfig,
    /// Merged node configuration (what `cassandra.yaml` now says)
    pub node_config: Value,
    /// Names of the steps that ran
    pub applied: Vec<&'static str>,
}

struct MaterializeContext<'a> {
    root: &'a Path,
    options: &'a MaterializeOptions,
    allocator: &'a PortAllocator,
    config: ProcessConfig,
    node_config: Option<Value>,
}

impl MaterializeContext<'_> {
    fn path(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    fn jvm_options_file(&self) -> Option<PathBuf> {
        self.options
            .jvm_options_files
            .iter()
            .map(|f| self.path(f))
            .find(|p| p.is_file())
    }
}

struct Step {
    name: &'static str,
    applies: fn(&MaterializeContext<'_>) -> bool,
    apply: fn(&mut MaterializeContext<'_>) -> Result<()>,
}

const STEPS: &[Step] = &[
    Step {
        name: "resources",
        applies: |ctx| !ctx.config.resources.is_empty(),
        apply: copy_resources,
    },
    Step {
        name: "resolve-ports",
        applies: |ctx| !ctx.config.ephemeral_ports().is_empty(),
        apply: resolve_ports,
    },
    Step {
        name: "write-config",
        applies: |ctx| ctx.path(&ctx.options.config_file).is_file(),
        apply: write_config,
    },
    Step {
        name: "jvm-options",
        applies: |ctx| !ctx.config.jvm_options_file.is_empty() && ctx.jvm_options_file().is_some(),
        apply: write_jvm_options,
    },
    Step {
        name: "jvm-compat",
        applies: |ctx| ctx.options.apply_jvm_compat,
        apply: neutralize_incompatible_flags,
    },
    Step {
        name: "logging-config",
        applies: |ctx| {
            ctx.config.logging_config.is_some() && ctx.path(&ctx.options.logging_file).is_file()
        },
        apply: write_logging_config,
    },
];

/// Runs the materialization pipeline
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    options: MaterializeOptions,
    allocator: PortAllocator,
}

impl ConfigMaterializer {
    /// Create a materializer for a distribution layout
    pub fn new(options: MaterializeOptions) -> Self {
        Self {
            options,
            allocator: PortAllocator::new(),
        }
    }

    /// Use a custom port allocator
    pub fn with_allocator(mut self, allocator: PortAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Layout and switches in use
    pub fn options(&self) -> &MaterializeOptions {
        &self.options
    }

    /// Rewrite the working directory at `root` for `config`
    ///
    /// Steps run strictly in order; the first failure aborts with
    /// [`ConfigError::Step`] and earlier writes are left in place.
    pub fn materialize(&self, root: &Path, config: &ProcessConfig) -> Result<Materialized> {
        let mut ctx = MaterializeContext {
            root,
            options: &self.options,
            allocator: &self.allocator,
            config: config.clone(),
            node_config: None,
        };

        let mut applied = Vec::new();
        for step in STEPS {
            if !(step.applies)(&ctx) {
                debug!(step = step.name, "Skipping materialization step");
                continue;
            }
            debug!(step = step.name, root = %root.display(), "Applying materialization step");
            (step.apply)(&mut ctx).map_err(|e| ConfigError::Step {
                step: step.name,
                source: Box::new(e),
            })?;
            applied.push(step.name);
        }

        let node_config = match ctx.node_config.take() {
            Some(value) => value,
            None => Value::Mapping(ctx.config.effective_overrides()),
        };

        Ok(Materialized {
            config: ctx.config,
            node_config,
            applied,
        })
    }
}

fn copy_resources(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    for resource in &ctx.config.resources {
        let escapes = resource
            .destination
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ConfigError::Validation(format!(
                "resource destination must stay inside the working directory: {}",
                resource.destination.display()
            )));
        }
        let target = ctx.root.join(&resource.destination);
        copy_recursively(&resource.source, &target)?;
        debug!(
            source = %resource.source.display(),
            target = %target.display(),
            "Copied resource"
        );
    }
    Ok(())
}

fn copy_recursively(source: &Path, target: &Path) -> Result<()> {
    if source.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target)?;
    }
    Ok(())
}

fn resolve_ports(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    let pending = ctx.config.ephemeral_ports();
    let address = ctx.config.bind_address();
    let ports = ctx.allocator.free_ports(address, pending.len())?;

    for (kind, port) in pending.iter().zip(ports) {
        ctx.config.ports.set(*kind, port);
        info!(port = %kind, value = port, "Resolved ephemeral port");
    }
    Ok(())
}

fn write_config(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    let path = ctx.path(&ctx.options.config_file);
    let text = fs::read_to_string(&path)?;

    let mut document: Value = serde_yaml::from_str(&text)?;
    if document.is_null() {
        document = Value::Mapping(Default::default());
    }
    if !document.is_mapping() {
        return Err(ConfigError::Validation(format!(
            "{} is not a YAML mapping",
            path.display()
        )));
    }

    yaml::deep_merge(&mut document, &Value::Mapping(ctx.config.effective_overrides()));
    fs::write(&path, serde_yaml::to_string(&document)?)?;

    debug!(path = %path.display(), "Wrote node configuration");
    ctx.node_config = Some(document);
    Ok(())
}

fn write_jvm_options(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    let Some(path) = ctx.jvm_options_file() else {
        return Ok(());
    };
    let lines = ctx.config.jvm_options_file.join("\n");

    let contents = match ctx.config.jvm_options_mode {
        JvmOptionsMode::Replace => format!("{}\n", lines),
        JvmOptionsMode::Append => {
            let existing = fs::read_to_string(&path)?;
            // Drop a block left by an earlier run so re-running stays idempotent.
            let base = match existing.find(JVM_OPTIONS_MARKER) {
                Some(index) => &existing[..index],
                None => existing.as_str(),
            };
            let separator = if base.is_empty() || base.ends_with('\n') { "" } else { "\n" };
            format!("{}{}{}\n{}\n", base, separator, JVM_OPTIONS_MARKER, lines)
        }
    };

    fs::write(&path, contents)?;
    debug!(path = %path.display(), mode = ?ctx.config.jvm_options_mode, "Wrote JVM options");
    Ok(())
}

fn neutralize_incompatible_flags(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    let mut targets: Vec<(PathBuf, &str)> = ctx
        .options
        .jvm_options_files
        .iter()
        .map(|f| (ctx.path(f), "#"))
        .collect();
    // `:` keeps shell blocks non-empty after their only statement is disabled.
    targets.push((ctx.path(&ctx.options.env_script), ": #"));

    for (path, comment) in targets {
        if !path.is_file() {
            continue;
        }
        let text = fs::read_to_string(&path)?;
        let (rewritten, disabled) = comment_out_flags(&text, comment);
        if disabled > 0 {
            fs::write(&path, rewritten)?;
            info!(path = %path.display(), disabled, "Disabled JVM flags unsupported by this runtime");
        }
    }
    Ok(())
}

/// Comment out every active line mentioning an incompatible flag
fn comment_out_flags(text: &str, comment: &str) -> (String, usize) {
    let mut disabled = 0;
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let active = !trimmed.starts_with('#') && !trimmed.starts_with(": #");
        if active && INCOMPATIBLE_JVM_FLAGS.iter().any(|flag| trimmed.contains(flag)) {
            out.push_str(comment);
            out.push(' ');
            disabled += 1;
        }
        out.push_str(line);
    }
    (out, disabled)
}

fn write_logging_config(ctx: &mut MaterializeContext<'_>) -> Result<()> {
    if let Some(contents) = &ctx.config.logging_config {
        let path = ctx.path(&ctx.options.logging_file);
        fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote logging configuration");
    }
    Ok(())
}
