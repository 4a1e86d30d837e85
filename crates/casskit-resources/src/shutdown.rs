//! Process-exit hook registry
//!
//! Hooks are keyed by owner identity so an owner holds at most one hook at a
//! time. The global registry runs every hook when the process receives
//! SIGINT/SIGTERM (Ctrl-C on Windows); tests create their own registry and
//! call [`ShutdownRegistry::run_all`] directly.

use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Hook run at most once during shutdown
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: Lazy<Arc<ShutdownRegistry>> = Lazy::new(|| Arc::new(ShutdownRegistry::new()));

static SIGNAL_HANDLER: OnceCell<()> = OnceCell::new();

/// Exit code used after running hooks on an interrupt (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Ordered set of shutdown hooks keyed by owner
pub struct ShutdownRegistry {
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
}

impl ShutdownRegistry {
    /// Create an empty, uninstalled registry
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Process-wide registry wired to the interrupt handler
    pub fn global() -> Arc<ShutdownRegistry> {
        install_signal_handler();
        Arc::clone(&GLOBAL)
    }

    /// Register `hook` for `owner`, replacing the owner's previous hook
    ///
    /// Returns `true` when an earlier hook was replaced.
    pub fn register(&self, owner: impl Into<String>, hook: ShutdownHook) -> bool {
        let owner = owner.into();
        let mut hooks = self.hooks.lock();
        let replaced = match hooks.iter().position(|(id, _)| *id == owner) {
            Some(index) => {
                drop(hooks.remove(index));
                true
            }
            None => false,
        };
        debug!(owner = %owner, replaced, "Registered shutdown hook");
        hooks.push((owner, hook));
        replaced
    }

    /// Remove the hook owned by `owner` without running it
    pub fn unregister(&self, owner: &str) -> bool {
        let mut hooks = self.hooks.lock();
        match hooks.iter().position(|(id, _)| id == owner) {
            Some(index) => {
                drop(hooks.remove(index));
                debug!(owner = %owner, "Unregistered shutdown hook");
                true
            }
            None => false,
        }
    }

    /// Whether `owner` currently has a hook
    pub fn contains(&self, owner: &str) -> bool {
        self.hooks.lock().iter().any(|(id, _)| id == owner)
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hooks are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and drain every hook, most recent first
    ///
    /// A panicking hook is logged and does not prevent the others from running.
    pub fn run_all(&self) -> usize {
        let hooks: Vec<_> = std::mem::take(&mut *self.hooks.lock());
        let count = hooks.len();
        for (owner, hook) in hooks.into_iter().rev() {
            debug!(owner = %owner, "Running shutdown hook");
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)).is_err() {
                warn!(owner = %owner, "Shutdown hook panicked");
            }
        }
        count
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn install_signal_handler() {
    SIGNAL_HANDLER.get_or_init(|| {
        let registry = Arc::clone(&GLOBAL);
        let installed = ctrlc::set_handler(move || {
            let ran = registry.run_all();
            debug!(hooks = ran, "Ran shutdown hooks on interrupt");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
        if let Err(e) = installed {
            // Another handler owns the signal; hooks then only run via explicit calls.
            warn!(error = %e, "Failed to install interrupt handler");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_replaces_previous_hook() {
        let registry = ShutdownRegistry::new();
        assert!(!registry.register("node-a", Box::new(|| {})));
        assert!(registry.register("node-a", Box::new(|| {})));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = ShutdownRegistry::new();
        registry.register("node-a", Box::new(|| {}));
        assert!(registry.unregister("node-a"));
        assert!(!registry.unregister("node-a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_hooks_are_dropped_without_running() {
        let registry = ShutdownRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let hook_runs = Arc::clone(&runs);
        registry.register("node-a", Box::new(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        }));
        let hook_runs = Arc::clone(&runs);
        registry.register("node-a", Box::new(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(Arc::strong_count(&runs), 2);

        registry.unregister("node-a");
        assert_eq!(Arc::strong_count(&runs), 1);
        assert_eq!(registry.run_all(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_all_drains_and_survives_panics() {
        let registry = ShutdownRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        registry.register("a", Box::new(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        registry.register("b", Box::new(|| panic!("boom")));
        let c2 = Arc::clone(&counter);
        registry.register("c", Box::new(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.run_all(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.run_all(), 0);
    }
}
