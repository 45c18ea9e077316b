//! Server: a directory of named databases
//!
//! The server composes a [`Registry`] of database handles, the shared
//! [`WorkQueue`], and directory scanning for one root directory. It owns the
//! two-phase shutdown protocol:
//!
//! ```text
//! Running --close()--> Closing --close-all done--> Draining --grace delay--> Terminated
//! ```
//!
//! 1. `close()` queues a close-all task behind everything already queued and
//!    blocks until it has closed every registered handle and emptied the
//!    registry. There is no timeout: a handle whose `close()` never returns
//!    blocks the caller forever. Called from a task already running on the
//!    queue, `close()` runs close-all inline instead of waiting on itself.
//!    Lookups made while close-all runs wait for it, then register fresh
//!    handles.
//! 2. It then schedules one task, `grace_period` later on the same queue,
//!    that shuts the queue down. Work collaborators enqueue around shutdown
//!    still gets to run. The termination task cannot be cancelled.
//!
//! Failures while closing individual handles are logged and collected in the
//! returned [`CloseReport`]; they never abort the close or surface as errors.

pub mod config;
mod registry;

pub use config::{
    HttpClientConfig, NamePolicyKind, ServerConfig, CONFIG_FILE_NAME, DEFAULT_GRACE_PERIOD_SECS,
};
pub use registry::Registry;

use crate::background::{panic_message, WorkQueue};
use crate::clock::{Clock, SystemClock};
use crate::database::{DatabaseHandle, FileDatabase};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{NamePolicy, NameResolver, StrataError, StrataResult};
use tracing::{debug, error, info, warn};

// ============================================================================
// Shutdown State
// ============================================================================

/// Where the server is in its shutdown protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting work
    Running,
    /// Close-all task queued or running
    Closing,
    /// All handles closed; queue termination pending
    Draining,
    /// Work queue has terminated
    Terminated,
}

/// A handle that failed to close cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Logical name of the database
    pub name: String,
    /// Error or panic message
    pub error: String,
}

/// Outcome of [`Server::close`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Databases closed without error, sorted by name
    pub closed: Vec<String>,
    /// Databases whose close failed; they are unregistered anyway
    pub failures: Vec<CloseFailure>,
}

impl CloseReport {
    /// True if every handle closed cleanly
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of handles the close-all task visited
    pub fn total(&self) -> usize {
        self.closed.len() + self.failures.len()
    }
}

fn close_all<D: DatabaseHandle>(registry: &Registry<D>) -> CloseReport {
    let mut report = CloseReport::default();
    registry.close_all_with(|name, db| {
        let error = match panic::catch_unwind(AssertUnwindSafe(|| db.close())) {
            Ok(Ok(())) => {
                report.closed.push(name.to_string());
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(target: "strata::server", name = %name, error = %error, "Exception while closing database");
        report.failures.push(CloseFailure {
            name: name.to_string(),
            error,
        });
    });
    report
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Server`]
///
/// ```ignore
/// use strata_engine::{ManualClock, Server};
///
/// // Defaults, reading <root>/server.toml if present
/// let server = Server::open("/data/dbs")?;
///
/// // Explicit config, virtual time, custom handle type
/// let server = Server::builder()
///     .path("/data/dbs")
///     .config(config)
///     .clock(Arc::new(ManualClock::new()))
///     .open_with::<MyHandle>()?;
/// ```
#[derive(Default)]
pub struct ServerBuilder {
    path: Option<PathBuf>,
    config: Option<ServerConfig>,
    clock: Option<Arc<dyn Clock>>,
    name_policy: Option<Arc<dyn NamePolicy>>,
}

impl ServerBuilder {
    /// Create new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directory (required)
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use this config instead of `<root>/server.toml`
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Drive the work queue from `clock`
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the config's name policy
    pub fn name_policy(mut self, policy: Arc<dyn NamePolicy>) -> Self {
        self.name_policy = Some(policy);
        self
    }

    /// Open a server of [`FileDatabase`] handles
    pub fn open(self) -> StrataResult<Server> {
        self.open_with::<FileDatabase>()
    }

    /// Open a server of `D` handles
    ///
    /// # Errors
    ///
    /// - No path was configured
    /// - The root exists but is not a directory, or cannot be created
    /// - `<root>/server.toml` exists but is malformed
    /// - The worker thread cannot be spawned
    pub fn open_with<D: DatabaseHandle>(self) -> StrataResult<Server<D>> {
        let root = self
            .path
            .ok_or_else(|| StrataError::config("ServerBuilder::open() requires a path"))?;

        if root.exists() && !root.is_dir() {
            return Err(StrataError::NotADirectory(root));
        }
        std::fs::create_dir_all(&root)?;

        let config = match self.config {
            Some(config) => config,
            None => ServerConfig::load_or_default(&root)?,
        };
        let policy = self
            .name_policy
            .unwrap_or_else(|| config.name_policy.policy());
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        let queue = WorkQueue::with_clock(config.worker_name.clone(), clock)?;
        let registry = Registry::new(NameResolver::with_policy(root.clone(), policy));

        info!(target: "strata::server", root = ?root, "Server opened");
        Ok(Server {
            root,
            registry: Arc::new(registry),
            queue,
            default_http_client: RwLock::new(config.http_client.clone()),
            config,
            state: Mutex::new(ServerState::Running),
            termination_scheduled: AtomicBool::new(false),
        })
    }
}

// ============================================================================
// Server
// ============================================================================

/// Manages a directory containing databases
pub struct Server<D: DatabaseHandle = FileDatabase> {
    root: PathBuf,
    registry: Arc<Registry<D>>,
    queue: WorkQueue,
    config: ServerConfig,
    default_http_client: RwLock<Option<HttpClientConfig>>,
    state: Mutex<ServerState>,
    termination_scheduled: AtomicBool,
}

impl Server<FileDatabase> {
    /// Open a server at `root`, creating the directory if needed
    ///
    /// Reads `<root>/server.toml` if it exists.
    pub fn open<P: Into<PathBuf>>(root: P) -> StrataResult<Self> {
        ServerBuilder::new().path(root).open()
    }

    /// Open a server at `root` with an explicit configuration
    pub fn open_with_config<P: Into<PathBuf>>(root: P, config: ServerConfig) -> StrataResult<Self> {
        ServerBuilder::new().path(root).config(config).open()
    }

    /// Start building a server
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl<D: DatabaseHandle> Server<D> {
    /// Root directory holding the databases
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Path database `name` is stored at, or None if the name is invalid
    pub fn path_for_name(&self, name: &str) -> Option<PathBuf> {
        self.registry.path_for_name(name)
    }

    /// Look up `name`, registering an unopened handle if needed
    ///
    /// See [`Registry::get_or_create`].
    pub fn get_or_create(&self, name: &str, create_if_missing: bool) -> Option<Arc<D>> {
        self.registry.get_or_create(name, create_if_missing)
    }

    /// Look up `name`, creating it if missing
    pub fn database(&self, name: &str) -> Option<Arc<D>> {
        self.get_or_create(name, true)
    }

    /// Look up an existing database and open it
    ///
    /// See [`Registry::get_existing`].
    pub fn get_existing(&self, name: &str) -> Option<Arc<D>> {
        self.registry.get_existing(name)
    }

    /// Delete a registered database
    ///
    /// See [`Registry::delete`].
    pub fn delete(&self, name: &str) -> bool {
        self.registry.delete(name)
    }

    /// Names of all databases stored under the root, sorted
    pub fn list_persisted_names(&self) -> StrataResult<Vec<String>> {
        self.registry.list_persisted_names()
    }

    /// Every registered handle, unordered
    pub fn list_open_handles(&self) -> Vec<Arc<D>> {
        self.registry.list_open_handles()
    }

    /// The shared work queue, for collaborators that must serialize with
    /// registry operations
    pub fn work_queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Default network client settings passed to collaborators
    pub fn default_http_client(&self) -> Option<HttpClientConfig> {
        self.default_http_client.read().clone()
    }

    /// Replace the default network client settings
    pub fn set_default_http_client(&self, config: Option<HttpClientConfig>) {
        *self.default_http_client.write() = config;
    }

    /// Current shutdown state
    pub fn state(&self) -> ServerState {
        let state = *self.state.lock();
        if state == ServerState::Draining && self.queue.is_terminated() {
            ServerState::Terminated
        } else {
            state
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close every registered database and schedule queue shutdown
    ///
    /// Blocks until the close-all task has run on the work queue. Always
    /// succeeds from the caller's point of view; per-handle failures are in
    /// the report. Calling again closes anything registered since, without
    /// scheduling a second termination.
    ///
    /// From a task on the work queue itself, close-all runs inline.
    pub fn close(&self) -> CloseReport {
        {
            let mut state = self.state.lock();
            if *state == ServerState::Running {
                *state = ServerState::Closing;
            }
        }
        info!(target: "strata::server", root = ?self.root, "Closing server");

        let report = if self.queue.is_worker_thread() {
            close_all(&self.registry)
        } else {
            self.close_on_queue()
        };

        self.schedule_termination();

        {
            let mut state = self.state.lock();
            if *state == ServerState::Closing {
                *state = ServerState::Draining;
            }
        }
        info!(
            target: "strata::server",
            closed = report.closed.len(),
            failed = report.failures.len(),
            "Server closed"
        );
        report
    }

    fn close_on_queue(&self) -> CloseReport {
        let registry = Arc::clone(&self.registry);
        match self.queue.submit(move || close_all(&registry)) {
            Ok(task) => match task.wait() {
                Ok(report) => report,
                Err(e) => {
                    error!(target: "strata::server", error = %e, "Exception while closing");
                    CloseReport::default()
                }
            },
            Err(e) => {
                debug!(target: "strata::server", error = %e, "Work queue gone; closing on caller thread");
                close_all(&self.registry)
            }
        }
    }

    fn schedule_termination(&self) {
        if self.termination_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let grace = self.config.grace_period();
        let queue = self.queue.clone();
        let scheduled = self.queue.schedule(grace, move || {
            info!(target: "strata::server", "Shutting down work queue");
            queue.shutdown();
        });
        match scheduled {
            // Dropping the handle leaves the task scheduled; it is never cancelled
            Ok(_task) => debug!(target: "strata::server", grace_secs = grace.as_secs(), "Queue termination scheduled"),
            Err(e) => debug!(target: "strata::server", error = %e, "Queue already shut down"),
        }
    }
}

impl<D: DatabaseHandle> Drop for Server<D> {
    fn drop(&mut self) {
        // Never closed: let the worker finish its backlog and exit
        if *self.state.lock() == ServerState::Running {
            self.queue.shutdown();
        }
    }
}

impl<D: DatabaseHandle> std::fmt::Debug for Server<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("root", &self.root)
            .field("state", &self.state())
            .field("databases", &self.registry.len())
            .finish()
    }
}
