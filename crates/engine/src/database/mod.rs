//! Database handles
//!
//! The server does not know how an individual database stores its data. It
//! only needs the lifecycle contract in [`DatabaseHandle`]:
//!
//! ```text
//! at_path() --open()--> Open --close()--> Closed
//!     |                   |
//!     +-----delete()------+-----> Deleted
//! ```
//!
//! A handle is constructed without touching storage, gets its logical name
//! assigned, and is registered before anything is opened. Closed and deleted
//! handles are permanently invalid: `open()` fails with
//! [`StrataError::DatabaseClosed`](strata_core::StrataError::DatabaseClosed) or
//! [`StrataError::DatabaseDeleted`](strata_core::StrataError::DatabaseDeleted).
//!
//! [`FileDatabase`] is the bundled single-file implementation.

mod file;

pub use file::{FileDatabase, FORMAT_VERSION, MAGIC};

use std::path::{Path, PathBuf};
use strata_core::StrataResult;

/// Lifecycle position of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Constructed, storage not contacted yet
    Unopened,
    /// Storage opened (and created if it was missing)
    Open,
    /// Closed; the handle can no longer be used
    Closed,
    /// Backing storage removed; the handle can no longer be used
    Deleted,
}

/// Contract the server requires of one persisted database
///
/// Implementations must be usable from several threads: the server keeps
/// handles in `Arc`s and closes them from the work queue's worker.
pub trait DatabaseHandle: Send + Sync + 'static {
    /// Build an unopened handle for the storage at `path`.
    ///
    /// Must not create or modify anything on disk.
    fn at_path(path: PathBuf) -> Self
    where
        Self: Sized;

    /// Assign the logical name. Called once, before registration.
    fn set_name(&mut self, name: &str);

    /// Logical name (empty until assigned)
    fn name(&self) -> &str;

    /// Storage location
    fn path(&self) -> &Path;

    /// Whether backing storage exists on disk
    fn exists(&self) -> bool;

    /// Open storage, creating it if absent. Idempotent while open.
    fn open(&self) -> StrataResult<()>;

    /// Release storage; the handle becomes invalid.
    fn close(&self) -> StrataResult<()>;

    /// Close if needed and remove backing storage; the handle becomes invalid.
    fn delete(&self) -> StrataResult<()>;

    /// Current lifecycle position
    fn status(&self) -> HandleStatus;

    /// True while open
    fn is_open(&self) -> bool {
        self.status() == HandleStatus::Open
    }
}
