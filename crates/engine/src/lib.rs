//! Database server engine
//!
//! This crate manages a directory of named databases:
//! - Server: root directory, name registry and the shutdown protocol
//! - Database handles: lifecycle contract plus the single-file implementation
//! - Work queue: one worker thread that runs registry work in order
//! - Clock: time source for delayed tasks (system or manual)
//!
//! Name validation and name <-> file mapping live in `strata-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod clock;
pub mod database;
pub mod server;

pub use background::{QueueStats, ScheduledTask, TaskHandle, WorkQueue, DEFAULT_WORKER_NAME};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::{DatabaseHandle, FileDatabase, HandleStatus};
pub use server::{
    CloseFailure, CloseReport, HttpClientConfig, NamePolicyKind, Registry, Server, ServerBuilder,
    ServerConfig, ServerState,
};
