//! Strata server - a directory of named embedded databases
//!
//! A [`Server`] owns one root directory. Every database under it is stored at
//! `<root>/<name with '/' as ':'>.strata` and is looked up by logical name:
//!
//! ```ignore
//! use strata_server::Server;
//!
//! let server = Server::open("/data/dbs")?;
//!
//! // Registered lazily; nothing is written until it is opened
//! let db = server.database("users/alice").unwrap();
//! db.open()?;
//!
//! assert_eq!(server.list_persisted_names()?, vec!["users/alice"]);
//!
//! // Close everything, then stop the work queue after the grace delay
//! let report = server.close();
//! assert!(report.is_clean());
//! ```
//!
//! Registry work and collaborator work share one sequential
//! [`WorkQueue`], reachable through [`Server::work_queue`].

pub use strata_core::{
    file_name_for, name_for_file, validate_name, CouchStyle, DatabaseName, DatabaseNameError,
    NamePolicy, NameResolver, PermittedChars, StrataError, StrataResult, DATABASE_SUFFIX,
    MAX_DATABASE_NAME_LENGTH,
};
pub use strata_engine::{
    CloseFailure, CloseReport, DatabaseHandle, FileDatabase, HandleStatus, HttpClientConfig,
    ManualClock, NamePolicyKind, QueueStats, Registry, ScheduledTask, Server, ServerBuilder,
    ServerConfig, ServerState, SystemClock, TaskHandle, WorkQueue, Clock,
};
