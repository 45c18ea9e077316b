//! Integration tests for the server lifecycle
//!
//! These tests drive a server through its public surface:
//! - Lazy registration and name <-> path mapping
//! - Open/close/delete of persisted databases
//! - Ordering on the shared work queue
//! - The two-phase shutdown (close-all, then queue termination after the
//!   grace delay) under a manual clock

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use strata_core::{StrataError, StrataResult};
use strata_engine::{
    DatabaseHandle, HandleStatus, ManualClock, Server, ServerConfig, ServerState,
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn manual_server(root: &Path) -> (Server, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let server = Server::builder()
        .path(root)
        .clock(clock.clone())
        .open()
        .unwrap();
    (server, clock)
}

// ============================================================================
// Registry
// ============================================================================

#[test]
fn test_empty_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("dbs");
    let (server, _clock) = manual_server(&root);

    assert!(root.is_dir());
    assert!(server.list_persisted_names().unwrap().is_empty());
    assert!(server.list_open_handles().is_empty());
}

#[test]
fn test_slash_name_round_trip() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());

    let db = server.database("a/b").unwrap();
    assert_eq!(db.name(), "a/b");
    assert_eq!(db.path(), dir.path().join("a:b.strata"));
    assert_eq!(server.path_for_name("a/b"), Some(dir.path().join("a:b.strata")));

    db.open().unwrap();
    assert_eq!(server.list_persisted_names().unwrap(), vec!["a/b".to_string()]);
}

#[test]
fn test_lookup_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());

    let first = server.database("notes").unwrap();
    let second = server.get_or_create("notes", false).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(server.list_open_handles().len(), 1);
}

#[test]
fn test_invalid_names_rejected() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());

    for name in ["Bad Name!", "", "UPPER", "a:b", "dots.not.allowed"] {
        assert!(server.database(name).is_none(), "{:?} accepted", name);
        assert!(server.path_for_name(name).is_none());
    }
    assert!(server.list_open_handles().is_empty());
}

#[test]
fn test_get_existing_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let (server, _clock) = manual_server(dir.path());
        server.database("kept").unwrap().open().unwrap();
        assert!(server.close().is_clean());
    }

    let (server, _clock) = manual_server(dir.path());
    assert!(server.get_existing("missing").is_none());
    let db = server.get_existing("kept").unwrap();
    assert!(db.is_open());
}

#[test]
fn test_get_existing_on_corrupt_file_is_none() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.strata"), b"garbage").unwrap();
    let (server, _clock) = manual_server(dir.path());

    assert_eq!(server.list_persisted_names().unwrap(), vec!["broken".to_string()]);
    assert!(server.get_existing("broken").is_none());
}

#[test]
fn test_delete_unknown_name() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("stranger.strata"), b"").unwrap();
    let (server, _clock) = manual_server(dir.path());

    // Never looked up, so not deletable by name
    assert!(!server.delete("stranger"));
    assert!(dir.path().join("stranger.strata").exists());
}

#[test]
fn test_delete_registered() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());

    let db = server.database("gone").unwrap();
    db.open().unwrap();
    assert!(server.delete("gone"));

    assert!(server.list_persisted_names().unwrap().is_empty());
    assert!(server.list_open_handles().is_empty());
    assert_eq!(db.status(), HandleStatus::Deleted);

    // A fresh lookup registers a new handle
    let again = server.database("gone").unwrap();
    assert!(!Arc::ptr_eq(&db, &again));
}

#[test]
fn test_root_is_a_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"").unwrap();

    match Server::open(&file) {
        Err(StrataError::NotADirectory(path)) => assert_eq!(path, file),
        other => panic!("expected NotADirectory, got {:?}", other),
    }
}

#[test]
fn test_config_file_is_read_not_written() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("server.toml");

    {
        let server = Server::open(dir.path()).unwrap();
        assert_eq!(server.config(), &ServerConfig::default());
    }
    assert!(!config_path.exists());

    fs::write(&config_path, "grace_period_secs = 3\nworker_name = \"custom\"\n").unwrap();
    let server = Server::open(dir.path()).unwrap();
    assert_eq!(server.config().grace_period(), Duration::from_secs(3));
    assert_eq!(server.work_queue().name(), "custom");

    // Not a database
    assert!(server.list_persisted_names().unwrap().is_empty());
}

#[test]
fn test_malformed_config_fails_open() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("server.toml"), "grace_period_secs = [").unwrap();
    assert!(matches!(Server::open(dir.path()), Err(StrataError::Config(_))));
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_close_invalidates_handles() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());

    let a = server.database("a").unwrap();
    let b = server.database("b").unwrap();
    a.open().unwrap();
    b.open().unwrap();

    let report = server.close();
    assert_eq!(report.closed, vec!["a".to_string(), "b".to_string()]);
    assert!(report.is_clean());

    assert!(server.list_open_handles().is_empty());
    assert!(matches!(a.open(), Err(StrataError::DatabaseClosed(_))));
    assert!(matches!(b.open(), Err(StrataError::DatabaseClosed(_))));

    // Storage survives the close
    assert_eq!(
        server.list_persisted_names().unwrap(),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[test]
fn test_queue_terminates_after_grace_delay() {
    let dir = TempDir::new().unwrap();
    let (server, clock) = manual_server(dir.path());
    server.database("x").unwrap().open().unwrap();

    server.close();
    assert_eq!(server.state(), ServerState::Draining);
    assert!(!server.work_queue().is_shutdown());

    clock.advance(Duration::from_secs(59));
    server.work_queue().drain();
    assert!(!server.work_queue().is_shutdown());
    assert!(!server.work_queue().await_termination(Duration::from_millis(50)));

    clock.advance(Duration::from_secs(1));
    assert!(server.work_queue().await_termination(WAIT));
    assert_eq!(server.state(), ServerState::Terminated);
    assert!(matches!(
        server.work_queue().execute(|| {}),
        Err(StrataError::QueueShutDown)
    ));
}

#[test]
fn test_collaborator_work_is_ordered_around_close() {
    let dir = TempDir::new().unwrap();
    let (server, clock) = manual_server(dir.path());
    let db = server.database("shared").unwrap();
    db.open().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));

    // Queued before close: must see the database still open
    {
        let log = Arc::clone(&log);
        let db = Arc::clone(&db);
        server
            .work_queue()
            .execute(move || log.lock().push(format!("before:{}", db.is_open())))
            .unwrap();
    }

    server.close();

    // Queued during the grace delay: still runs, after the close
    let handle = {
        let log = Arc::clone(&log);
        let db = Arc::clone(&db);
        server
            .work_queue()
            .submit(move || log.lock().push(format!("after:{}", db.is_open())))
            .unwrap()
    };
    handle.wait().unwrap();

    // Delayed collaborator work due inside the grace delay
    {
        let log = Arc::clone(&log);
        server
            .work_queue()
            .schedule(Duration::from_secs(30), move || log.lock().push("delayed".to_string()))
            .unwrap();
    }

    clock.advance(Duration::from_secs(60));
    assert!(server.work_queue().await_termination(WAIT));

    assert_eq!(
        *log.lock(),
        vec![
            "before:true".to_string(),
            "after:false".to_string(),
            "delayed".to_string(),
        ]
    );
}

#[test]
fn test_second_close_does_not_reschedule() {
    let dir = TempDir::new().unwrap();
    let (server, clock) = manual_server(dir.path());
    server.database("first").unwrap();

    let report = server.close();
    assert_eq!(report.total(), 1);

    // Registered after the first close
    server.database("second").unwrap();
    clock.advance(Duration::from_secs(30));
    let report = server.close();
    assert_eq!(report.closed, vec!["second".to_string()]);

    // Termination is still tied to the first close
    clock.advance(Duration::from_secs(30));
    assert!(server.work_queue().await_termination(WAIT));
    assert_eq!(server.work_queue().stats().pending, 0);
}

#[test]
fn test_close_after_termination_runs_inline() {
    let dir = TempDir::new().unwrap();
    let (server, clock) = manual_server(dir.path());
    server.close();
    clock.advance(Duration::from_secs(60));
    assert!(server.work_queue().await_termination(WAIT));

    let late = server.database("late").unwrap();
    late.open().unwrap();
    let report = server.close();
    assert_eq!(report.closed, vec!["late".to_string()]);
    assert_eq!(late.status(), HandleStatus::Closed);
    assert_eq!(server.state(), ServerState::Terminated);
}

#[test]
fn test_custom_grace_period() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new());
    let config = ServerConfig {
        grace_period_secs: 5,
        ..ServerConfig::default()
    };
    let server = Server::builder()
        .path(dir.path())
        .config(config)
        .clock(clock.clone())
        .open()
        .unwrap();

    server.close();
    clock.advance(Duration::from_secs(5));
    assert!(server.work_queue().await_termination(WAIT));
}

#[test]
fn test_drop_without_close_stops_queue() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());
    let queue = server.work_queue().clone();
    drop(server);

    assert!(queue.is_shutdown());
    assert!(queue.await_termination(WAIT));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_lookups_share_one_handle() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());
    let server = Arc::new(server);
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let server = Arc::clone(&server);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let db = server.database("x").unwrap();
                db.open().unwrap();
                db
            })
        })
        .collect();

    let dbs: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(dbs.iter().all(|db| Arc::ptr_eq(db, &dbs[0])));
    assert_eq!(server.list_open_handles().len(), 1);
}

#[test]
fn test_lookups_racing_close_never_hit_a_held_lock() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());
    let server = Arc::new(server);
    server.database("x").unwrap().open().unwrap();

    let barrier = Arc::new(Barrier::new(5));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let server = Arc::clone(&server);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..50)
                    .map(|_| server.database("x").unwrap().open())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    barrier.wait();
    server.close();

    for worker in workers {
        for result in worker.join().unwrap() {
            // An old handle may already be closed; storage is never locked
            // by a handle that has left the registry
            assert!(
                !matches!(result, Err(StrataError::DatabaseLocked(_))),
                "{:?}",
                result
            );
        }
    }
}

#[test]
fn test_lookup_during_delete_sees_fresh_storage() {
    let dir = TempDir::new().unwrap();
    let (server, _clock) = manual_server(dir.path());
    let server = Arc::new(server);

    for _ in 0..20 {
        server.database("x").unwrap().open().unwrap();
        let deleter = {
            let server = Arc::clone(&server);
            thread::spawn(move || server.delete("x"))
        };
        let fresh = server.database("x").unwrap();
        let opened = fresh.open();
        deleter.join().unwrap();

        // Whichever ran first, a registered open handle keeps its file
        if opened.is_ok() && server.list_open_handles().iter().any(|h| Arc::ptr_eq(h, &fresh)) {
            assert!(fresh.exists());
        }
        server.delete("x");
    }
}

// ============================================================================
// Custom handles
// ============================================================================

/// Handle whose close fails or panics depending on its name
struct FlakyDatabase {
    name: String,
    path: PathBuf,
    status: Mutex<HandleStatus>,
}

impl DatabaseHandle for FlakyDatabase {
    fn at_path(path: PathBuf) -> Self {
        Self {
            name: String::new(),
            path,
            status: Mutex::new(HandleStatus::Unopened),
        }
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn open(&self) -> StrataResult<()> {
        fs::write(&self.path, b"")?;
        *self.status.lock() = HandleStatus::Open;
        Ok(())
    }

    fn close(&self) -> StrataResult<()> {
        if self.name.starts_with("panic") {
            panic!("close of {} blew up", self.name);
        }
        *self.status.lock() = HandleStatus::Closed;
        if self.name.starts_with("fail") {
            return Err(StrataError::corruption("flush failed"));
        }
        Ok(())
    }

    fn delete(&self) -> StrataResult<()> {
        *self.status.lock() = HandleStatus::Deleted;
        fs::remove_file(&self.path)?;
        Ok(())
    }

    fn status(&self) -> HandleStatus {
        *self.status.lock()
    }
}

#[test]
fn test_close_failures_are_collected() {
    let dir = TempDir::new().unwrap();
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let server = Server::builder()
        .path(dir.path())
        .clock(clock.clone())
        .open_with::<FlakyDatabase>()
        .unwrap();

    for name in ["fail-one", "ok", "panic-two"] {
        server.database(name).unwrap().open().unwrap();
    }

    let report = server.close();
    assert_eq!(report.closed, vec!["ok".to_string()]);
    let failed: Vec<_> = report.failures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(failed, vec!["fail-one", "panic-two"]);
    assert!(report.failures[1].error.contains("blew up"));

    // Failures do not stop the protocol
    assert!(server.list_open_handles().is_empty());
    assert_eq!(server.state(), ServerState::Draining);
    clock.advance(Duration::from_secs(60));
    assert!(server.work_queue().await_termination(WAIT));
}

#[test]
fn test_delete_failure_still_unregisters() {
    let dir = TempDir::new().unwrap();
    init_tracing();
    let server = Server::builder()
        .path(dir.path())
        .clock(Arc::new(ManualClock::new()))
        .open_with::<FlakyDatabase>()
        .unwrap();

    // Never opened, so remove_file fails with NotFound
    server.database("never-written").unwrap();
    assert!(server.delete("never-written"));
    assert!(server.list_open_handles().is_empty());
}
