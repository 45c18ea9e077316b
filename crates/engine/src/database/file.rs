//! Single-file database handle
//!
//! Storage is one file beginning with a 9-byte header:
//!
//! ```text
//! +----------+---------+
//! | STRATADB | version |
//! | 8 bytes  | 1 byte  |
//! +----------+---------+
//! ```
//!
//! The contents after the header belong to the storage engine and are not
//! interpreted here. While open, the handle holds an exclusive `fs2` lock on
//! the file so a second handle (in this or another process) cannot open it.

use super::{DatabaseHandle, HandleStatus};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use strata_core::{StrataError, StrataResult};
use tracing::{debug, info};

/// Magic bytes at the start of every database file
pub const MAGIC: &[u8; 8] = b"STRATADB";

/// Current on-disk format version
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: u64 = MAGIC.len() as u64 + 1;

enum HandleState {
    Unopened,
    /// Holds the locked file; dropping it releases the lock
    Open(File),
    Closed,
    Deleted,
}

impl HandleState {
    fn status(&self) -> HandleStatus {
        match self {
            HandleState::Unopened => HandleStatus::Unopened,
            HandleState::Open(_) => HandleStatus::Open,
            HandleState::Closed => HandleStatus::Closed,
            HandleState::Deleted => HandleStatus::Deleted,
        }
    }
}

/// Database stored as a single file at its derived path
pub struct FileDatabase {
    name: String,
    path: PathBuf,
    state: Mutex<HandleState>,
}

impl FileDatabase {
    fn open_file(&self) -> StrataResult<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?;
        FileExt::try_lock_exclusive(&file)
            .map_err(|_| StrataError::DatabaseLocked(self.path.clone()))?;

        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(MAGIC)?;
            file.write_all(&[FORMAT_VERSION])?;
            file.sync_all()?;
            debug!(target: "strata::db", path = ?self.path, "Created database file");
        } else {
            self.check_header(&mut file, len)?;
        }
        Ok(file)
    }

    fn check_header(&self, file: &mut File, len: u64) -> StrataResult<()> {
        if len < HEADER_LEN {
            return Err(StrataError::corruption(format!(
                "'{}' is truncated ({} bytes, header needs {})",
                self.path.display(),
                len,
                HEADER_LEN
            )));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(StrataError::corruption(format!(
                "'{}' is not a strata database",
                self.path.display()
            )));
        }

        let version = header[MAGIC.len()];
        if version > FORMAT_VERSION {
            return Err(StrataError::corruption(format!(
                "'{}' has unsupported format version {} (max {})",
                self.path.display(),
                version,
                FORMAT_VERSION
            )));
        }
        Ok(())
    }
}

impl DatabaseHandle for FileDatabase {
    fn at_path(path: PathBuf) -> Self {
        Self {
            name: String::new(),
            path,
            state: Mutex::new(HandleState::Unopened),
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
        let mut state = self.state.lock();
        match &*state {
            HandleState::Open(_) => return Ok(()),
            HandleState::Closed => return Err(StrataError::DatabaseClosed(self.name.clone())),
            HandleState::Deleted => return Err(StrataError::DatabaseDeleted(self.name.clone())),
            HandleState::Unopened => {}
        }

        let file = self.open_file()?;
        *state = HandleState::Open(file);
        info!(target: "strata::db", name = %self.name, path = ?self.path, "Opened database");
        Ok(())
    }

    fn close(&self) -> StrataResult<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, HandleState::Closed) {
            HandleState::Open(file) => {
                file.sync_all()?;
                FileExt::unlock(&file)?;
                debug!(target: "strata::db", name = %self.name, "Closed database");
            }
            // Deleted stays deleted
            HandleState::Deleted => *state = HandleState::Deleted,
            HandleState::Unopened | HandleState::Closed => {}
        }
        Ok(())
    }

    fn delete(&self) -> StrataResult<()> {
        let mut state = self.state.lock();
        if let HandleState::Open(file) = std::mem::replace(&mut *state, HandleState::Deleted) {
            // Closing the descriptor releases the lock
            drop(file);
        }

        let removed = if self.path.is_dir() {
            fs::remove_dir_all(&self.path)
        } else {
            fs::remove_file(&self.path)
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(target: "strata::db", name = %self.name, path = ?self.path, "Deleted database");
        Ok(())
    }

    fn status(&self) -> HandleStatus {
        self.state.lock().status()
    }
}

impl std::fmt::Debug for FileDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDatabase")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("status", &self.status())
            .finish()
    }
}
