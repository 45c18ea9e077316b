//! In-memory registry of database handles
//!
//! Maps logical names to handles for one server root. A name is registered
//! the first time it is looked up, before any storage is opened: being in the
//! registry means "known to this process", not "persisted on disk".
//!
//! The map is guarded by a `parking_lot::Mutex`. Besides map reads and
//! writes, the lock covers the `exists()` probe in
//! [`get_or_create`](Registry::get_or_create) and the storage teardown in
//! [`delete`](Registry::delete) and [`close_all_with`](Registry::close_all_with),
//! so a name cannot be registered again while its old handle is still being
//! deleted or closed. Handles are never opened under the lock.

use crate::database::DatabaseHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::{name_for_file, NameResolver, StrataResult};
use tracing::{debug, warn};

/// Name -> handle map for one root directory
pub struct Registry<D: DatabaseHandle> {
    resolver: NameResolver,
    databases: Mutex<HashMap<String, Arc<D>>>,
}

impl<D: DatabaseHandle> Registry<D> {
    /// Empty registry resolving names with `resolver`
    pub fn new(resolver: NameResolver) -> Self {
        Self {
            resolver,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// The resolver used for name validation and paths
    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    /// Path `name` would be stored at, if the name is valid
    pub fn path_for_name(&self, name: &str) -> Option<PathBuf> {
        self.resolver.resolve_path(name)
    }

    /// Look up `name`, registering a new unopened handle if needed
    ///
    /// Returns None if the name is invalid, or if `create_if_missing` is false
    /// and nothing is stored for it on disk. In both cases nothing is
    /// registered.
    pub fn get_or_create(&self, name: &str, create_if_missing: bool) -> Option<Arc<D>> {
        let mut databases = self.databases.lock();
        if let Some(db) = databases.get(name) {
            return Some(Arc::clone(db));
        }

        let path = self.resolver.resolve_path(name)?;
        let mut db = D::at_path(path);
        if !create_if_missing && !db.exists() {
            return None;
        }

        db.set_name(name);
        let db = Arc::new(db);
        databases.insert(name.to_string(), Arc::clone(&db));
        debug!(target: "strata::server", name = %name, "Registered database");
        Some(db)
    }

    /// Look up an existing database and open it
    ///
    /// Returns None if the name is invalid, nothing is stored on disk, or
    /// opening fails. A handle whose open failed stays registered.
    pub fn get_existing(&self, name: &str) -> Option<Arc<D>> {
        let db = self.get_or_create(name, false)?;
        match db.open() {
            Ok(()) => Some(db),
            Err(e) => {
                warn!(target: "strata::server", name = %name, error = %e, "Failed to open database");
                None
            }
        }
    }

    /// Delete a registered database and forget it
    ///
    /// Returns false, doing nothing, if `name` is not registered. Databases
    /// that exist on disk but were never looked up cannot be deleted this way.
    /// A failure to remove storage is logged; the entry is dropped regardless.
    ///
    /// Lookups of any name block until the storage is gone.
    pub fn delete(&self, name: &str) -> bool {
        let mut databases = self.databases.lock();
        let db = match databases.get(name) {
            Some(db) => Arc::clone(db),
            None => return false,
        };

        if let Err(e) = db.delete() {
            warn!(target: "strata::server", name = %name, error = %e, "Failed to delete database storage");
        }
        databases.remove(name);
        true
    }

    /// Names of all databases stored under the root, sorted ascending
    ///
    /// Reads the directory only; the registry is not consulted. Entries that
    /// are not valid UTF-8 are skipped.
    pub fn list_persisted_names(&self) -> StrataResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.resolver.root())? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str().and_then(name_for_file) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every registered handle, in no particular order
    pub fn list_open_handles(&self) -> Vec<Arc<D>> {
        self.databases.lock().values().cloned().collect()
    }

    /// Visit every registered handle in name order, then unregister them all
    ///
    /// The lock is held until every visit returns, so lookups made meanwhile
    /// wait and then register fresh handles.
    pub fn close_all_with<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &Arc<D>),
    {
        let mut databases = self.databases.lock();
        let mut all: Vec<_> = databases.iter().collect();
        all.sort_by(|a, b| a.0.cmp(b.0));
        for (name, db) in all {
            visit(name, db);
        }
        databases.clear();
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.databases.lock().contains_key(name)
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.databases.lock().len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.databases.lock().is_empty()
    }
}
