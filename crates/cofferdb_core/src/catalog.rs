//! Registry of open databases under one data root.

use crate::config::Config;
use crate::database::Database;
use crate::dir::validate_name;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::info;

/// Caller-owned set of open databases.
///
/// A catalog opens each database at most once and hands out shared
/// handles. Independent catalogs (one per execution context) may be open
/// on the same data root at the same time.
pub struct Catalog {
    config: Config,
    cache: Option<Arc<dyn IndexCache>>,
    databases: Mutex<HashMap<String, Arc<Database>>>,
}

impl Catalog {
    /// Creates an empty catalog. Nothing is opened yet.
    #[must_use]
    pub fn new(config: Config, cache: Option<Arc<dyn IndexCache>>) -> Self {
        Self {
            config,
            cache,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration databases are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a database, or returns the handle opened earlier.
    ///
    /// Opening scans and heals every collection, so it runs without the
    /// catalog lock; connects to other databases proceed meanwhile. If two
    /// callers race on the same name, the first handle registered wins and
    /// the other is closed.
    pub fn connect(&self, name: &str) -> CoreResult<Arc<Database>> {
        if let Some(db) = self.open_handle(name) {
            return Ok(db);
        }
        let opened = Arc::new(Database::open(name, &self.config, self.cache.clone())?);

        let mut databases = self.databases.lock();
        let existing = databases.get(name).filter(|db| db.is_open()).cloned();
        if let Some(existing) = existing {
            drop(databases);
            opened.close()?;
            return Ok(existing);
        }
        databases.insert(name.to_string(), Arc::clone(&opened));
        Ok(opened)
    }

    fn open_handle(&self, name: &str) -> Option<Arc<Database>> {
        self.databases
            .lock()
            .get(name)
            .filter(|db| db.is_open())
            .cloned()
    }

    /// Returns true if the database is connected through this catalog.
    #[must_use]
    pub fn is_connected(&self, name: &str) -> bool {
        self.open_handle(name).is_some()
    }

    /// Closes and forgets a database handle. Returns false if it was not
    /// connected.
    pub fn disconnect(&self, name: &str) -> CoreResult<bool> {
        let Some(db) = self.databases.lock().remove(name) else {
            return Ok(false);
        };
        db.close()?;
        Ok(true)
    }

    /// Database directories under the data root, sorted.
    pub fn list_databases(&self) -> CoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.config.data_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name("database", name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes a database: every collection with its cache entries, then
    /// the directory.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if the directory does not exist.
    pub fn drop_database(&self, name: &str) -> CoreResult<()> {
        validate_name("database", name)?;
        let path = self.config.data_root.join(name);
        if !path.is_dir() {
            return Err(CoreError::DatabaseNotFound {
                name: name.to_string(),
            });
        }

        let db = self.connect(name)?;
        for collection in db.list_collections()? {
            db.drop_collection(&collection)?;
        }
        self.disconnect(name)?;

        match fs::remove_dir_all(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(database = name, "dropped database");
        Ok(())
    }

    /// Closes every connected database.
    pub fn close_all(&self) -> CoreResult<()> {
        let databases: Vec<Arc<Database>> = self.databases.lock().drain().map(|(_, db)| db).collect();
        for db in databases {
            db.close()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        f.debug_struct("Catalog")
            .field("data_root", &self.config.data_root)
            .field("databases", &names)
            .finish_non_exhaustive()
    }
}
