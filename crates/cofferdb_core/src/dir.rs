//! On-disk layout and the per-collection write lock.
//!
//! ```text
//! <data_root>/
//! └─ <database>/
//!    └─ <collection>/
//!       ├─ LOCK                     # advisory lock, one writer at a time
//!       ├─ CACHE_STALE              # present while the index cache lags the files
//!       ├─ data.bson                # encrypted { documents: [...] }
//!       └─ _index_<name>.bson       # encrypted { metadata, data }
//! ```
//!
//! The LOCK file serializes load-mutate-save across threads and processes.
//! Files are replaced with write-then-rename so a lock-free reader sees
//! either the previous or the new snapshot, never a partial one.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Snapshot file name within a collection directory.
pub const DATA_FILE: &str = "data.bson";
/// Lock file name within a collection directory.
pub const LOCK_FILE: &str = "LOCK";
/// Marker file: index files changed without the cache being updated.
pub const CACHE_STALE_FILE: &str = "CACHE_STALE";
/// Prefix of index file names.
pub const INDEX_FILE_PREFIX: &str = "_index_";
/// Suffix shared by data and index files.
pub const FILE_SUFFIX: &str = ".bson";
/// Suffix of in-flight temporary files.
const TEMP_SUFFIX: &str = ".tmp";

/// Checks that a database or collection name is a single safe path component.
pub fn validate_name(kind: &str, name: &str) -> CoreResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0' | ':'));
    if bad {
        return Err(CoreError::invalid_operation(format!(
            "invalid {kind} name: {name:?}"
        )));
    }
    Ok(())
}

/// File name for an index.
#[must_use]
pub fn index_file_name(index_name: &str) -> String {
    format!("{INDEX_FILE_PREFIX}{index_name}{FILE_SUFFIX}")
}

/// Recovers the index name from an index file name.
#[must_use]
pub fn index_name_from_file(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(INDEX_FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// Writes a file atomically: temp file, optional fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> CoreResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    if sync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&temp, path)?;

    if sync {
        if let Some(parent) = path.parent() {
            sync_directory(parent)?;
        }
    }
    Ok(())
}

/// Removes a file, treating absence as success.
///
/// Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> CoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}

/// Paths and write serialization for one collection directory.
#[derive(Debug)]
pub struct CollectionDir {
    path: PathBuf,
    local: Mutex<()>,
}

impl CollectionDir {
    /// Wraps a collection directory path. Nothing is created.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            local: Mutex::new(()),
        }
    }

    /// Creates the directory if missing.
    pub fn create(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    /// Returns true if the directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    /// Path of the stale-cache marker.
    #[must_use]
    pub fn cache_stale_path(&self) -> PathBuf {
        self.path.join(CACHE_STALE_FILE)
    }

    /// Path of an index file.
    #[must_use]
    pub fn index_path(&self, index_name: &str) -> PathBuf {
        self.path.join(index_file_name(index_name))
    }

    /// Lists index names that have a file on disk, sorted.
    pub fn index_names_on_disk(&self) -> CoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(index_name_from_file) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Acquires the exclusive write lock, blocking until available.
    ///
    /// The lock is held by the returned guard: an in-process mutex plus an
    /// advisory lock on the LOCK file, so writers in other threads, other
    /// database handles and other processes are all serialized.
    pub fn lock(&self) -> CoreResult<CollectionGuard<'_>> {
        let local = self.local.lock();
        self.create()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(CollectionGuard {
            dir: self,
            file,
            _local: local,
        })
    }
}

/// Proof that the collection's write lock is held.
///
/// Functions that rewrite collection files take a `&CollectionGuard`.
pub struct CollectionGuard<'a> {
    dir: &'a CollectionDir,
    file: File,
    _local: MutexGuard<'a, ()>,
}

impl CollectionGuard<'_> {
    /// The locked collection directory.
    #[must_use]
    pub fn dir(&self) -> &CollectionDir {
        self.dir
    }
}

impl Drop for CollectionGuard<'_> {
    fn drop(&mut self) {
        // Closing the handle releases the lock too; unlock explicitly so it
        // happens before the in-process mutex is released.
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn name_validation() {
        assert!(validate_name("collection", "users").is_ok());
        assert!(validate_name("collection", "").is_err());
        assert!(validate_name("collection", "../etc").is_err());
        assert!(validate_name("collection", "a/b").is_err());
        assert!(validate_name("database", ".hidden").is_err());
    }

    #[test]
    fn index_file_names() {
        assert_eq!(index_file_name("name_age"), "_index_name_age.bson");
        assert_eq!(index_name_from_file("_index_name_age.bson"), Some("name_age"));
        assert_eq!(index_name_from_file("_index__id.bson"), Some("_id"));
        assert_eq!(index_name_from_file("data.bson"), None);
        assert_eq!(index_name_from_file("_index_.bson"), None);
        assert_eq!(index_name_from_file("_index_x.bson.tmp"), None);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("file.bson");
        write_atomic(&path, b"first", true).unwrap();
        write_atomic(&path, b"second", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp.path().join("file.bson.tmp").exists());
    }

    #[test]
    fn remove_missing_is_ok() {
        let temp = tempdir().unwrap();
        assert!(!remove_if_exists(&temp.path().join("nope")).unwrap());
    }

    #[test]
    fn lists_index_files() {
        let temp = tempdir().unwrap();
        let dir = CollectionDir::new(temp.path().join("users"));
        dir.create().unwrap();
        fs::write(dir.index_path("_id"), b"x").unwrap();
        fs::write(dir.index_path("age"), b"x").unwrap();
        fs::write(dir.data_path(), b"x").unwrap();
        assert_eq!(dir.index_names_on_disk().unwrap(), vec!["_id", "age"]);
    }

    #[test]
    fn lock_serializes_separate_handles() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("c");
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                // Each thread uses its own CollectionDir, like separate database handles.
                let dir = CollectionDir::new(path.clone());
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _guard = dir.lock().unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
