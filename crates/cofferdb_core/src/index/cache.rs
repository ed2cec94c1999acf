//! External key-value cache for index definitions and identifier sets.
//!
//! The cache is an accelerator only: index files on disk are authoritative
//! and every cache entry can be rebuilt from them. Keys follow
//! `db:<database>:indexes` (hash of definitions) and
//! `index:<database>:<collection>:<index>:<compositeKey>` (identifier sets).

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hash and set operations used by the index engine.
///
/// Every method can fail with `CacheUnavailable`; callers treat that as a
/// signal to fall back to files.
pub trait IndexCache: Send + Sync + fmt::Debug {
    /// Checks connectivity.
    fn ping(&self) -> CoreResult<()>;

    /// Sets one field of a hash.
    fn hset(&self, key: &str, field: &str, value: &str) -> CoreResult<()>;

    /// Reads one field of a hash.
    fn hget(&self, key: &str, field: &str) -> CoreResult<Option<String>>;

    /// Removes one field of a hash. Returns whether it existed.
    fn hdel(&self, key: &str, field: &str) -> CoreResult<bool>;

    /// Reads every field of a hash.
    fn hgetall(&self, key: &str) -> CoreResult<BTreeMap<String, String>>;

    /// Adds members to a set.
    fn sadd(&self, key: &str, members: &[String]) -> CoreResult<()>;

    /// Removes members from a set. An emptied set is deleted.
    fn srem(&self, key: &str, members: &[String]) -> CoreResult<()>;

    /// Reads a set. A missing key is an empty set.
    fn smembers(&self, key: &str) -> CoreResult<BTreeSet<String>>;

    /// Deletes keys of any type.
    fn del(&self, keys: &[String]) -> CoreResult<()>;

    /// Lists keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> CoreResult<Vec<String>>;
}

#[derive(Debug, Default)]
struct CacheState {
    hashes: HashMap<String, BTreeMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Shared in-process cache.
///
/// Clones share state, so one instance can serve several catalogs and
/// execution contexts. Each call is atomic.
#[derive(Debug, Clone)]
pub struct MemoryIndexCache {
    state: Arc<RwLock<CacheState>>,
    online: Arc<AtomicBool>,
}

impl MemoryIndexCache {
    /// Creates an empty, reachable cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the cache going down or coming back. State is kept.
    pub fn set_available(&self, available: bool) {
        self.online.store(available, Ordering::SeqCst);
    }

    /// Drops every key.
    pub fn flush(&self) {
        let mut state = self.state.write();
        state.hashes.clear();
        state.sets.clear();
    }

    /// Number of keys of either type.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let state = self.state.read();
        state.hashes.len() + state.sets.len()
    }

    fn check(&self) -> CoreResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::cache_unavailable("memory cache is offline"))
        }
    }
}

impl Default for MemoryIndexCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCache for MemoryIndexCache {
    fn ping(&self) -> CoreResult<()> {
        self.check()
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> CoreResult<()> {
        self.check()?;
        self.state
            .write()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> CoreResult<Option<String>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    fn hdel(&self, key: &str, field: &str) -> CoreResult<bool> {
        self.check()?;
        let mut state = self.state.write();
        let (removed, emptied) = match state.hashes.get_mut(key) {
            Some(hash) => (hash.remove(field).is_some(), hash.is_empty()),
            None => return Ok(false),
        };
        if emptied {
            state.hashes.remove(key);
        }
        Ok(removed)
    }

    fn hgetall(&self, key: &str) -> CoreResult<BTreeMap<String, String>> {
        self.check()?;
        Ok(self.state.read().hashes.get(key).cloned().unwrap_or_default())
    }

    fn sadd(&self, key: &str, members: &[String]) -> CoreResult<()> {
        self.check()?;
        if members.is_empty() {
            return Ok(());
        }
        self.state
            .write()
            .sets
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    fn srem(&self, key: &str, members: &[String]) -> CoreResult<()> {
        self.check()?;
        let mut state = self.state.write();
        let emptied = match state.sets.get_mut(key) {
            Some(set) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            state.sets.remove(key);
        }
        Ok(())
    }

    fn smembers(&self, key: &str) -> CoreResult<BTreeSet<String>> {
        self.check()?;
        Ok(self.state.read().sets.get(key).cloned().unwrap_or_default())
    }

    fn del(&self, keys: &[String]) -> CoreResult<()> {
        self.check()?;
        let mut state = self.state.write();
        for key in keys {
            state.hashes.remove(key);
            state.sets.remove(key);
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        self.check()?;
        let state = self.state.read();
        let mut keys: Vec<String> = state
            .hashes
            .keys()
            .chain(state.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// A cache that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineIndexCache;

impl OfflineIndexCache {
    fn unavailable<T>() -> CoreResult<T> {
        Err(CoreError::cache_unavailable("no index cache configured"))
    }
}

impl IndexCache for OfflineIndexCache {
    fn ping(&self) -> CoreResult<()> {
        Self::unavailable()
    }

    fn hset(&self, _key: &str, _field: &str, _value: &str) -> CoreResult<()> {
        Self::unavailable()
    }

    fn hget(&self, _key: &str, _field: &str) -> CoreResult<Option<String>> {
        Self::unavailable()
    }

    fn hdel(&self, _key: &str, _field: &str) -> CoreResult<bool> {
        Self::unavailable()
    }

    fn hgetall(&self, _key: &str) -> CoreResult<BTreeMap<String, String>> {
        Self::unavailable()
    }

    fn sadd(&self, _key: &str, _members: &[String]) -> CoreResult<()> {
        Self::unavailable()
    }

    fn srem(&self, _key: &str, _members: &[String]) -> CoreResult<()> {
        Self::unavailable()
    }

    fn smembers(&self, _key: &str) -> CoreResult<BTreeSet<String>> {
        Self::unavailable()
    }

    fn del(&self, _keys: &[String]) -> CoreResult<()> {
        Self::unavailable()
    }

    fn keys_with_prefix(&self, _prefix: &str) -> CoreResult<Vec<String>> {
        Self::unavailable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn hash_operations() {
        let cache = MemoryIndexCache::new();
        cache.hset("h", "a", "1").unwrap();
        cache.hset("h", "b", "2").unwrap();
        assert_eq!(cache.hget("h", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(cache.hgetall("h").unwrap().len(), 2);
        assert!(cache.hdel("h", "a").unwrap());
        assert!(!cache.hdel("h", "a").unwrap());
        assert!(cache.hget("h", "a").unwrap().is_none());
    }

    #[test]
    fn set_operations() {
        let cache = MemoryIndexCache::new();
        cache.sadd("s", &members(&["x", "y", "x"])).unwrap();
        assert_eq!(cache.smembers("s").unwrap().len(), 2);
        cache.srem("s", &members(&["x", "y"])).unwrap();
        assert!(cache.smembers("s").unwrap().is_empty());
        assert_eq!(cache.key_count(), 0);
    }

    #[test]
    fn prefix_listing_and_delete() {
        let cache = MemoryIndexCache::new();
        cache.sadd("index:db:users:age:30", &members(&["1"])).unwrap();
        cache.sadd("index:db:users:age:31", &members(&["2"])).unwrap();
        cache.sadd("index:db:orders:_id:1", &members(&["1"])).unwrap();
        let keys = cache.keys_with_prefix("index:db:users:").unwrap();
        assert_eq!(keys.len(), 2);
        cache.del(&keys).unwrap();
        assert_eq!(cache.key_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let a = MemoryIndexCache::new();
        let b = a.clone();
        a.hset("h", "f", "v").unwrap();
        assert_eq!(b.hget("h", "f").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn outage_is_reported_and_recoverable() {
        let cache = MemoryIndexCache::new();
        cache.hset("h", "f", "v").unwrap();
        cache.set_available(false);
        assert!(matches!(cache.ping(), Err(CoreError::CacheUnavailable { .. })));
        assert!(cache.hget("h", "f").is_err());
        cache.set_available(true);
        assert_eq!(cache.hget("h", "f").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn offline_cache_always_fails() {
        let cache = OfflineIndexCache;
        assert!(cache.ping().is_err());
        assert!(cache.smembers("s").is_err());
    }
}
