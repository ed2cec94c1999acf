//! Redis-backed index cache.
//!
//! One connection is opened lazily and reused. Any command failure drops it
//! and surfaces as `CacheUnavailable`, so the next call reconnects.

use super::cache::IndexCache;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use redis::{Client, Commands, Connection, RedisResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Connect, read and write timeout used by [`RedisIndexCache::open`].
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(2);

fn unavailable(err: &redis::RedisError) -> CoreError {
    CoreError::cache_unavailable(format!("redis: {err}"))
}

/// Escapes glob metacharacters for `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// [`IndexCache`] on a Redis server.
pub struct RedisIndexCache {
    client: Client,
    connection: Mutex<Option<Connection>>,
    timeout: Duration,
}

impl fmt::Debug for RedisIndexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisIndexCache")
            .field("addr", &self.client.get_connection_info().addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisIndexCache {
    /// Creates a cache for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// No connection is made until the first command.
    ///
    /// # Errors
    ///
    /// Returns `CacheUnavailable` if the URL cannot be parsed.
    pub fn open(url: &str) -> CoreResult<Self> {
        Self::with_timeout(url, DEFAULT_CACHE_TIMEOUT)
    }

    /// Like [`open`](Self::open) with a custom timeout.
    pub fn with_timeout(url: &str, timeout: Duration) -> CoreResult<Self> {
        let client = Client::open(url).map_err(|e| unavailable(&e))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout,
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let connection = self.client.get_connection_with_timeout(self.timeout)?;
        connection.set_read_timeout(Some(self.timeout))?;
        connection.set_write_timeout(Some(self.timeout))?;
        debug!(addr = ?self.client.get_connection_info().addr, "connected to index cache");
        Ok(connection)
    }

    fn run<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> CoreResult<T> {
        let mut slot = self.connection.lock();
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.connect().map_err(|e| unavailable(&e))?,
        };
        let value = f(&mut connection).map_err(|e| unavailable(&e))?;
        *slot = Some(connection);
        Ok(value)
    }
}

impl IndexCache for RedisIndexCache {
    fn ping(&self) -> CoreResult<()> {
        self.run(|con| redis::cmd("PING").query::<String>(con).map(drop))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> CoreResult<()> {
        self.run(|con| con.hset::<_, _, _, ()>(key, field, value))
    }

    fn hget(&self, key: &str, field: &str) -> CoreResult<Option<String>> {
        self.run(|con| con.hget(key, field))
    }

    fn hdel(&self, key: &str, field: &str) -> CoreResult<bool> {
        self.run(|con| con.hdel::<_, _, i64>(key, field).map(|n| n > 0))
    }

    fn hgetall(&self, key: &str) -> CoreResult<BTreeMap<String, String>> {
        self.run(|con| con.hgetall(key))
    }

    fn sadd(&self, key: &str, members: &[String]) -> CoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.run(|con| con.sadd::<_, _, ()>(key, members))
    }

    fn srem(&self, key: &str, members: &[String]) -> CoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.run(|con| con.srem::<_, _, ()>(key, members))
    }

    fn smembers(&self, key: &str) -> CoreResult<BTreeSet<String>> {
        self.run(|con| con.smembers(key))
    }

    fn del(&self, keys: &[String]) -> CoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.run(|con| con.del::<_, ()>(keys))
    }

    fn keys_with_prefix(&self, prefix: &str) -> CoreResult<Vec<String>> {
        let pattern = escape_glob(prefix);
        let mut keys = self.run(|con| {
            con.scan_match::<_, String>(&pattern)
                .map(|iter| iter.collect::<Vec<String>>())
        })?;
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEngine;
    use crate::EncryptionCodec;
    use std::sync::Arc;

    const UNREACHABLE: &str = "redis://127.0.0.1:1/";

    fn members(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn unreachable_server_is_cache_unavailable() {
        let cache = RedisIndexCache::with_timeout(UNREACHABLE, Duration::from_millis(200)).unwrap();
        assert!(matches!(cache.ping(), Err(CoreError::CacheUnavailable { .. })));
        assert!(matches!(
            cache.smembers("index:app:users:age:30"),
            Err(CoreError::CacheUnavailable { .. })
        ));
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            RedisIndexCache::open("not a url"),
            Err(CoreError::CacheUnavailable { .. })
        ));
    }

    #[test]
    fn empty_batches_skip_the_server() {
        let cache = RedisIndexCache::open(UNREACHABLE).unwrap();
        cache.sadd("k", &[]).unwrap();
        cache.srem("k", &[]).unwrap();
        cache.del(&[]).unwrap();
    }

    #[test]
    fn glob_characters_are_escaped() {
        assert_eq!(escape_glob("index:app:users:"), "index:app:users:*");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\*");
    }

    #[test]
    fn engine_starts_offline_without_server() {
        let cache = RedisIndexCache::with_timeout(UNREACHABLE, Duration::from_millis(200)).unwrap();
        let engine = IndexEngine::new(
            "app",
            Arc::new(EncryptionCodec::new(None)),
            Some(Arc::new(cache)),
            false,
        );
        assert!(!engine.cache_online());
    }

    /// Runs against a live server when `COFFERDB_REDIS_URL` is set.
    #[test]
    fn live_server_operations() {
        let Ok(url) = std::env::var("COFFERDB_REDIS_URL") else {
            return;
        };
        let cache = RedisIndexCache::open(&url).unwrap();
        cache.ping().unwrap();
        let prefix = format!("cofferdb-test:{}:", uuid::Uuid::new_v4());
        let hash = format!("{prefix}defs");
        let set = format!("{prefix}set");

        cache.hset(&hash, "users:age", "{}").unwrap();
        assert_eq!(cache.hget(&hash, "users:age").unwrap().as_deref(), Some("{}"));
        assert_eq!(cache.hgetall(&hash).unwrap().len(), 1);

        cache.sadd(&set, &members(&["a", "b"])).unwrap();
        cache.srem(&set, &members(&["a"])).unwrap();
        assert_eq!(cache.smembers(&set).unwrap(), ["b".to_string()].into_iter().collect());

        let keys = cache.keys_with_prefix(&prefix).unwrap();
        assert_eq!(keys, vec![hash.clone(), set.clone()]);

        assert!(cache.hdel(&hash, "users:age").unwrap());
        assert!(!cache.hdel(&hash, "users:age").unwrap());
        cache.del(&keys).unwrap();
        assert!(cache.keys_with_prefix(&prefix).unwrap().is_empty());
    }
}
