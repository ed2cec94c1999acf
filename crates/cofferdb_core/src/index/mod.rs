//! Secondary indexes.
//!
//! An index maps a composite key (the indexed field values of a document,
//! joined with `|`) to the set of identifiers carrying that key. Indexes are:
//! - Persisted as one encrypted file per index in the collection directory
//! - Mirrored into an optional [`IndexCache`] for fast lookups, in process
//!   ([`MemoryIndexCache`]) or on a Redis server ([`RedisIndexCache`])
//! - Fully derivable from the collection's data file
//!
//! Every collection carries the `_id` index. Indexes are maintained on every
//! write but queries do not consult them; they serve lookups and stats.

mod cache;
mod engine;
mod key;
mod persistence;
mod redis_cache;

pub use cache::{IndexCache, MemoryIndexCache, OfflineIndexCache};
pub use engine::{IndexChange, IndexEngine};
pub use key::{composite_key, composite_key_of, index_name, DEFAULT_INDEX, KEY_DELIMITER, NULL_KEY};
pub use persistence::{IndexFile, IndexMetadata};
pub use redis_cache::{RedisIndexCache, DEFAULT_CACHE_TIMEOUT};
