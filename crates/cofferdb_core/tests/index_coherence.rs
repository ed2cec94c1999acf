//! Index maintenance across writes and out-of-band file loss.

use cofferdb_core::index::IndexFile;
use cofferdb_core::{
    Catalog, Config, Document, EncryptionCodec, IndexCache, IndexOptions, MemoryIndexCache,
    RedisIndexCache, UpdateOptions, Value,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const PASSPHRASE: &str = "integration-secret";

fn doc(value: serde_json::Value) -> Document {
    Document::from_json(value).unwrap()
}

fn catalog(root: &Path, cache: Option<&MemoryIndexCache>) -> Catalog {
    let config = Config::new()
        .data_root(root)
        .passphrase(PASSPHRASE)
        .sync_on_write(false);
    Catalog::new(
        config,
        cache.map(|c| Arc::new(c.clone()) as Arc<dyn IndexCache>),
    )
}

fn load_index(root: &Path, name: &str) -> IndexFile {
    let path = root.join("app").join("users").join(format!("_index_{name}.bson"));
    IndexFile::load(&path, &EncryptionCodec::new(Some(PASSPHRASE)))
        .unwrap()
        .unwrap()
}

#[test]
fn inc_moves_document_between_keys() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let catalog = catalog(temp.path(), Some(&cache));
    let users = catalog.connect("app").unwrap().collection_or_create("users").unwrap();
    users.create_index(["age"], IndexOptions::default()).unwrap();

    let stored = users.insert_one(doc(json!({"name": "John", "age": 30}))).unwrap();
    let id = stored.id().cloned().unwrap();
    let id_key = id.to_key_string();

    let mut by_id = Document::new();
    by_id.insert("_id", id.clone());
    let result = users
        .update_one(&by_id, &doc(json!({"$inc": {"age": 1}})), UpdateOptions::default())
        .unwrap();
    assert_eq!(result.modified, 1);

    let updated = users.find_by_id(id).unwrap().unwrap();
    assert_eq!(updated.get("age"), Some(&Value::Integer(31)));
    assert!(users.lookup("age", "31").unwrap().contains(&id_key));
    assert!(users.lookup("age", "30").unwrap().is_empty());

    // The file agrees with the cache.
    let file = load_index(temp.path(), "age");
    assert!(file.lookup("31").contains(&id_key));
    assert!(file.lookup("30").is_empty());
}

#[test]
fn delete_clears_every_index() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let catalog = catalog(temp.path(), Some(&cache));
    let users = catalog.connect("app").unwrap().collection_or_create("users").unwrap();
    users.create_index(["name"], IndexOptions::default()).unwrap();
    users.create_index(["name", "age"], IndexOptions::default()).unwrap();

    users.insert_one(doc(json!({"_id": "u1", "name": "John", "age": 30}))).unwrap();
    users.insert_one(doc(json!({"_id": "u2", "name": "Jane", "age": 25}))).unwrap();

    let deleted = users.delete_one(&doc(json!({"_id": "u1"}))).unwrap();
    assert_eq!(deleted.deleted, 1);

    let remaining = users.find(&Document::new(), &Default::default()).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), Some(&Value::Text("u2".into())));

    assert!(users.lookup("_id", "u1").unwrap().is_empty());
    assert!(users.lookup("name", "John").unwrap().is_empty());
    assert!(users.lookup("name_age", "John|30").unwrap().is_empty());
    assert!(users.lookup("name_age", "Jane|25").unwrap().contains("u2"));

    for name in ["_id", "name", "name_age"] {
        let file = load_index(temp.path(), name);
        assert!(file.entries.values().all(|ids| !ids.contains("u1")), "{name}");
    }
    assert!(cache
        .smembers("index:app:users:name:John")
        .unwrap()
        .is_empty());
}

#[test]
fn deleted_index_file_is_rebuilt_identically() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let catalog = catalog(temp.path(), Some(&cache));
    let users = catalog.connect("app").unwrap().collection_or_create("users").unwrap();
    users.create_index(["age"], IndexOptions::default()).unwrap();
    for (name, age) in [("John", 30), ("Jane", 25), ("Bob", 30)] {
        users.insert_one(doc(json!({"name": name, "age": age}))).unwrap();
    }
    let before = load_index(temp.path(), "age");

    let path = temp.path().join("app/users/_index_age.bson");
    fs::remove_file(&path).unwrap();

    let names: Vec<String> = users.indexes().unwrap().into_iter().map(|m| m.name).collect();
    assert!(names.contains(&"age".to_string()));
    assert!(path.exists());

    let after = load_index(temp.path(), "age");
    assert_eq!(after.entries, before.entries);
    assert_eq!(after.metadata.fields, before.metadata.fields);
}

#[test]
fn corrupt_index_file_heals_without_cache() {
    let temp = tempdir().unwrap();
    let catalog = catalog(temp.path(), None);
    let users = catalog.connect("app").unwrap().collection_or_create("users").unwrap();
    users.create_index(["age"], IndexOptions::default()).unwrap();
    users.insert_one(doc(json!({"_id": 1, "age": 40}))).unwrap();
    let before = load_index(temp.path(), "age");

    fs::write(temp.path().join("app/users/_index_age.bson"), b"not an index").unwrap();

    assert!(users.lookup("age", "40").unwrap().contains("1"));
    assert_eq!(load_index(temp.path(), "age").entries, before.entries);
}

#[test]
fn cache_outage_falls_back_to_files() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let catalog = catalog(temp.path(), Some(&cache));
    let db = catalog.connect("app").unwrap();
    let users = db.collection_or_create("users").unwrap();
    users.create_index(["age"], IndexOptions::default()).unwrap();

    cache.set_available(false);
    users.insert_one(doc(json!({"_id": "x", "age": 50}))).unwrap();

    assert!(!db.cache_online());
    assert!(users.lookup("age", "50").unwrap().contains("x"));
    assert_eq!(users.count(&Document::new()).unwrap(), 1);
}

#[test]
fn handle_rejoins_cache_after_outage() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let first = catalog(temp.path(), Some(&cache));
    let second = catalog(temp.path(), Some(&cache));
    let db_a = first.connect("app").unwrap();
    let users_a = db_a.collection_or_create("users").unwrap();
    users_a.create_index(["age"], IndexOptions::default()).unwrap();
    users_a.insert_one(doc(json!({"_id": "x", "age": 30}))).unwrap();
    let users_b = second.connect("app").unwrap().collection("users").unwrap();

    cache.set_available(false);
    assert!(users_a.lookup("age", "30").unwrap().contains("x"));
    assert!(!db_a.cache_online());
    cache.set_available(true);

    users_a
        .update_one(
            &doc(json!({"_id": "x"})),
            &doc(json!({"$inc": {"age": 1}})),
            UpdateOptions::default(),
        )
        .unwrap();

    assert!(db_a.cache_online());
    assert!(users_b.lookup("age", "31").unwrap().contains("x"));
    assert!(users_b.lookup("age", "30").unwrap().is_empty());
    assert!(cache.smembers("index:app:users:age:30").unwrap().is_empty());
}

#[test]
fn writes_missed_by_cache_are_republished() {
    let temp = tempdir().unwrap();
    let cache = MemoryIndexCache::new();
    let first = catalog(temp.path(), Some(&cache));
    let second = catalog(temp.path(), Some(&cache));
    let users_a = first.connect("app").unwrap().collection_or_create("users").unwrap();
    users_a.create_index(["age"], IndexOptions::default()).unwrap();
    users_a.insert_one(doc(json!({"_id": "x", "age": 30}))).unwrap();
    let users_b = second.connect("app").unwrap().collection("users").unwrap();

    cache.set_available(false);
    users_a
        .update_one(
            &doc(json!({"_id": "x"})),
            &doc(json!({"$set": {"age": 45}})),
            UpdateOptions::default(),
        )
        .unwrap();
    let marker = temp.path().join("app/users/CACHE_STALE");
    assert!(marker.exists());
    cache.set_available(true);

    assert!(users_b.lookup("age", "30").unwrap().is_empty());
    assert!(users_b.lookup("age", "45").unwrap().contains("x"));
    assert!(!marker.exists());
    assert!(cache.smembers("index:app:users:age:30").unwrap().is_empty());
    assert!(cache.smembers("index:app:users:age:45").unwrap().contains("x"));
}

#[test]
fn underscored_field_index_heals_without_cache() {
    let temp = tempdir().unwrap();
    let catalog = catalog(temp.path(), None);
    let users = catalog.connect("app").unwrap().collection_or_create("users").unwrap();
    users.create_index(["created_at"], IndexOptions::default()).unwrap();
    users.insert_one(doc(json!({"_id": "e1", "created_at": 1700}))).unwrap();

    fs::write(temp.path().join("app/users/_index_created_at.bson"), b"not an index").unwrap();

    assert!(users.lookup("created_at", "1700").unwrap().contains("e1"));
    let healed = load_index(temp.path(), "created_at");
    assert_eq!(healed.metadata.fields, vec!["created_at".to_string()]);
}

#[test]
fn unreachable_redis_degrades_to_files() {
    let temp = tempdir().unwrap();
    let redis = RedisIndexCache::with_timeout("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
    let config = Config::new()
        .data_root(temp.path())
        .passphrase(PASSPHRASE)
        .sync_on_write(false);
    let catalog = Catalog::new(config, Some(Arc::new(redis) as Arc<dyn IndexCache>));
    let db = catalog.connect("app").unwrap();
    assert!(!db.cache_online());

    let users = db.collection_or_create("users").unwrap();
    users.create_index(["age"], IndexOptions::default()).unwrap();
    users.insert_one(doc(json!({"_id": "r1", "age": 20}))).unwrap();
    assert!(users.lookup("age", "20").unwrap().contains("r1"));
}
