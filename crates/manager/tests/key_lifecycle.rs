//! End-to-end behaviour of the key manager over a shared in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{cached_kids, eventually, fast_config, start_manager, started_manager, test_key};
use jwks_manager::{JsonWebKeySet, KeyManager, KeyManagerError};
use jwks_storage::{IndexField, KeyRecord, KeyRecordStore, MemoryRecordStore, RecordFilter};

#[tokio::test]
async fn add_delete_round_trip_through_the_change_feed() {
    let (store, manager) = started_manager().await;
    let keys = JsonWebKeySet::new(vec![test_key("k1"), test_key("k2")]);

    manager.add_key_set("issuer-a", &keys).await.expect("add key set");
    eventually("both keys cached", || cached_kids(&manager, "issuer-a").len() == 2).await;
    assert_eq!(cached_kids(&manager, "issuer-a"), vec!["k1", "k2"]);

    manager.delete_key("issuer-a", "k1").await.expect("delete key");
    eventually("k1 evicted", || cached_kids(&manager, "issuer-a") == vec!["k2"]).await;

    manager.delete_key_set("issuer-a").await.expect("delete key set");
    eventually("set evicted", || manager.get_key_set("issuer-a").is_err()).await;

    assert!(matches!(
        manager.get_key_set("issuer-a"),
        Err(KeyManagerError::KeySetNotFound { ref set }) if set == "issuer-a"
    ));
    assert!(store.is_empty());

    let metrics = manager.metrics();
    assert_eq!(metrics.inserts_applied, 2);
    assert_eq!(metrics.deletes_applied, 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn start_prepares_indexes_and_loads_existing_records() {
    let store = Arc::new(MemoryRecordStore::new());
    store.insert(KeyRecord::new("k1", "issuer-a", r#"{"kid":"k1","kty":"oct"}"#)).await.unwrap();
    store.insert(KeyRecord::new("k9", "issuer-b", r#"{"kid":"k9","kty":"oct"}"#)).await.unwrap();

    let manager = start_manager(&store, fast_config()).await;

    assert_eq!(store.indexes(), vec![IndexField::Kid, IndexField::Set]);
    assert_eq!(cached_kids(&manager, "issuer-a"), vec!["k1"]);
    assert_eq!(cached_kids(&manager, "issuer-b"), vec!["k9"]);
    assert!(manager.is_watching());

    manager.shutdown().await;
}

#[tokio::test]
async fn writes_from_one_process_reach_another() {
    let store = Arc::new(MemoryRecordStore::new());
    let writer = start_manager(&store, fast_config()).await;
    let reader = start_manager(&store, fast_config()).await;

    writer.add_key("issuer-a", &test_key("k1")).await.unwrap();

    eventually("reader sees k1", || reader.get_key("issuer-a", "k1").is_ok()).await;
    eventually("writer sees k1", || writer.get_key("issuer-a", "k1").is_ok()).await;

    reader.delete_key("issuer-a", "k1").await.unwrap();

    eventually("writer sees delete", || writer.get_key("issuer-a", "k1").is_err()).await;

    writer.shutdown().await;
    reader.shutdown().await;
}

#[tokio::test]
async fn delete_before_insert_is_observed_fails_not_found() {
    let store = Arc::new(MemoryRecordStore::new());
    let writer = start_manager(&store, fast_config()).await;

    // Loaded once, never watching: it has not seen the writer's insert.
    let lagging = KeyManager::with_config(Arc::clone(&store), fast_config()).unwrap();
    lagging.cold_start().await.unwrap();

    writer.add_key("issuer-a", &test_key("k1")).await.unwrap();

    let err = lagging.delete_key("issuer-a", "k1").await.unwrap_err();
    assert!(matches!(err, KeyManagerError::KeyNotFound { .. }));
    assert_eq!(store.len(), 1, "a failed delete must not touch the store");

    lagging.cold_start().await.unwrap();
    lagging.delete_key("issuer-a", "k1").await.unwrap();
    assert!(store.is_empty());

    writer.shutdown().await;
}

#[tokio::test]
async fn duplicate_kids_are_all_returned_and_all_deleted() {
    let (store, manager) = started_manager().await;

    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    manager.add_key("issuer-a", &test_key("k2")).await.unwrap();

    eventually("three keys cached", || manager.cached_key_count() == 3).await;
    assert_eq!(manager.get_key("issuer-a", "k1").unwrap().len(), 2);

    manager.delete_key("issuer-a", "k1").await.unwrap();

    eventually("duplicates evicted", || manager.get_key("issuer-a", "k1").is_err()).await;
    assert_eq!(cached_kids(&manager, "issuer-a"), vec!["k2"]);
    assert_eq!(store.len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn same_kid_in_different_sets_is_independent() {
    let (_store, manager) = started_manager().await;

    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    manager.add_key("issuer-b", &test_key("k1")).await.unwrap();
    eventually("both sets cached", || manager.cached_set_count() == 2).await;

    manager.delete_key("issuer-a", "k1").await.unwrap();
    eventually("issuer-a emptied", || manager.get_key_set("issuer-a").is_err()).await;

    assert_eq!(manager.get_key("issuer-b", "k1").unwrap().len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn updates_replace_cached_material() {
    let (store, manager) = started_manager().await;
    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    eventually("k1 cached", || manager.get_key("issuer-a", "k1").is_ok()).await;

    let replaced = store.replace(
        &RecordFilter::by_kid("issuer-a", "k1"),
        r#"{"kid":"k1","kty":"oct","alg":"HS512"}"#,
    );
    assert_eq!(replaced, 1);

    eventually("update applied", || manager.metrics().updates_applied == 1).await;

    let keys = manager.get_key("issuer-a", "k1").unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys.keys[0].alg.as_deref(), Some("HS512"));

    manager.shutdown().await;
}

#[tokio::test]
async fn malformed_record_in_feed_is_skipped() {
    let (store, manager) = started_manager().await;

    store.insert(KeyRecord::new("bad", "issuer-a", "definitely not a key")).await.unwrap();
    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();

    eventually("good key cached", || manager.get_key("issuer-a", "k1").is_ok()).await;

    assert!(manager.get_key("issuer-a", "bad").is_err());
    let metrics = manager.metrics();
    assert_eq!(metrics.decode_failures, 1);
    assert_eq!(metrics.inserts_applied, 1);
    assert!(manager.is_watching());

    manager.shutdown().await;
}

#[tokio::test]
async fn malformed_record_fails_cold_start() {
    let store = Arc::new(MemoryRecordStore::new());
    store.insert(KeyRecord::new("bad", "issuer-a", "{")).await.unwrap();

    let manager = KeyManager::with_config(Arc::clone(&store), fast_config()).unwrap();
    let err = manager.start().await.unwrap_err();

    assert!(matches!(err, KeyManagerError::Decode { .. }));
    assert!(!manager.is_watching());
}

#[tokio::test]
async fn reads_never_hit_the_store() {
    let (store, manager) = started_manager().await;
    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    eventually("k1 cached", || manager.get_key("issuer-a", "k1").is_ok()).await;

    // Removed behind the feed's back: no event reaches the cache.
    manager.shutdown().await;
    store.delete_matching(&RecordFilter::by_set("issuer-a")).await.unwrap();

    assert_eq!(manager.get_key_set("issuer-a").unwrap().kids(), vec!["k1"]);
}

#[tokio::test]
async fn works_over_a_trait_object_store() {
    let store: Arc<dyn KeyRecordStore> = Arc::new(MemoryRecordStore::new());
    let manager: KeyManager = KeyManager::with_config(store, fast_config()).unwrap();
    manager.start().await.unwrap();

    manager.add_key("issuer-a", &test_key("k1")).await.unwrap();
    eventually("k1 cached", || manager.get_key("issuer-a", "k1").is_ok()).await;

    manager.health_check().await.unwrap();
    manager.shutdown().await;
}
