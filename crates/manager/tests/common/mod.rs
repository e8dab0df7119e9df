//! Helpers shared by the key manager integration tests.

#![allow(dead_code, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use jwks_manager::{JsonWebKey, KeyManager, ManagerConfig};
use jwks_storage::MemoryRecordStore;

/// How long [`eventually`] waits before giving up.
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// A minimal symmetric key named `kid`.
pub fn test_key(kid: &str) -> JsonWebKey {
    JsonWebKey::builder().kid(kid).kty("oct").build().with_param("k", "c2VjcmV0")
}

/// Millisecond backoffs so recovery paths run fast.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig::builder()
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(20))
        .build()
        .expect("valid test config")
}

/// [`fast_config`] with resync after resubscribe turned off.
pub fn fast_config_without_resync() -> ManagerConfig {
    ManagerConfig::builder()
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(20))
        .resync_on_resubscribe(false)
        .build()
        .expect("valid test config")
}

/// Starts a manager with `config` over `store`.
pub async fn start_manager(
    store: &Arc<MemoryRecordStore>,
    config: ManagerConfig,
) -> KeyManager<MemoryRecordStore> {
    let manager = KeyManager::with_config(Arc::clone(store), config).unwrap();
    manager.start().await.expect("manager startup failed");
    manager
}

/// A started manager over a fresh store. The returned store stands in for
/// other processes sharing it.
pub async fn started_manager() -> (Arc<MemoryRecordStore>, KeyManager<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let manager = start_manager(&store, fast_config()).await;
    (store, manager)
}

/// Polls `condition` until it holds, panicking with `what` on timeout.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + CONVERGENCE_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for: {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Sorted kids of `set` as cached by `manager`; empty when the set is not
/// found.
pub fn cached_kids(manager: &KeyManager<MemoryRecordStore>, set: &str) -> Vec<String> {
    let mut kids: Vec<String> = manager
        .get_key_set(set)
        .map(|keys| keys.into_iter().map(|key| key.kid).collect())
        .unwrap_or_default();
    kids.sort();
    kids
}
