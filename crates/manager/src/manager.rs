//! The key manager facade.
//!
//! [`KeyManager`] ties a [`KeyRecordStore`] to a [`KeyCache`]:
//!
//! - **Writes** (`add_*`, `delete_*`) go to the store only. The cache learns
//!   about them from the change feed, the same way it learns about writes
//!   made by other processes sharing the store.
//! - **Reads** (`get_*`) are served from the cache only and never touch the
//!   store.
//! - **Loading** ([`cold_start`](KeyManager::cold_start)) rebuilds the cache
//!   from a full scan.
//! - **Watching** ([`start_watching`](KeyManager::start_watching)) spawns the
//!   background task that applies change events until
//!   [`shutdown`](KeyManager::shutdown).
//!
//! The cache is therefore eventually consistent with the store: a key added
//! through this manager is not visible to [`get_key`](KeyManager::get_key)
//! until its insert event has been applied.

use std::sync::Arc;

use fail::fail_point;
use jwks_storage::{ChangeEvent, ChangeStream, IndexField, KeyRecord, KeyRecordStore, RecordFilter};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::KeyCache,
    config::ManagerConfig,
    error::{KeyManagerError, Result},
    key::{JsonWebKey, JsonWebKeySet, encode_key},
    loader::load_sets,
    metrics::{WatcherMetrics, WatcherMetricsSnapshot},
    watcher::{ChangeKind, Watcher, apply_change},
};

/// Cached, feed-synchronized store of JSON Web Key sets.
///
/// # Lifecycle
///
/// ```text
/// new ─► start ─────────────────────────────► shutdown
///        (set_up_indexes, subscribe,
///         cold_start, start_watching)
/// ```
///
/// [`start`](Self::start) is the usual entry point. The individual steps are
/// public for callers that need to sequence them differently.
///
/// [`shutdown`](Self::shutdown) is terminal: the cancellation token stays
/// cancelled, so a watcher started afterwards exits immediately. Dropping the
/// manager also cancels the watcher.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use jwks_manager::{JsonWebKey, KeyManager};
/// use jwks_storage::MemoryRecordStore;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), jwks_manager::KeyManagerError> {
/// let manager = KeyManager::new(Arc::new(MemoryRecordStore::new()));
/// manager.start().await?;
///
/// let key = JsonWebKey::builder().kid("k1").kty("oct").build();
/// manager.add_key("issuer-a", &key).await?;
///
/// // Visible once the watcher has applied the insert event.
/// # tokio::time::sleep(std::time::Duration::from_millis(50)).await;
/// # assert_eq!(manager.get_key("issuer-a", "k1")?.len(), 1);
/// manager.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct KeyManager<S: ?Sized = dyn KeyRecordStore> {
    store: Arc<S>,
    cache: Arc<KeyCache>,
    config: ManagerConfig,
    metrics: Arc<WatcherMetrics>,
    cancel_token: CancellationToken,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S> KeyManager<S>
where
    S: KeyRecordStore + ?Sized + 'static,
{
    /// Creates a manager with the default configuration and an empty cache.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::from_parts(store, ManagerConfig::default())
    }

    /// Creates a manager with `config` and an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Config`] if `config` fails
    /// [`ManagerConfig::validate`], as a deserialized configuration may.
    pub fn with_config(store: Arc<S>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(store, config))
    }

    fn from_parts(store: Arc<S>, config: ManagerConfig) -> Self {
        Self {
            store,
            cache: Arc::new(KeyCache::new()),
            config,
            metrics: Arc::new(WatcherMetrics::new()),
            cancel_token: CancellationToken::new(),
            watch_handle: Mutex::new(None),
        }
    }

    /// Prepares the store for the manager's access patterns, then loads the
    /// cache and starts the watcher.
    ///
    /// The change feed is subscribed *before* the full scan and handed to the
    /// watcher, so no change committed during startup is missed.
    ///
    /// # Errors
    ///
    /// Returns the first failure of index setup, subscription or loading.
    /// Nothing is spawned in that case.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.set_up_indexes().await?;
        let changes = self.store.subscribe().await?;
        self.cold_start().await?;
        self.spawn_watcher(Some(changes));
        Ok(())
    }

    /// Ensures the store indexes records by key ID and by set.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Storage`] if the store cannot create an index.
    #[tracing::instrument(skip(self))]
    pub async fn set_up_indexes(&self) -> Result<()> {
        for field in [IndexField::Kid, IndexField::Set] {
            self.store.ensure_index(field).await?;
        }
        tracing::debug!("record store indexes ready");
        Ok(())
    }

    /// Writes one key into `set`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Encode`] if the key cannot be serialized,
    /// or [`KeyManagerError::Storage`] if the insert fails.
    #[tracing::instrument(skip(self, key), fields(kid = %key.kid))]
    pub async fn add_key(&self, set: &str, key: &JsonWebKey) -> Result<()> {
        self.publish(set, std::slice::from_ref(key)).await
    }

    /// Writes every key of `keys` into `set`, one record per key.
    ///
    /// All keys are encoded before anything is written, so an unencodable
    /// key writes nothing. Inserts are not atomic: on a storage error, keys
    /// written before the failure stay in the store.
    ///
    /// # Errors
    ///
    /// Returns the first encode or insert error.
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn add_key_set(&self, set: &str, keys: &JsonWebKeySet) -> Result<()> {
        self.publish(set, &keys.keys).await
    }

    async fn publish(&self, set: &str, keys: &[JsonWebKey]) -> Result<()> {
        let records = keys
            .iter()
            .map(|key| Ok(KeyRecord::new(key.kid.as_str(), set, encode_key(key)?)))
            .collect::<Result<Vec<_>>>()?;

        for record in records {
            fail_point!("manager-before-insert", |_| {
                Err(KeyManagerError::Storage(jwks_storage::StorageError::internal(
                    "injected failure before insert",
                )))
            });
            self.store.insert(record).await?;
        }
        Ok(())
    }

    /// Deletes every record of `set` with identifier `kid`.
    ///
    /// The key must be present in the cache: deleting a key that this
    /// manager has not yet observed fails with `KeyNotFound` without touching
    /// the store.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::KeyNotFound`] if the cache holds no such
    /// key, or [`KeyManagerError::Storage`] if the delete fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete_key(&self, set: &str, kid: &str) -> Result<()> {
        let cached = self.get_key(set, kid)?;
        let removed = self.store.delete_matching(&RecordFilter::by_kid(set, kid)).await?;
        tracing::debug!(cached = cached.len(), removed, "deleted key records");
        Ok(())
    }

    /// Deletes every record of `set`.
    ///
    /// Unlike [`delete_key`](Self::delete_key) this does not consult the
    /// cache, and succeeds when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Storage`] if the delete fails.
    #[tracing::instrument(skip(self))]
    pub async fn delete_key_set(&self, set: &str) -> Result<()> {
        let removed = self.store.delete_matching(&RecordFilter::by_set(set)).await?;
        tracing::debug!(removed, "deleted key set records");
        Ok(())
    }

    /// Returns every cached key of `set` with identifier `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::KeyNotFound`] if there is none.
    pub fn get_key(&self, set: &str, kid: &str) -> Result<JsonWebKeySet> {
        self.cache.get(set, kid).ok_or_else(|| KeyManagerError::key_not_found(set, kid))
    }

    /// Returns a copy of the cached `set`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::KeySetNotFound`] if the set is absent or
    /// holds no keys.
    pub fn get_key_set(&self, set: &str) -> Result<JsonWebKeySet> {
        self.cache.get_set(set).ok_or_else(|| KeyManagerError::key_set_not_found(set))
    }

    /// Rebuilds the cache from a full scan of the store.
    ///
    /// The new content replaces the old in one step once the whole scan has
    /// been decoded. On error the cache is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Storage`] if the scan fails, or
    /// [`KeyManagerError::Decode`] if a record holds malformed key material.
    #[tracing::instrument(skip(self))]
    pub async fn cold_start(&self) -> Result<()> {
        let sets = load_sets(&*self.store).await?;

        fail_point!("cold-start-before-commit", |_| {
            Err(KeyManagerError::Storage(jwks_storage::StorageError::internal(
                "injected failure before commit",
            )))
        });

        let set_count = sets.len();
        let key_count: usize = sets.values().map(JsonWebKeySet::len).sum();
        self.cache.replace_all(sets);
        tracing::info!(sets = set_count, keys = key_count, "key cache loaded");
        Ok(())
    }

    /// Applies one change event to the cache, exactly as the watcher would.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidChange`] for an event with neither
    /// side set, or [`KeyManagerError::Decode`] for undecodable key material.
    pub fn apply_change(&self, event: ChangeEvent) -> Result<ChangeKind> {
        apply_change(&self.cache, &self.metrics, event)
    }

    /// Spawns the watcher task.
    ///
    /// Returns `false` without spawning if a watcher is already running.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start_watching(&self) -> bool {
        self.spawn_watcher(None)
    }

    fn spawn_watcher(&self, initial: Option<ChangeStream>) -> bool {
        let mut handle = self.watch_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("watcher already running");
            return false;
        }

        let watcher = Watcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&self.metrics),
            self.config.clone(),
            self.cancel_token.clone(),
        );
        *handle = Some(tokio::spawn(watcher.run(initial)));
        true
    }

    /// Returns `true` while the watcher task is running.
    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.watch_handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the watcher and waits for it to exit.
    ///
    /// The cache keeps its content and stays readable.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.watch_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "key set watcher panicked");
        }
    }

    /// Returns the cancellation token of the watcher.
    ///
    /// Callers can use this to integrate with external shutdown signals.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Returns a copy of the watcher counters.
    #[must_use]
    pub fn metrics(&self) -> WatcherMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the number of non-empty cached sets.
    #[must_use]
    pub fn cached_set_count(&self) -> usize {
        self.cache.set_count()
    }

    /// Returns the total number of cached keys.
    #[must_use]
    pub fn cached_key_count(&self) -> usize {
        self.cache.key_count()
    }

    /// Checks the record store's health.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Storage`] if the store is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }
}

impl<S: ?Sized> Drop for KeyManager<S> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl<S: ?Sized> std::fmt::Debug for KeyManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("config", &self.config)
            .field("cached_keys", &self.cache.key_count())
            .field("watching", &self.watch_handle.lock().as_ref().is_some_and(|h| !h.is_finished()))
            .finish_non_exhaustive()
    }
}
