//! In-memory record store with a live change feed.
//!
//! This module provides [`MemoryRecordStore`], an in-memory implementation of
//! [`KeyRecordStore`] suitable for testing and development.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Change feed**: Every committed mutation is published on a
//!   [`tokio::sync::broadcast`] channel, one event per affected record, in
//!   commit order
//! - **Fault injection**: Change streams, subscriptions and scans can be made
//!   to fail on demand, so consumers' recovery paths can be exercised
//!
//! # Example
//!
//! ```
//! use futures_util::StreamExt;
//! use jwks_storage::{ChangeEvent, KeyRecord, KeyRecordStore, MemoryRecordStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryRecordStore::new();
//!     let mut changes = store.subscribe().await.unwrap();
//!
//!     let record = KeyRecord::new("k1", "issuer-a", "{}");
//!     store.insert(record.clone()).await.unwrap();
//!
//!     let event = changes.next().await.unwrap().unwrap();
//!     assert_eq!(event, ChangeEvent::insert(record));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the last clone is dropped
//! - A subscriber that falls more than the feed capacity behind receives a
//!   connection error and its stream ends

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    error::{StorageError, StorageResult},
    record::{ChangeEvent, IndexField, KeyRecord, RecordFilter},
    store::{ChangeStream, KeyRecordStore, RecordStream},
};

/// Default number of change events buffered per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Message carried on the internal broadcast channel.
#[derive(Debug, Clone)]
enum FeedMessage {
    Change(ChangeEvent),
    Fault(String),
}

struct Inner {
    records: RwLock<Vec<KeyRecord>>,
    indexes: RwLock<BTreeSet<IndexField>>,
    feed: broadcast::Sender<FeedMessage>,
    failing_subscriptions: AtomicU32,
    failing_scans: AtomicU32,
}

/// In-memory record store.
///
/// # Cloning
///
/// `MemoryRecordStore` is cheaply cloneable via [`Arc`]. All clones share the
/// same records and the same change feed, which makes a clone a stand-in for
/// a second process attached to the same backend.
#[derive(Clone)]
pub struct MemoryRecordStore {
    inner: Arc<Inner>,
}

impl MemoryRecordStore {
    /// Creates an empty store with [`DEFAULT_FEED_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Creates an empty store whose subscribers buffer at most `capacity`
    /// undelivered events before lagging.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(Vec::new()),
                indexes: RwLock::new(BTreeSet::new()),
                feed,
                failing_subscriptions: AtomicU32::new(0),
                failing_scans: AtomicU32::new(0),
            }),
        }
    }

    /// Rewrites the key material of every record matching `filter`.
    ///
    /// Publishes one update event per rewritten record and returns how many
    /// records changed.
    #[tracing::instrument(skip(self, key))]
    pub fn replace(&self, filter: &RecordFilter, key: impl Into<Bytes>) -> u64 {
        let key = key.into();
        let mut records = self.inner.records.write();
        let mut replaced = 0;

        for record in records.iter_mut().filter(|record| filter.matches(record)) {
            let old = record.clone();
            record.key = key.clone();
            self.publish(ChangeEvent::update(old, record.clone()));
            replaced += 1;
        }

        replaced
    }

    /// Breaks every open change stream.
    ///
    /// Each current subscriber receives one [`StorageError::Connection`]
    /// carrying `message`, after which its stream ends.
    pub fn inject_stream_failure(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "injecting change stream failure");
        let _ = self.inner.feed.send(FeedMessage::Fault(message));
    }

    /// Makes the next `count` calls to [`subscribe`](KeyRecordStore::subscribe)
    /// fail with [`StorageError::Connection`].
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.inner.failing_subscriptions.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to [`scan`](KeyRecordStore::scan) fail
    /// with [`StorageError::Connection`].
    pub fn fail_next_scans(&self, count: u32) {
        self.inner.failing_scans.store(count, Ordering::SeqCst);
    }

    /// Returns the indexes prepared so far, in field order.
    #[must_use]
    pub fn indexes(&self) -> Vec<IndexField> {
        self.inner.indexes.read().iter().copied().collect()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Returns the number of live change-feed subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.feed.receiver_count()
    }

    /// Publishes an event. Callers hold the records write lock so the feed
    /// order matches the commit order.
    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.inner.feed.send(FeedMessage::Change(event));
    }

    fn consume_failure(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyRecordStore for MemoryRecordStore {
    #[tracing::instrument(skip(self, record), fields(kid = %record.kid, set = %record.set))]
    async fn insert(&self, record: KeyRecord) -> StorageResult<()> {
        fail_point!("memory-store-insert", |_| {
            Err(StorageError::internal("injected failure in insert"))
        });

        let mut records = self.inner.records.write();
        records.push(record.clone());
        self.publish(ChangeEvent::insert(record));
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_matching(&self, filter: &RecordFilter) -> StorageResult<u64> {
        fail_point!("memory-store-delete", |_| {
            Err(StorageError::internal("injected failure in delete_matching"))
        });

        let mut records = self.inner.records.write();
        let (removed, kept): (Vec<KeyRecord>, Vec<KeyRecord>) =
            std::mem::take(&mut *records).into_iter().partition(|record| filter.matches(record));
        *records = kept;

        let count = removed.len() as u64;
        for record in removed {
            self.publish(ChangeEvent::delete(record));
        }

        tracing::debug!(removed = count, "deleted matching records");
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn scan(&self) -> StorageResult<RecordStream> {
        if Self::consume_failure(&self.inner.failing_scans) {
            return Err(StorageError::connection("injected scan failure"));
        }

        let snapshot = self.inner.records.read().clone();
        Ok(futures_util::stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    #[tracing::instrument(skip(self))]
    async fn subscribe(&self) -> StorageResult<ChangeStream> {
        fail_point!("memory-store-subscribe", |_| {
            Err(StorageError::connection("injected failure in subscribe"))
        });

        if Self::consume_failure(&self.inner.failing_subscriptions) {
            return Err(StorageError::connection("injected subscribe failure"));
        }

        let receiver = self.inner.feed.subscribe();
        let stream = futures_util::stream::unfold(Some(receiver), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.recv().await {
                Ok(FeedMessage::Change(event)) => Some((Ok(event), Some(receiver))),
                Ok(FeedMessage::Fault(message)) => {
                    Some((Err(StorageError::connection(message)), None))
                },
                Err(err @ RecvError::Lagged(_)) => Some((
                    Err(StorageError::connection_with_source("change feed lagged", err)),
                    None,
                )),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(stream.boxed())
    }

    #[tracing::instrument(skip(self))]
    async fn ensure_index(&self, field: IndexField) -> StorageResult<()> {
        if self.inner.indexes.write().insert(field) {
            tracing::debug!(%field, "index created");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<()> {
        fail_point!("memory-store-health-check", |_| {
            Err(StorageError::connection("injected failure in health_check"))
        });

        // Verify the lock is not wedged.
        let _unused = self.inner.records.read();
        Ok(())
    }
}
