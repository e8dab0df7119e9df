//! Record store trait definition.
//!
//! [`KeyRecordStore`] is the full capability the key manager needs from a
//! durable backend: append a record, delete by filter, enumerate everything,
//! follow a live change feed, and prepare indexes.
//!
//! # Design Philosophy
//!
//! - **No query language**: filters are equality predicates over `kid` and `set`
//! - **Streams, not vectors**: scans and change feeds are [`BoxStream`]s so a
//!   backend can page or push without buffering everything
//! - **Independent calls**: the trait makes no atomicity promise across calls;
//!   a backend may apply a single `delete_matching` atomically
//!
//! See [`MemoryRecordStore`](crate::MemoryRecordStore) for a reference implementation.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{
    error::StorageResult,
    record::{ChangeEvent, IndexField, KeyRecord, RecordFilter},
};

/// Finite enumeration of every record, as returned by [`KeyRecordStore::scan`].
pub type RecordStream = BoxStream<'static, StorageResult<KeyRecord>>;

/// Live change feed, as returned by [`KeyRecordStore::subscribe`].
///
/// The stream yields `Err` when the feed breaks. A stream that ends or errors
/// will not deliver further events; the consumer must subscribe again.
pub type ChangeStream = BoxStream<'static, StorageResult<ChangeEvent>>;

/// Durable storage for key records.
///
/// # Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`insert`](KeyRecordStore::insert) | Append one record |
/// | [`delete_matching`](KeyRecordStore::delete_matching) | Remove every record matching a filter |
/// | [`scan`](KeyRecordStore::scan) | Enumerate all current records |
/// | [`subscribe`](KeyRecordStore::subscribe) | Follow the change feed |
/// | [`ensure_index`](KeyRecordStore::ensure_index) | Prepare an index (idempotent) |
/// | [`health_check`](KeyRecordStore::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use futures_util::TryStreamExt;
/// use jwks_storage::{KeyRecord, KeyRecordStore, MemoryRecordStore, RecordFilter};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryRecordStore::new();
///
/// store.insert(KeyRecord::new("k1", "issuer-a", "{}")).await.unwrap();
/// let records: Vec<KeyRecord> = store.scan().await.unwrap().try_collect().await.unwrap();
/// assert_eq!(records.len(), 1);
///
/// let removed = store.delete_matching(&RecordFilter::by_set("issuer-a")).await.unwrap();
/// assert_eq!(removed, 1);
/// # });
/// ```
#[async_trait]
pub trait KeyRecordStore: Send + Sync {
    /// Durably appends one record.
    ///
    /// No uniqueness is enforced: inserting the same `(set, kid)` twice
    /// stores two records.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn insert(&self, record: KeyRecord) -> StorageResult<()>;

    /// Durably removes every record matching `filter`.
    ///
    /// Returns the number of records removed. Removing nothing is not an
    /// error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete_matching(&self, filter: &RecordFilter) -> StorageResult<u64>;

    /// Enumerates every current record.
    ///
    /// The returned stream is finite and one-shot. Call `scan` again to
    /// restart the enumeration. Record order is unspecified.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan(&self) -> StorageResult<RecordStream>;

    /// Opens a subscription to the change feed.
    ///
    /// Only changes committed after the subscription is established are
    /// delivered. Dropping the stream cancels the subscription.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn subscribe(&self) -> StorageResult<ChangeStream>;

    /// Prepares an index on `field` so filtered operations on it are
    /// efficient. Calling it again for an existing index is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn ensure_index(&self, field: IndexField) -> StorageResult<()>;

    /// Verifies that the backend is reachable.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
