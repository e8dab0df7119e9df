//! Durable record store abstraction for JSON Web Key sets.
//!
//! This crate provides the [`KeyRecordStore`] trait and related types that
//! form the backend boundary of the key manager. The manager never talks to a
//! database directly: it appends records, deletes by filter, scans, and
//! follows the change feed through this trait.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      jwks-manager                           │
//! │    Mutator │ Reader │ Loader │ Watcher │ in-memory cache    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      jwks-storage                           │
//! │                 KeyRecordStore trait                        │
//! │ (insert, delete_matching, scan, subscribe, ensure_index)    │
//! ├──────────────────┬──────────────────────────────────────────┤
//! │ MemoryRecordStore│     document store with change feeds     │
//! │    (testing)     │            (production)                  │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! # Record Schema
//!
//! Every persisted record has three fields: `kid` (string), `set` (string)
//! and `key` (opaque serialized key material). See [`KeyRecord`].
//!
//! # Change Feed
//!
//! [`KeyRecordStore::subscribe`] returns a stream of [`ChangeEvent`]s, each
//! carrying the before/after state of one record. [`ChangeEvent::classify`]
//! turns an event into an insert, update, or delete.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers.
//! - **`failpoints`**: Activates the `fail` injection points in [`MemoryRecordStore`].

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod record;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::{DEFAULT_FEED_CAPACITY, MemoryRecordStore};
pub use record::{Change, ChangeEvent, IndexField, KeyRecord, RecordFilter};
pub use store::{ChangeStream, KeyRecordStore, RecordStream};
