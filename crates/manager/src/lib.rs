//! Cached JSON Web Key set manager.
//!
//! [`KeyManager`] stores key sets in a [`KeyRecordStore`](jwks_storage::KeyRecordStore)
//! and serves reads from an in-memory cache. The cache is kept eventually
//! consistent with the store by following the store's change feed, so several
//! processes sharing one store converge on the same view without polling.
//!
//! # Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`KeyCache`] | set → keys map behind one lock; reads return copies |
//! | Mutator | `add_key`, `add_key_set`, `delete_key`, `delete_key_set`; writes the store only |
//! | Reader | `get_key`, `get_key_set`; reads the cache only |
//! | Loader | `cold_start`; rebuilds the cache from a full scan |
//! | Watcher | background task applying change events to the cache |
//!
//! # Consistency
//!
//! Writes become visible to reads only after their change event has been
//! applied. In particular [`KeyManager::delete_key`] consults the cache first,
//! so deleting a key another process has just added can fail with
//! [`KeyManagerError::KeyNotFound`] until the insert event arrives.
//!
//! # Feature Flags
//!
//! - **`failpoints`**: Activates the `fail` injection points.

#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
mod loader;
pub mod manager;
pub mod metrics;
pub mod watcher;

pub use cache::{CacheEntries, KeyCache};
pub use config::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, ManagerConfig};
pub use error::{KeyManagerError, Result};
pub use key::{JsonWebKey, JsonWebKeySet, decode_key, encode_key};
pub use manager::KeyManager;
pub use metrics::{WatcherMetrics, WatcherMetricsSnapshot};
pub use watcher::ChangeKind;
