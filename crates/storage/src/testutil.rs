//! Shared test utilities for record store testing.
//!
//! This module provides helpers for building records and populating a
//! [`MemoryRecordStore`]. It is feature-gated behind `testutil` to prevent
//! leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! jwks-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use jwks_storage::testutil::{make_record, populated_store};
//! ```

use crate::{KeyRecordStore, memory::MemoryRecordStore, record::KeyRecord};

/// Create a record whose key material is a minimal JSON object naming `kid`.
#[must_use]
pub fn make_record(kid: &str, set: &str) -> KeyRecord {
    KeyRecord::new(kid, set, format!(r#"{{"kid":"{kid}","kty":"oct"}}"#))
}

/// Create a deterministic key identifier from a prefix and index.
///
/// Produces identifiers like `"prefix-000042"`.
#[must_use]
pub fn make_kid(prefix: &str, idx: usize) -> String {
    format!("{prefix}-{idx:06}")
}

/// Create a [`MemoryRecordStore`] holding `count` records in `set`.
///
/// # Panics
///
/// Panics if any insert fails (should not happen with `MemoryRecordStore`).
pub async fn populated_store(set: &str, count: usize) -> MemoryRecordStore {
    let store = MemoryRecordStore::new();
    for i in 0..count {
        store.insert(make_record(&make_kid("kid", i), set)).await.expect("populate insert failed");
    }
    store
}
