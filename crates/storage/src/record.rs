//! Persisted record schema and change-feed event types.
//!
//! A [`KeyRecord`] is the only shape the store persists: a key identifier,
//! the identifier of the set it belongs to, and the serialized key material.
//! The same shape is delivered by full scans and carried inside every
//! [`ChangeEvent`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// One persisted key: `(kid, set, key material)`.
///
/// The `key` field is opaque to the store. Its encoding belongs to the
/// consumer that wrote it.
///
/// # Examples
///
/// ```
/// use jwks_storage::KeyRecord;
///
/// let record = KeyRecord::new("k1", "issuer-a", r#"{"kid":"k1","kty":"oct"}"#);
/// assert_eq!(record.kid, "k1");
/// assert_eq!(record.set, "issuer-a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key identifier, unique (by convention only) within its set.
    pub kid: String,

    /// Identifier of the owning key set.
    pub set: String,

    /// Serialized key material.
    pub key: Bytes,
}

impl KeyRecord {
    /// Creates a new record.
    pub fn new(kid: impl Into<String>, set: impl Into<String>, key: impl Into<Bytes>) -> Self {
        Self { kid: kid.into(), set: set.into(), key: key.into() }
    }
}

/// Fields the store can index for filtered lookups and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexField {
    /// The key identifier field.
    Kid,
    /// The set identifier field.
    Set,
}

impl IndexField {
    /// Returns the persisted field name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kid => "kid",
            Self::Set => "set",
        }
    }
}

impl std::fmt::Display for IndexField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality predicate over the `kid` and `set` fields.
///
/// Unset fields match anything, so [`RecordFilter::default`] matches every
/// record.
///
/// # Examples
///
/// ```
/// use jwks_storage::{KeyRecord, RecordFilter};
///
/// let record = KeyRecord::new("k1", "issuer-a", "{}");
/// assert!(RecordFilter::by_set("issuer-a").matches(&record));
/// assert!(RecordFilter::by_kid("issuer-a", "k1").matches(&record));
/// assert!(!RecordFilter::by_kid("issuer-a", "k2").matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Required key identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Required set identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
}

impl RecordFilter {
    /// Matches every record of `set`.
    #[must_use]
    pub fn by_set(set: impl Into<String>) -> Self {
        Self { kid: None, set: Some(set.into()) }
    }

    /// Matches every record of `set` carrying `kid`.
    #[must_use]
    pub fn by_kid(set: impl Into<String>, kid: impl Into<String>) -> Self {
        Self { kid: Some(kid.into()), set: Some(set.into()) }
    }

    /// Returns `true` if `record` satisfies every field of the filter.
    #[must_use]
    pub fn matches(&self, record: &KeyRecord) -> bool {
        self.kid.as_deref().is_none_or(|kid| kid == record.kid)
            && self.set.as_deref().is_none_or(|set| set == record.set)
    }
}

/// One entry of the store's change feed.
///
/// Carries the before and after state of a single record:
///
/// | `old_val` | `new_val` | Meaning |
/// |-----------|-----------|---------|
/// | `None`    | `Some`    | insert  |
/// | `Some`    | `Some`    | update  |
/// | `Some`    | `None`    | delete  |
/// | `None`    | `None`    | invalid |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Record state before the change.
    #[serde(default)]
    pub old_val: Option<KeyRecord>,

    /// Record state after the change.
    #[serde(default)]
    pub new_val: Option<KeyRecord>,
}

impl ChangeEvent {
    /// An event announcing a newly inserted record.
    #[must_use]
    pub fn insert(record: KeyRecord) -> Self {
        Self { old_val: None, new_val: Some(record) }
    }

    /// An event announcing that `old` was replaced by `new`.
    #[must_use]
    pub fn update(old: KeyRecord, new: KeyRecord) -> Self {
        Self { old_val: Some(old), new_val: Some(new) }
    }

    /// An event announcing that `record` was removed.
    #[must_use]
    pub fn delete(record: KeyRecord) -> Self {
        Self { old_val: Some(record), new_val: None }
    }

    /// Classifies the event by which sides are present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidChange`] when neither side is present.
    pub fn classify(self) -> StorageResult<Change> {
        match (self.old_val, self.new_val) {
            (None, Some(new)) => Ok(Change::Insert(new)),
            (Some(old), Some(new)) => Ok(Change::Update { old, new }),
            (Some(old), None) => Ok(Change::Delete(old)),
            (None, None) => {
                Err(StorageError::invalid_change("event carries neither old nor new record"))
            },
        }
    }
}

/// A classified [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A record was inserted.
    Insert(KeyRecord),
    /// A record's content was replaced.
    Update {
        /// Record state before the change.
        old: KeyRecord,
        /// Record state after the change.
        new: KeyRecord,
    },
    /// A record was removed.
    Delete(KeyRecord),
}

impl Change {
    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update { .. } => "update",
            Self::Delete(_) => "delete",
        }
    }
}
