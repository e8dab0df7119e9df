//! JSON Web Key model and key-material codec.
//!
//! The manager interprets exactly one field of a key, its `kid`. Everything
//! else (key type, algorithm, public and private parameters) is carried
//! verbatim so that whatever parses keys downstream sees what was written.
//!
//! Key material is persisted as the JSON encoding of [`JsonWebKey`], see
//! [`encode_key`] and [`decode_key`].

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{KeyManagerError, Result};

/// A single JSON Web Key.
///
/// # Example
///
/// ```
/// use jwks_manager::JsonWebKey;
///
/// let key = JsonWebKey::builder()
///     .kid("key-2024-001")
///     .kty("OKP")
///     .alg("EdDSA")
///     .build()
///     .with_param("crv", "Ed25519")
///     .with_param("x", "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo");
///
/// assert_eq!(key.kid, "key-2024-001");
/// assert_eq!(key.param("crv").and_then(|v| v.as_str()), Some("Ed25519"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct JsonWebKey {
    /// Key ID. Nominally unique within the owning set.
    #[builder(into)]
    pub kid: String,

    /// Key type (`kty`), e.g. `OKP`, `EC`, `RSA`, `oct`.
    #[builder(into)]
    pub kty: String,

    /// Intended algorithm (`alg`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub alg: Option<String>,

    /// Intended use (`use`), e.g. `sig` or `enc`.
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub key_use: Option<String>,

    /// Remaining key parameters, carried verbatim.
    #[serde(flatten)]
    #[builder(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl JsonWebKey {
    /// Returns the key with `name` set to `value`.
    #[must_use]
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Returns a key parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }
}

/// An unordered collection of keys.
///
/// Duplicated `kid`s are allowed and preserved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// The keys of the set.
    pub keys: Vec<JsonWebKey>,
}

impl JsonWebKeySet {
    /// Creates a set from `keys`.
    #[must_use]
    pub fn new(keys: Vec<JsonWebKey>) -> Self {
        Self { keys }
    }

    /// Returns every key whose `kid` equals `kid`.
    #[must_use]
    pub fn key(&self, kid: &str) -> Vec<&JsonWebKey> {
        self.keys.iter().filter(|key| key.kid == kid).collect()
    }

    /// Returns the key identifiers in set order.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        self.keys.iter().map(|key| key.kid.as_str()).collect()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates over the keys.
    pub fn iter(&self) -> std::slice::Iter<'_, JsonWebKey> {
        self.keys.iter()
    }
}

impl From<Vec<JsonWebKey>> for JsonWebKeySet {
    fn from(keys: Vec<JsonWebKey>) -> Self {
        Self::new(keys)
    }
}

impl IntoIterator for JsonWebKeySet {
    type Item = JsonWebKey;
    type IntoIter = std::vec::IntoIter<JsonWebKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter()
    }
}

impl<'a> IntoIterator for &'a JsonWebKeySet {
    type Item = &'a JsonWebKey;
    type IntoIter = std::slice::Iter<'a, JsonWebKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// Serializes a key into the material stored in a record's `key` field.
///
/// # Errors
///
/// Returns [`KeyManagerError::Encode`] if a parameter cannot be serialized.
pub fn encode_key(key: &JsonWebKey) -> Result<Bytes> {
    serde_json::to_vec(key)
        .map(Bytes::from)
        .map_err(|e| KeyManagerError::encode_with_source(format!("key {}", key.kid), e))
}

/// Parses key material read from a record's `key` field.
///
/// # Errors
///
/// Returns [`KeyManagerError::Decode`] if the material is not a JSON Web Key.
pub fn decode_key(material: &[u8]) -> Result<JsonWebKey> {
    serde_json::from_slice(material)
        .map_err(|e| KeyManagerError::decode_with_source("malformed key material", e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ed25519_key(kid: &str) -> JsonWebKey {
        JsonWebKey::builder()
            .kid(kid)
            .kty("OKP")
            .alg("EdDSA")
            .key_use("sig")
            .build()
            .with_param("crv", "Ed25519")
            .with_param("x", "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo")
    }

    #[test]
    fn test_builder_minimal() {
        let key = JsonWebKey::builder().kid("k1").kty("oct").build();

        assert_eq!(key.kid, "k1");
        assert_eq!(key.kty, "oct");
        assert!(key.alg.is_none());
        assert!(key.key_use.is_none());
        assert!(key.params.is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&ed25519_key("k1")).expect("serialize");

        assert!(json.contains("\"kid\":\"k1\""));
        assert!(json.contains("\"use\":\"sig\""));
        assert!(json.contains("\"crv\":\"Ed25519\""));
        assert!(!json.contains("key_use"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_decode_known_jwk() {
        let json = br#"{
            "kty": "RSA",
            "kid": "rsa-1",
            "use": "sig",
            "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            "e": "AQAB"
        }"#;

        let key = decode_key(json).expect("decode");
        assert_eq!(key.kid, "rsa-1");
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.key_use.as_deref(), Some("sig"));
        assert_eq!(key.param("e").and_then(|v| v.as_str()), Some("AQAB"));
    }

    #[test]
    fn test_encode_preserves_unknown_params() {
        let key = ed25519_key("k1").with_param("x5t", "dGh1bWI");
        let decoded = decode_key(&encode_key(&key).expect("encode")).expect("decode");

        assert_eq!(decoded, key);
    }

    #[rstest]
    #[case::not_json(b"not json".as_slice())]
    #[case::missing_kid(br#"{"kty":"oct"}"#.as_slice())]
    #[case::missing_kty(br#"{"kid":"k1"}"#.as_slice())]
    #[case::wrong_type(br#"{"kid":7,"kty":"oct"}"#.as_slice())]
    #[case::empty(b"".as_slice())]
    fn test_decode_rejects_malformed_material(#[case] material: &[u8]) {
        let err = decode_key(material).unwrap_err();
        assert!(matches!(err, KeyManagerError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_key_set_lookup_returns_all_duplicates() {
        let set = JsonWebKeySet::new(vec![ed25519_key("k1"), ed25519_key("k2"), ed25519_key("k1")]);

        assert_eq!(set.key("k1").len(), 2);
        assert_eq!(set.key("k2").len(), 1);
        assert!(set.key("k3").is_empty());
        assert_eq!(set.kids(), vec!["k1", "k2", "k1"]);
    }

    #[test]
    fn test_key_set_wire_shape() {
        let set = JsonWebKeySet::from(vec![JsonWebKey::builder().kid("k1").kty("oct").build()]);
        let json = serde_json::to_value(&set).expect("serialize");

        assert_eq!(json, serde_json::json!({ "keys": [{ "kid": "k1", "kty": "oct" }] }));
    }
}
