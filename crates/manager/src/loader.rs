//! Full-scan cache rebuild.

use std::collections::HashMap;

use futures_util::TryStreamExt;
use jwks_storage::KeyRecordStore;

use crate::{
    error::Result,
    key::{JsonWebKeySet, decode_key},
};

/// Scans every record of `store` and groups the decoded keys by set.
///
/// The result is built off to the side; callers swap it into the cache only
/// when this returns `Ok`, so a failed scan never leaves a half-built cache.
///
/// # Errors
///
/// Returns the first scan error or the first key material that fails to
/// decode.
pub(crate) async fn load_sets<S>(store: &S) -> Result<HashMap<String, JsonWebKeySet>>
where
    S: KeyRecordStore + ?Sized,
{
    let mut records = store.scan().await?;
    let mut sets: HashMap<String, JsonWebKeySet> = HashMap::new();

    while let Some(record) = records.try_next().await? {
        let key = decode_key(&record.key).inspect_err(|err| {
            tracing::error!(
                kid = %record.kid,
                set = %record.set,
                error = %err,
                "undecodable key material in scan"
            );
        })?;
        sets.entry(record.set).or_default().keys.push(key);
    }

    Ok(sets)
}
