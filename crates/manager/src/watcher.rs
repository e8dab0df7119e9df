//! Change-feed consumer that keeps the cache in step with the store.
//!
//! The watcher is a long-lived task. It subscribes to the store's change
//! feed and applies every event to the [`KeyCache`]. Faults never escape the
//! task:
//!
//! - an event whose key material cannot be decoded, or that carries neither
//!   an old nor a new record, is logged, counted and skipped;
//! - a stream that errors or ends is dropped and a new subscription is taken
//!   after an exponential backoff with jitter;
//! - after a resubscription the cache is optionally rebuilt from a full scan,
//!   so changes committed while the feed was down are not lost. A failed
//!   scan is handled like a stream fault: the new subscription is dropped
//!   and the watcher backs off, resubscribes and scans again.
//!
//! The task stops only when its cancellation token fires.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use jwks_storage::{Change, ChangeEvent, ChangeStream, KeyRecordStore, StorageError};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::KeyCache,
    config::ManagerConfig,
    error::Result,
    key::decode_key,
    loader::load_sets,
    metrics::WatcherMetrics,
};

/// Kind of cache mutation performed for one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A decoded key was appended to its set.
    Insert,
    /// The previous key was dropped and its replacement appended.
    Update,
    /// Every key matching the deleted record was dropped.
    Delete,
}

impl ChangeKind {
    /// Returns the kind as a lowercase string for logging.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies one change event to `cache` and counts the outcome in `metrics`.
///
/// An update is applied under a single cache lock, so readers see either the
/// old key or the new one, never neither. If the new key material of an
/// update cannot be decoded the old key is still dropped.
///
/// # Errors
///
/// Returns [`KeyManagerError::InvalidChange`](crate::KeyManagerError::InvalidChange)
/// for an event with neither side set, and
/// [`KeyManagerError::Decode`](crate::KeyManagerError::Decode) for undecodable
/// key material. The cache is unchanged in both cases, apart from the dropped
/// old key of an update.
pub(crate) fn apply_change(
    cache: &KeyCache,
    metrics: &WatcherMetrics,
    event: ChangeEvent,
) -> Result<ChangeKind> {
    let change = event.classify().inspect_err(|_| metrics.record_invalid_event())?;

    let applied = match change {
        Change::Insert(record) => decode_key(&record.key).map(|key| {
            cache.insert(&record.set, key);
            ChangeKind::Insert
        }),
        Change::Update { old, new } => {
            let decoded = decode_key(&new.key);
            cache.with_lock(|entries| {
                entries.remove(&old.set, &old.kid);
                decoded.map(|key| {
                    entries.insert(&new.set, key);
                    ChangeKind::Update
                })
            })
        },
        Change::Delete(record) => {
            cache.remove(&record.set, &record.kid);
            Ok(ChangeKind::Delete)
        },
    };

    match &applied {
        Ok(ChangeKind::Insert) => metrics.record_insert(),
        Ok(ChangeKind::Update) => metrics.record_update(),
        Ok(ChangeKind::Delete) => metrics.record_delete(),
        Err(_) => metrics.record_decode_failure(),
    }

    applied
}

/// Computes the delay before resubscription attempt number `attempt`.
///
/// `initial_backoff * 2^attempt`, capped at `max_backoff`, plus 0–50% jitter.
pub(crate) fn compute_backoff(config: &ManagerConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX) / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped.saturating_add(Duration::from_millis(jitter))
    } else {
        capped
    }
}

/// How a change stream stopped being consumed.
enum StreamEnd {
    Cancelled,
    Failed(StorageError),
    Closed,
}

/// Background consumer of the store's change feed.
pub(crate) struct Watcher<S: ?Sized> {
    store: Arc<S>,
    cache: Arc<KeyCache>,
    metrics: Arc<WatcherMetrics>,
    config: ManagerConfig,
    cancel: CancellationToken,
}

impl<S> Watcher<S>
where
    S: KeyRecordStore + ?Sized,
{
    pub(crate) fn new(
        store: Arc<S>,
        cache: Arc<KeyCache>,
        metrics: Arc<WatcherMetrics>,
        config: ManagerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { store, cache, metrics, config, cancel }
    }

    /// Runs until cancelled.
    ///
    /// `initial` is a subscription taken by the caller before it loaded the
    /// cache; when `None` the watcher subscribes itself.
    pub(crate) async fn run(self, initial: Option<ChangeStream>) {
        tracing::info!("key set watcher started");

        let mut pending = initial;
        let mut attempt: u32 = 0;
        let mut resync = false;

        loop {
            let mut stream = match pending.take() {
                Some(stream) => stream,
                None => match self.subscribe().await {
                    Some(Ok(stream)) => stream,
                    Some(Err(err)) => {
                        self.metrics.record_subscribe_failure();
                        tracing::warn!(
                            error = %err,
                            transient = err.is_transient(),
                            attempt,
                            "change feed subscription failed"
                        );
                        if !self.backoff(attempt).await {
                            break;
                        }
                        attempt = attempt.saturating_add(1);
                        continue;
                    },
                    None => break,
                },
            };
            self.metrics.record_subscription();

            if resync {
                match self.resync().await {
                    Some(true) => resync = false,
                    Some(false) => {
                        drop(stream);
                        if !self.backoff(attempt).await {
                            break;
                        }
                        attempt = attempt.saturating_add(1);
                        continue;
                    },
                    None => break,
                }
            }

            match self.consume(&mut stream, &mut attempt).await {
                StreamEnd::Cancelled => break,
                StreamEnd::Failed(err) => {
                    tracing::warn!(error = %err, attempt, "change stream failed, resubscribing");
                },
                StreamEnd::Closed => {
                    tracing::warn!(attempt, "change stream closed, resubscribing");
                },
            }
            drop(stream);

            self.metrics.record_stream_fault();
            resync = self.config.resync_on_resubscribe;

            if !self.backoff(attempt).await {
                break;
            }
            attempt = attempt.saturating_add(1);
        }

        tracing::info!("key set watcher stopped");
    }

    /// Subscribes unless cancelled first. `None` means cancelled.
    async fn subscribe(&self) -> Option<jwks_storage::StorageResult<ChangeStream>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.store.subscribe() => Some(result),
        }
    }

    /// Applies events until the stream fails, closes or the task is
    /// cancelled. Each delivered event resets the backoff.
    async fn consume(&self, stream: &mut ChangeStream, attempt: &mut u32) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return StreamEnd::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    *attempt = 0;
                    self.apply(event);
                },
                Some(Err(err)) => return StreamEnd::Failed(err),
                None => return StreamEnd::Closed,
            }
        }
    }

    fn apply(&self, event: ChangeEvent) {
        match apply_change(&self.cache, &self.metrics, event) {
            Ok(kind) => tracing::debug!(%kind, "applied change event"),
            Err(err) => tracing::error!(error = %err, "skipping change event"),
        }
    }

    /// Rebuilds the cache from a full scan unless cancelled first.
    ///
    /// `None` means cancelled. `Some(false)` means the scan failed and the
    /// cache was left as it was.
    async fn resync(&self) -> Option<bool> {
        let loaded = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            loaded = load_sets(&*self.store) => loaded,
        };

        match loaded {
            Ok(sets) => {
                let set_count = sets.len();
                self.cache.replace_all(sets);
                self.metrics.record_resync();
                tracing::info!(sets = set_count, "key cache resynchronized after resubscribe");
                Some(true)
            },
            Err(err) => {
                self.metrics.record_resync_failure();
                tracing::warn!(error = %err, "key cache resync failed, resubscribing");
                Some(false)
            },
        }
    }

    /// Sleeps before the next subscription attempt. Returns `false` if
    /// cancelled while waiting.
    async fn backoff(&self, attempt: u32) -> bool {
        let delay = compute_backoff(&self.config, attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "watcher backing off");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
