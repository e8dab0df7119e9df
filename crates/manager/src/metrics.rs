//! Counters for the watcher task.
//!
//! The watcher never reports errors to a caller, so these counters (and the
//! log lines emitted next to each increment) are how operators see faults,
//! skipped records and resynchronizations.
//!
//! # Examples
//!
//! ```
//! use jwks_manager::WatcherMetrics;
//!
//! let metrics = WatcherMetrics::new();
//! metrics.record_stream_fault();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.stream_faults, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live watcher counters.
#[derive(Debug, Default)]
pub struct WatcherMetrics {
    inserts_applied: AtomicU64,
    updates_applied: AtomicU64,
    deletes_applied: AtomicU64,
    decode_failures: AtomicU64,
    invalid_events: AtomicU64,
    stream_faults: AtomicU64,
    subscribe_failures: AtomicU64,
    subscriptions: AtomicU64,
    resyncs: AtomicU64,
    resync_failures: AtomicU64,
}

/// Point-in-time copy of [`WatcherMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct WatcherMetricsSnapshot {
    /// Insert events applied to the cache.
    #[builder(default)]
    pub inserts_applied: u64,
    /// Update events applied to the cache.
    #[builder(default)]
    pub updates_applied: u64,
    /// Delete events applied to the cache.
    #[builder(default)]
    pub deletes_applied: u64,
    /// Events skipped because their key material could not be decoded.
    #[builder(default)]
    pub decode_failures: u64,
    /// Events skipped because they carried neither an old nor a new record.
    #[builder(default)]
    pub invalid_events: u64,
    /// Change streams that errored or ended.
    #[builder(default)]
    pub stream_faults: u64,
    /// Failed subscription attempts.
    #[builder(default)]
    pub subscribe_failures: u64,
    /// Successful subscriptions, the first one included.
    #[builder(default)]
    pub subscriptions: u64,
    /// Completed cache reloads after a resubscription.
    #[builder(default)]
    pub resyncs: u64,
    /// Failed cache reloads after a resubscription.
    #[builder(default)]
    pub resync_failures: u64,
}

impl WatcherMetricsSnapshot {
    /// Total events applied to the cache.
    #[must_use]
    pub fn events_applied(&self) -> u64 {
        self.inserts_applied + self.updates_applied + self.deletes_applied
    }

    /// Total events skipped.
    #[must_use]
    pub fn events_skipped(&self) -> u64 {
        self.decode_failures + self.invalid_events
    }
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        #[doc = concat!("Increments `", stringify!($field), "`.")]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl WatcherMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_insert, inserts_applied);
    counter!(record_update, updates_applied);
    counter!(record_delete, deletes_applied);
    counter!(record_decode_failure, decode_failures);
    counter!(record_invalid_event, invalid_events);
    counter!(record_stream_fault, stream_faults);
    counter!(record_subscribe_failure, subscribe_failures);
    counter!(record_subscription, subscriptions);
    counter!(record_resync, resyncs);
    counter!(record_resync_failure, resync_failures);

    /// Returns a copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> WatcherMetricsSnapshot {
        WatcherMetricsSnapshot {
            inserts_applied: self.inserts_applied.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            deletes_applied: self.deletes_applied.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            invalid_events: self.invalid_events.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            resync_failures: self.resync_failures.load(Ordering::Relaxed),
        }
    }
}
