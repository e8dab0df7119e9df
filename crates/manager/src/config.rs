//! Configuration for the key manager and its watcher task.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KeyManagerError, Result};

/// Default delay before the first resubscription attempt (100 milliseconds).
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default upper bound on the resubscription delay (10 seconds).
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for [`KeyManager`](crate::KeyManager).
///
/// The watcher never stops retrying; these settings only shape how fast it
/// retries and what it does after reconnecting.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use jwks_manager::ManagerConfig;
///
/// let config = ManagerConfig::builder()
///     .initial_backoff(Duration::from_millis(50))
///     .max_backoff(Duration::from_secs(5))
///     .build()?;
///
/// assert!(config.resync_on_resubscribe());
/// # Ok::<(), jwks_manager::KeyManagerError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Delay before the first resubscription attempt after a fault.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub(crate) initial_backoff: Duration,

    /// Upper bound on the exponential resubscription delay.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub(crate) max_backoff: Duration,

    /// Re-run the loader after resubscribing, so changes committed while the
    /// feed was down are not lost.
    #[serde(default = "default_resync_on_resubscribe")]
    pub(crate) resync_on_resubscribe: bool,
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

fn default_resync_on_resubscribe() -> bool {
    true
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            resync_on_resubscribe: true,
        }
    }
}

#[bon::bon]
impl ManagerConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `initial_backoff` - First resubscription delay (default: 100 milliseconds).
    /// * `max_backoff` - Resubscription delay cap (default: 10 seconds).
    /// * `resync_on_resubscribe` - Reload the cache after reconnecting (default: true).
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Config`] if:
    /// - `initial_backoff` is zero
    /// - `max_backoff` is smaller than `initial_backoff`
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
        #[builder(default = true)] resync_on_resubscribe: bool,
    ) -> Result<Self> {
        let config = Self { initial_backoff, max_backoff, resync_on_resubscribe };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations bypass the builder; call this after
    /// loading one.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(KeyManagerError::Config("initial_backoff must be greater than zero".into()));
        }

        if self.max_backoff < self.initial_backoff {
            return Err(KeyManagerError::Config(format!(
                "max_backoff ({:?}) must be at least initial_backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }

        Ok(())
    }

    /// Returns the first resubscription delay.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the resubscription delay cap.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns whether the cache is reloaded after reconnecting.
    #[must_use]
    pub fn resync_on_resubscribe(&self) -> bool {
        self.resync_on_resubscribe
    }
}
