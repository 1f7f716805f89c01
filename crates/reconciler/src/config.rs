//! Reconciler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shareform_core::{Error, Result};

/// Configuration for the reconciler and its controller loop.
///
/// Loadable from TOML; every field has a default, so an empty document is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Deadline for each backend call.
    pub call_timeout_ms: u64,
    /// First backoff after a degraded or retryable pass.
    pub retry_base_ms: u64,
    /// Backoff ceiling.
    pub retry_max_ms: u64,
    /// Requeue delay after a pass that applied every planned mutation.
    pub progress_requeue_ms: u64,
    /// Passes allowed to run at once across identities.
    pub max_concurrent_passes: usize,
    /// Upper bound on pages read per inventory listing.
    pub max_inventory_pages: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            retry_base_ms: 1_000,
            retry_max_ms: 300_000,
            progress_requeue_ms: 5_000,
            max_concurrent_passes: 4,
            max_inventory_pages: 1_000,
        }
    }
}

impl ReconcilerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the document does not parse or a
    /// bound is unusable.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(document).map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds the loop cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(Error::invalid_config("call_timeout_ms must be positive"));
        }
        if self.max_concurrent_passes == 0 {
            return Err(Error::invalid_config("max_concurrent_passes must be positive"));
        }
        if self.max_inventory_pages == 0 {
            return Err(Error::invalid_config("max_inventory_pages must be positive"));
        }
        if self.retry_base_ms == 0 || self.retry_base_ms > self.retry_max_ms {
            return Err(Error::invalid_config(format!(
                "retry_base_ms ({}) must be positive and not exceed retry_max_ms ({})",
                self.retry_base_ms, self.retry_max_ms
            )));
        }
        Ok(())
    }

    /// Deadline for one backend call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Base retry delay.
    #[must_use]
    pub const fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Requeue delay after clean progress.
    #[must_use]
    pub const fn progress_requeue(&self) -> Duration {
        Duration::from_millis(self.progress_requeue_ms)
    }

    /// Exponential backoff for the `attempt`-th consecutive failure
    /// (0-based), capped at `retry_max_ms`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .retry_base_ms
            .saturating_mul(factor)
            .min(self.retry_max_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ReconcilerConfig::from_toml_str("");
        assert_eq!(config.ok(), Some(ReconcilerConfig::default()));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = ReconcilerConfig::from_toml_str(
            "call_timeout_ms = 250\nmax_concurrent_passes = 8\n",
        )
        .ok();
        assert_eq!(config.as_ref().map(|c| c.call_timeout_ms), Some(250));
        assert_eq!(config.as_ref().map(|c| c.max_concurrent_passes), Some(8));
        assert_eq!(config.map(|c| c.retry_base_ms), Some(1_000));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = ReconcilerConfig::from_toml_str("max_concurrent_passes = 0");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn base_above_max_is_rejected() {
        let result = ReconcilerConfig::from_toml_str("retry_base_ms = 10\nretry_max_ms = 5");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn garbage_is_rejected() {
        let result = ReconcilerConfig::from_toml_str("call_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let config = ReconcilerConfig {
            retry_base_ms: 100,
            retry_max_ms: 1_000,
            ..ReconcilerConfig::default()
        };
        assert_eq!(config.retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(800));
        assert_eq!(config.retry_delay(4), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(90), Duration::from_millis(1_000));
    }
}
