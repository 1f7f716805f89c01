//! Result alias and logging combinators.

use crate::error::Error;

/// The standard Result type for shareform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for logging failures at component boundaries without
/// swallowing them.
pub trait ResultExt<T> {
    /// Emit a `warn!` (retryable) or `error!` (terminal) event tagged with
    /// `operation` when the result is an error, then hand it back unchanged.
    #[must_use]
    fn log_on_error(self, operation: &str) -> Self;

    /// Convert to an `Option`, logging the error if present.
    fn into_option_logged(self, operation: &str) -> Option<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn log_on_error(self, operation: &str) -> Self {
        if let Err(ref e) = self {
            if e.is_retryable() {
                tracing::warn!(operation, error = %e, class = %e.class(), "operation failed");
            } else {
                tracing::error!(operation, error = %e, class = %e.class(), "operation failed");
            }
        }
        self
    }

    fn into_option_logged(self, operation: &str) -> Option<T> {
        self.log_on_error(operation).ok()
    }
}
