//! Error taxonomy for enforced invocations.

/// Failure surfaced to the caller of an enforced function.
///
/// Every internal denial reason (non-PERMIT verdict, unhandled obligation,
/// exhausted PDP connection) converges to [`EnforcementError::AccessDenied`];
/// the specific reason is logged, not exposed.
#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    /// The single user-visible denial outcome.
    #[error("access denied")]
    AccessDenied,

    /// A subject function or field override failed. Fatal for the call and
    /// fail-closed: the wrapped function does not run.
    #[error("enforcement configuration error: {0}")]
    Configuration(#[source] anyhow::Error),

    /// The wrapped function failed and no error handler substituted a
    /// result; the original error is re-raised here.
    #[error(transparent)]
    Application(anyhow::Error),
}

impl EnforcementError {
    /// True when the outcome is the fixed "access denied" failure.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::AccessDenied)
    }
}
