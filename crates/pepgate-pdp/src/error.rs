//! PDP client errors.

/// Errors from constructing a PDP client.
///
/// Runtime stream failures surface through
/// [`pepgate_core::DecisionError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PdpError {
    /// Invalid client configuration (bad URL, transport setup failure).
    #[error("invalid PDP configuration: {0}")]
    Config(String),
}
