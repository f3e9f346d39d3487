//! Error types for the runtime crate.

use thiserror::Error;

/// Errors that abort reconciliation of one entity type (or, before any
/// entity type is processed, the whole pass).
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The host store refused or failed a call.
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// A name about to be interpolated into SQL is not a plain identifier.
    #[error("invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),
}
