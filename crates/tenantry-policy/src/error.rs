//! Error types for the policy crate.

use tenantry_core::{AccessMode, SecurityClass};
use tenantry_domain::DomainError;
use thiserror::Error;

/// A catalog predicate failed to compile.
#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    #[error("{class} {mode} predicate '{predicate}' for {entity}: {source}")]
    Predicate {
        entity: String,
        class: SecurityClass,
        mode: AccessMode,
        predicate: String,
        #[source]
        source: DomainError,
    },
}
