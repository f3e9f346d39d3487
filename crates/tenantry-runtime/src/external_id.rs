//! Stable external identifiers for generated records.

use serde::Serialize;
use std::fmt;
use tenantry_core::RecordId;

use crate::store::{ExternalRef, RecordKind, RecordStore};

/// An identifier name already bound to a different record. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierCollision {
    pub module: String,
    pub name: String,
    /// Where the name currently points.
    pub existing: ExternalRef,
    /// Where it would have pointed.
    pub wanted: ExternalRef,
}

impl fmt::Display for IdentifierCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "external id {}.{} already exists with model {}, res_id {}",
            self.module, self.name, self.existing.entity, self.existing.res_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Already bound to this record.
    Existing,
    Collision(IdentifierCollision),
}

/// Bind `module.name` to the record unless the name is already taken.
pub async fn register_external_id<S: RecordStore + ?Sized>(
    store: &S,
    module: &str,
    name: &str,
    kind: RecordKind,
    id: RecordId,
) -> anyhow::Result<Registration> {
    let wanted = ExternalRef {
        entity: kind.entity().to_string(),
        res_id: id,
    };

    match store.find_external_id(module, name).await? {
        None => {
            store.create_external_id(module, name, &wanted).await?;
            tracing::debug!(module, name, res_id = id, "registered external id");
            Ok(Registration::Created)
        }
        Some(existing) if existing == wanted => Ok(Registration::Existing),
        Some(existing) => {
            let collision = IdentifierCollision {
                module: module.to_string(),
                name: name.to_string(),
                existing,
                wanted,
            };
            tracing::warn!(%collision, "external id collision");
            Ok(Registration::Collision(collision))
        }
    }
}
