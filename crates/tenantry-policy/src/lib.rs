//! Tenantry rule catalog.
//!
//! Maps every entity type to a [`SecurityClass`] and every class to the
//! access predicates and permission bits its generated rules carry.
//! The catalog is static; [`check_catalog`] verifies that every predicate
//! compiles for every tenant attribute it can be rendered with.

pub mod catalog;
pub mod error;
pub mod rules;
pub mod validator;

pub use catalog::{classify, Classifier, PARTNER_ENTITY};
pub use error::PolicyError;
pub use rules::{compile_entity_rules, rule_templates, CompiledRule, RuleTemplate};
pub use validator::{check_catalog, CatalogFinding, Severity};

pub use tenantry_core::{AccessMode, PermissionBits, SecurityClass};
