//! CLI command implementations.

pub mod check;
pub mod classify;
pub mod compile;
pub mod secure;
