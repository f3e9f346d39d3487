//! # tenantry-domain
//!
//! The access predicate mini-language and its compiler to record filters.
//!
//! Predicates are written as a flat, space-separated token list:
//!
//! ```text
//! system_company OR ( allowed_companies AND selected_company/parent/child )
//! ```
//!
//! Compilation runs in three stages:
//!
//! | Stage | Function | Output |
//! |-------|----------|--------|
//! | Tokenize and validate | [`Predicate::parse`] | [`Token`] list |
//! | Bracket reduction | [`compile`] | [`Expr`] tree |
//! | Rendering | [`Expr::render`] | [`Filter`] in prefix (polish) form |
//!
//! The rendered filter for `allowed_companies AND selected_company/parent/child`
//! on an entity whose tenant attribute is `company_id`:
//!
//! ```text
//! ['&', ('company_id','in',company_ids), '|', ('company_id','=',company_id), '|', ('company_id','parent_of',company_id), ('company_id','child_of',company_id)]
//! ```

pub mod compiler;
pub mod error;
pub mod filter;
pub mod grammar;

pub use compiler::{compile, Expr};
pub use error::{CompileError, DomainError, GrammarError};
pub use filter::{Condition, Filter, Relation, RenderContext, Value};
pub use grammar::{
    check_uniform_operators, tokenize, validate_tokens, Atom, Combinator, Predicate, Token,
    TokenKind,
};
