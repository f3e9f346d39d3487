//! Record filters in the host store's prefix (polish) notation.

use serde::Serialize;
use std::fmt;

use crate::grammar::{Atom, Combinator};

/// Relational operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Eq,
    In,
    ParentOf,
    ChildOf,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::In => "in",
            Relation::ParentOf => "parent_of",
            Relation::ChildOf => "child_of",
        }
    }
}

/// Right-hand side of a leaf condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Evaluation-context variable with the actor's allowed tenant ids.
    AllowedTenants,
    /// Evaluation-context variable with the actor's selected tenant id.
    SelectedTenant,
    Bool(bool),
    Int(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::AllowedTenants => f.write_str("company_ids"),
            Value::SelectedTenant => f.write_str("company_id"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
        }
    }
}

/// A `(attribute, relation, value)` leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub field: String,
    pub relation: Relation,
    pub value: Value,
}

impl Condition {
    pub fn new(field: &str, relation: Relation, value: Value) -> Self {
        Self {
            field: field.to_string(),
            relation,
            value,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "('{}','{}',{})",
            self.field,
            self.relation.as_str(),
            self.value
        )
    }
}

/// A rendered record filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every record.
    Always,
    Condition(Condition),
    /// `n` operands joined by one combinator, rendered as `n - 1` prefix
    /// combinators nested to the right.
    Combine {
        combinator: Combinator,
        operands: Vec<Filter>,
    },
}

impl Filter {
    /// Render as the host store's domain string, e.g.
    /// `['&', ('company_id','in',company_ids), ('company_id','=',1)]`.
    pub fn to_domain_string(&self) -> String {
        let mut terms = Vec::new();
        self.push_terms(&mut terms);
        format!("[{}]", terms.join(", "))
    }

    fn push_terms(&self, terms: &mut Vec<String>) {
        match self {
            Filter::Always => terms.push("(1, '=', 1)".to_string()),
            Filter::Condition(c) => terms.push(c.to_string()),
            Filter::Combine {
                combinator,
                operands,
            } => {
                let last = operands.len().saturating_sub(1);
                for (i, operand) in operands.iter().enumerate() {
                    if i < last {
                        terms.push(format!("'{}'", combinator.symbol()));
                    }
                    operand.push_terms(terms);
                }
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_domain_string())
    }
}

/// Per-entity substitutions applied while rendering atoms.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Attribute holding the tenant reference.
    pub tenant_field: &'a str,
    /// Id of the system tenant.
    pub system_tenant: i64,
}

impl<'a> RenderContext<'a> {
    pub fn new(tenant_field: &'a str, system_tenant: i64) -> Self {
        Self {
            tenant_field,
            system_tenant,
        }
    }

    /// The fixed atom to fragment table.
    pub fn render_atom(&self, atom: Atom) -> Filter {
        let field = self.tenant_field;
        let leaf = |relation, value| Filter::Condition(Condition::new(field, relation, value));

        match atom {
            Atom::Unassigned => leaf(Relation::Eq, Value::Bool(false)),
            Atom::AllowedTenants => leaf(Relation::In, Value::AllowedTenants),
            Atom::SelectedTenant => leaf(Relation::Eq, Value::SelectedTenant),
            Atom::SelectedTenantHierarchy => Filter::Combine {
                combinator: Combinator::Or,
                operands: vec![
                    leaf(Relation::Eq, Value::SelectedTenant),
                    leaf(Relation::ParentOf, Value::SelectedTenant),
                    leaf(Relation::ChildOf, Value::SelectedTenant),
                ],
            },
            Atom::SystemTenant => leaf(Relation::Eq, Value::Int(self.system_tenant)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_renders_tautology() {
        assert_eq!(Filter::Always.to_domain_string(), "[(1, '=', 1)]");
    }

    #[test]
    fn test_hierarchy_fragment() {
        let ctx = RenderContext::new("company_id", 1);
        assert_eq!(
            ctx.render_atom(Atom::SelectedTenantHierarchy).to_domain_string(),
            "['|', ('company_id','=',company_id), '|', ('company_id','parent_of',company_id), ('company_id','child_of',company_id)]"
        );
    }

    #[test]
    fn test_unassigned_and_system_tenant() {
        let ctx = RenderContext::new("company_ids", 3);
        assert_eq!(
            ctx.render_atom(Atom::Unassigned).to_string(),
            "[('company_ids','=',False)]"
        );
        assert_eq!(
            ctx.render_atom(Atom::SystemTenant).to_string(),
            "[('company_ids','=',3)]"
        );
    }
}
