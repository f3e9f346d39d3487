//! Bracket reduction of token lists into expression trees.
//!
//! The grammar allows at most one combinator per bracket level, so no
//! precedence climbing is needed: every group is a flat
//! `operand (op operand)*` sequence. An explicit stack holds one accumulator
//! per open group; closing a group reduces its accumulator to one operand of
//! the enclosing group.

use serde::Serialize;

use crate::error::CompileError;
use crate::filter::{Filter, RenderContext};
use crate::grammar::{Atom, Combinator, Token};

/// Compiled predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Atom(Atom),
    Group {
        combinator: Combinator,
        operands: Vec<Expr>,
    },
}

impl Expr {
    /// Render into a record filter, substituting the tenant attribute.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Filter {
        match self {
            Expr::Atom(atom) => ctx.render_atom(*atom),
            Expr::Group {
                combinator,
                operands,
            } => Filter::Combine {
                combinator: *combinator,
                operands: operands.iter().map(|e| e.render(ctx)).collect(),
            },
        }
    }
}

enum Item {
    Operand(Expr),
    Operator(Combinator),
}

/// Reduce a token list to an expression tree.
pub fn compile(tokens: &[Token]) -> Result<Expr, CompileError> {
    let mut stack: Vec<Vec<(usize, Item)>> = vec![Vec::new()];

    for (position, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => stack.push(Vec::new()),
            Token::Close => {
                if stack.len() == 1 {
                    return Err(CompileError::UnmatchedClose { position });
                }
                let group = stack.pop().unwrap_or_default();
                let expr = reduce(group, position)?;
                if let Some(parent) = stack.last_mut() {
                    parent.push((position, Item::Operand(expr)));
                }
            }
            Token::Operator(c) => push(&mut stack, position, Item::Operator(*c)),
            Token::Atom(a) => push(&mut stack, position, Item::Operand(Expr::Atom(*a))),
        }
    }

    if stack.len() != 1 {
        return Err(CompileError::Unclosed {
            unclosed: stack.len() - 1,
        });
    }

    let root = stack.pop().unwrap_or_default();
    let expr = reduce(root, tokens.len())?;
    tracing::trace!(?expr, "compiled predicate");
    Ok(expr)
}

fn push(stack: &mut [Vec<(usize, Item)>], position: usize, item: Item) {
    if let Some(level) = stack.last_mut() {
        level.push((position, item));
    }
}

fn reduce(items: Vec<(usize, Item)>, end: usize) -> Result<Expr, CompileError> {
    let mut operands = Vec::new();
    let mut combinator: Option<Combinator> = None;
    let mut expect_operand = true;

    for (position, item) in items {
        match item {
            Item::Operand(expr) if expect_operand => {
                operands.push(expr);
                expect_operand = false;
            }
            Item::Operand(_) => return Err(CompileError::MissingOperator { position }),
            Item::Operator(_) if expect_operand => {
                return Err(CompileError::DanglingOperator { position });
            }
            Item::Operator(c) => {
                match combinator {
                    Some(previous) if previous != c => {
                        return Err(CompileError::MixedOperators { position });
                    }
                    _ => combinator = Some(c),
                }
                expect_operand = true;
            }
        }
    }

    if operands.is_empty() {
        return Err(CompileError::EmptyGroup { position: end });
    }
    if expect_operand {
        return Err(CompileError::DanglingOperator { position: end });
    }

    match combinator {
        None => Ok(operands.remove(0)),
        Some(combinator) => Ok(Expr::Group {
            combinator,
            operands,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::tokenize;

    fn compile_str(s: &str) -> Result<Expr, CompileError> {
        compile(&tokenize(s).unwrap())
    }

    #[test]
    fn test_single_atom() {
        assert_eq!(
            compile_str("allowed_companies").unwrap(),
            Expr::Atom(Atom::AllowedTenants)
        );
    }

    #[test]
    fn test_parenthesised_atom_collapses() {
        assert_eq!(
            compile_str("( system_company )").unwrap(),
            Expr::Atom(Atom::SystemTenant)
        );
    }

    #[test]
    fn test_nested_group() {
        let expr = compile_str("false OR ( allowed_companies AND selected_company/parent/child )")
            .unwrap();
        assert_eq!(
            expr,
            Expr::Group {
                combinator: Combinator::Or,
                operands: vec![
                    Expr::Atom(Atom::Unassigned),
                    Expr::Group {
                        combinator: Combinator::And,
                        operands: vec![
                            Expr::Atom(Atom::AllowedTenants),
                            Expr::Atom(Atom::SelectedTenantHierarchy),
                        ],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_unclosed_group() {
        assert_eq!(
            compile_str("( false OR system_company"),
            Err(CompileError::Unclosed { unclosed: 1 })
        );
    }

    #[test]
    fn test_unmatched_close() {
        assert_eq!(
            compile_str("false )"),
            Err(CompileError::UnmatchedClose { position: 1 })
        );
    }

    #[test]
    fn test_missing_operator_between_group_and_atom() {
        // Passes kind alternation, but has no operator.
        assert_eq!(
            compile_str("false ( system_company )"),
            Err(CompileError::MissingOperator { position: 3 })
        );
    }

    #[test]
    fn test_operator_first_in_group() {
        assert_eq!(
            compile_str("( AND false )"),
            Err(CompileError::DanglingOperator { position: 1 })
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(compile(&[]), Err(CompileError::EmptyGroup { position: 0 }));
    }

    #[test]
    fn test_mixed_operators() {
        assert_eq!(
            compile_str("false AND system_company OR selected_company"),
            Err(CompileError::MixedOperators { position: 3 })
        );
    }
}
