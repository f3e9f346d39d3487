//! Token vocabulary and structural validation of access predicates.

use serde::Serialize;
use std::fmt;

use crate::compiler::{compile, Expr};
use crate::error::{CompileError, DomainError, GrammarError};
use crate::filter::{Filter, RenderContext};

/// Boolean combinator joining operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    /// Keyword in predicate strings.
    pub fn keyword(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }

    /// Prefix symbol in rendered filters.
    pub fn symbol(&self) -> &'static str {
        match self {
            Combinator::And => "&",
            Combinator::Or => "|",
        }
    }
}

/// Named predicate atom. Each renders to a fixed filter fragment over the
/// entity's tenant attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Atom {
    /// Tenant attribute is unset.
    Unassigned,
    /// Tenant attribute is one of the actor's allowed tenants.
    AllowedTenants,
    /// Tenant attribute is the actor's selected tenant.
    SelectedTenant,
    /// Tenant attribute is the selected tenant, one of its ancestors, or one of its descendants.
    SelectedTenantHierarchy,
    /// Tenant attribute is the system tenant.
    SystemTenant,
}

impl Atom {
    pub const ALL: [Atom; 5] = [
        Atom::Unassigned,
        Atom::AllowedTenants,
        Atom::SelectedTenant,
        Atom::SelectedTenantHierarchy,
        Atom::SystemTenant,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            Atom::Unassigned => "false",
            Atom::AllowedTenants => "allowed_companies",
            Atom::SelectedTenant => "selected_company",
            Atom::SelectedTenantHierarchy => "selected_company/parent/child",
            Atom::SystemTenant => "system_company",
        }
    }
}

/// Structural category of a token. Adjacent tokens never share a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Parenthesis,
    Operator,
    Expression,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenKind::Parenthesis => "parenthesis",
            TokenKind::Operator => "operator",
            TokenKind::Expression => "expression",
        })
    }
}

/// One token of a predicate string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Open,
    Close,
    Operator(Combinator),
    Atom(Atom),
}

impl Token {
    /// Look up a word in the vocabulary.
    pub fn from_word(word: &str) -> Option<Token> {
        match word {
            "(" => Some(Token::Open),
            ")" => Some(Token::Close),
            "AND" => Some(Token::Operator(Combinator::And)),
            "OR" => Some(Token::Operator(Combinator::Or)),
            _ => Atom::ALL
                .iter()
                .find(|atom| atom.keyword() == word)
                .map(|atom| Token::Atom(*atom)),
        }
    }

    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Open | Token::Close => TokenKind::Parenthesis,
            Token::Operator(_) => TokenKind::Operator,
            Token::Atom(_) => TokenKind::Expression,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Open => "(",
            Token::Close => ")",
            Token::Operator(c) => c.keyword(),
            Token::Atom(a) => a.keyword(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a predicate on single spaces and map every word to a token.
pub fn tokenize(predicate: &str) -> Result<Vec<Token>, GrammarError> {
    let words: Vec<&str> = predicate.split(' ').collect();
    words
        .iter()
        .map(|word| {
            Token::from_word(word).ok_or_else(|| GrammarError::UnknownToken {
                token: word.to_string(),
                tokens: words.join(", "),
            })
        })
        .collect()
}

/// Check the structural rules of a token list:
///
/// - bracket depth never goes negative,
/// - two tokens of the same kind are never adjacent,
/// - the first and last tokens are not operators.
///
/// Balance at the end is left to [`compile`].
pub fn validate_tokens(tokens: &[Token]) -> Result<(), GrammarError> {
    let last = tokens.len().saturating_sub(1);
    let mut depth: usize = 0;
    let mut last_kind: Option<TokenKind> = None;

    for (position, token) in tokens.iter().enumerate() {
        let kind = token.kind();

        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(GrammarError::UnmatchedClose { position })?;
            }
            _ => {}
        }

        if last_kind == Some(kind) {
            return Err(GrammarError::AdjacentKind { kind, position });
        }

        if (position == 0 || position == last) && kind == TokenKind::Operator {
            return Err(GrammarError::OperatorAtEdge {
                token: token.to_string(),
                position,
            });
        }

        last_kind = Some(kind);
    }

    Ok(())
}

/// Reject AND and OR appearing at the same bracket level.
///
/// Kind alternation does not imply this (`a AND b OR c` alternates), so it
/// is checked on its own.
pub fn check_uniform_operators(tokens: &[Token]) -> Result<(), GrammarError> {
    let mut levels: Vec<Option<Combinator>> = vec![None];

    for (position, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => levels.push(None),
            Token::Close if levels.len() > 1 => {
                levels.pop();
            }
            Token::Operator(found) => {
                let depth = levels.len() - 1;
                if let Some(level) = levels.last_mut() {
                    match level {
                        None => *level = Some(*found),
                        Some(expected) if expected != found => {
                            return Err(GrammarError::MixedOperators {
                                expected: expected.keyword().to_string(),
                                found: found.keyword().to_string(),
                                depth,
                                position,
                            });
                        }
                        Some(_) => {}
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// A validated access predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    source: String,
    tokens: Vec<Token>,
}

impl Predicate {
    /// Tokenize and validate a predicate string.
    pub fn parse(source: &str) -> Result<Self, GrammarError> {
        let tokens = tokenize(source)?;
        validate_tokens(&tokens)?;
        check_uniform_operators(&tokens)?;
        Ok(Self {
            source: source.to_string(),
            tokens,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn compile(&self) -> Result<Expr, CompileError> {
        compile(&self.tokens)
    }

    /// Parse, compile and render in one step.
    pub fn render(source: &str, ctx: &RenderContext<'_>) -> Result<Filter, DomainError> {
        let predicate = Self::parse(source)?;
        let expr = predicate.compile()?;
        Ok(expr.render(ctx))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
