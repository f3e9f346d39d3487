//! Error types for the domain crate.

use thiserror::Error;

use crate::grammar::TokenKind;

/// A predicate string is not a well-formed token sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// Token is not part of the vocabulary.
    #[error("unknown token '{token}' in [{tokens}]")]
    UnknownToken { token: String, tokens: String },

    /// A ')' closes more groups than were opened.
    #[error("unmatched ')' at position {position}")]
    UnmatchedClose { position: usize },

    /// Two tokens of the same kind follow each other.
    #[error("two {kind} tokens in a row at position {position}")]
    AdjacentKind { kind: TokenKind, position: usize },

    /// The predicate starts or ends with AND/OR.
    #[error("operator '{token}' at position {position} cannot start or end a predicate")]
    OperatorAtEdge { token: String, position: usize },

    /// AND and OR are mixed inside one bracket level.
    #[error("'{found}' at position {position} mixes with '{expected}' at depth {depth}")]
    MixedOperators {
        expected: String,
        found: String,
        depth: usize,
        position: usize,
    },
}

/// Bracket reduction failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Brackets do not balance.
    #[error("unbalanced brackets: {unclosed} group(s) left open")]
    Unclosed { unclosed: usize },

    /// A ')' has no matching '('.
    #[error("unmatched ')' at position {position}")]
    UnmatchedClose { position: usize },

    /// Two operands without an operator between them.
    #[error("missing operator before position {position}")]
    MissingOperator { position: usize },

    /// An operator without an operand on one side.
    #[error("operator without operand at position {position}")]
    DanglingOperator { position: usize },

    /// A group (or the whole predicate) holds nothing.
    #[error("empty group ending at position {position}")]
    EmptyGroup { position: usize },

    /// AND and OR mixed inside one group.
    #[error("mixed operators in group at position {position}")]
    MixedOperators { position: usize },
}

/// Any failure turning a predicate string into a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("grammar error: {0}")]
    Grammar(#[from] GrammarError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}
