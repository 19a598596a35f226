//! Link and type errors.

use stl_ast::Span;
use thiserror::Error;

/// Error produced while linking: duplicate names, unresolved references,
/// arity mismatches, cyclic constants.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("link error: {message}")]
pub struct LinkError {
    pub span: Span,
    pub message: String,
}

impl LinkError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    /// Unresolved reference, with an optional closest-candidate suggestion.
    pub fn unresolved(
        kind: &str,
        name: &str,
        suggestion: Option<String>,
        span: Span,
    ) -> Self {
        let message = match suggestion {
            Some(candidate) => {
                format!("cannot find a {kind}: {name}. Did you mean {candidate}?")
            }
            None => format!("cannot find a {kind}: {name}"),
        };
        Self::new(message, span)
    }

    pub fn duplicate(module: &str, name: &str, span: Span) -> Self {
        Self::new(
            format!("duplicated name in module '{module}': {name}"),
            span,
        )
    }

    pub fn arity(name: &str, expected: usize, got: usize, span: Span) -> Self {
        Self::new(
            format!("wrong number of arguments for {name}: expected {expected}, got {got}"),
            span,
        )
    }
}

/// Error produced by the type checker.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("type error in {context}: expected {expected}, got {got}")]
pub struct TypeError {
    pub span: Span,
    /// Where the mismatch happened, e.g. `transition tFoo, event 0`.
    pub context: String,
    pub expected: String,
    pub got: String,
}

impl TypeError {
    pub fn new(
        context: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            span,
            context: context.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Either phase of static checking.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::Link(e) => e.span,
            CompileError::Type(e) => e.span,
        }
    }
}
