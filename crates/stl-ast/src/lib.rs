//! Syntax tree and source-location foundation for the State Transition
//! Language (STL).
//!
//! An STL file declares one module: a namespaced set of constants, roles,
//! states, messages, qualifiers, events, and transitions. The parser produces
//! a [`ModuleSyntax`] per file; the linker consumes those trees and produces
//! a resolved program.
//!
//! This crate also owns the span machinery ([`Span`], [`SourceMap`]) shared
//! by every later stage, and a canonical pretty-printer ([`print`]) used by
//! round-trip tests.

pub mod ast;
pub mod print;
mod span;

pub use ast::*;
pub use span::{SourceFile, SourceMap, Span};

/// A node paired with its source span.
///
/// Equality compares only the node, not the span, so trees that differ only
/// in layout compare equal. Round-trip tests rely on this.
#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

impl<T: PartialEq> PartialEq for Spanned<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T: Eq> Eq for Spanned<T> {}
