//! Hand-written recursive descent parser for STL.
//!
//! One token of lookahead over a [`TokenStream`] of `(Token, byte_span)`
//! pairs produced by `stl_lexer::lex`. Parsing is fail-fast: the first
//! grammar violation is returned as a [`ParseError`] carrying a span.
//!
//! ## Module layout
//!
//! - `stream`: TokenStream wrapper with lookahead
//! - `error`: ParseError
//! - `decl`: declaration parsers (keyword-dispatched)
//! - `expr`: value expressions, message literals, qualifier calls

mod decl;
mod error;
mod expr;
mod stream;

pub use error::{ParseError, ParseErrorKind};
use stream::TokenStream;

use std::ops::Range;
use stl_ast::ModuleSyntax;
use stl_lexer::Token;

/// Parse one `.stl` file's tokens into a module tree.
pub fn parse_module(
    tokens: &[(Token, Range<usize>)],
    file_id: u16,
) -> Result<ModuleSyntax, ParseError> {
    let mut stream = TokenStream::new(tokens, file_id);
    decl::parse_module(&mut stream)
}

/// Lex and parse STL source in one step.
///
/// Lexer failures are reported as [`ParseError`]s at the offending byte so
/// callers get a single error channel.
pub fn parse_source(source: &str, file_id: u16) -> Result<ModuleSyntax, ParseError> {
    let tokens = stl_lexer::lex(source).map_err(|e| ParseError::from_lex(&e, file_id))?;
    parse_module(&tokens, file_id)
}
