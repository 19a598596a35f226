//! Value expression parsing: literals, references, message literals, arrays,
//! structs, and qualifier calls.

use crate::stream::TokenStream;
use crate::ParseError;
use stl_ast::{Expr, FieldInit, Literal, Spanned};
use stl_lexer::Token;

/// Parse a parenthesized argument list, or nothing.
///
/// `()`, `(a, b)`, and complete absence of parentheses all parse; absence
/// yields an empty list.
pub(crate) fn parse_call_args(
    stream: &mut TokenStream,
) -> Result<Vec<Spanned<Expr>>, ParseError> {
    let mut args = Vec::new();
    if !stream.eat(&Token::ParenOpen) {
        return Ok(args);
    }
    if stream.eat(&Token::ParenClose) {
        return Ok(args);
    }
    loop {
        args.push(parse_expr(stream)?);
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    stream.expect(Token::ParenClose)?;
    Ok(args)
}

/// Parse a single value expression.
pub(crate) fn parse_expr(stream: &mut TokenStream) -> Result<Spanned<Expr>, ParseError> {
    let start = stream.current_pos();
    let node = match stream.peek() {
        Some(Token::Integer(_) | Token::Boolean(_) | Token::StringLit(_) | Token::Null) => {
            Expr::Literal(parse_literal(stream)?)
        }
        Some(Token::Ampersand) => {
            stream.advance();
            Expr::RefOut(parse_dotted_path(stream)?)
        }
        Some(Token::BracketOpen) => parse_array(stream)?,
        Some(Token::BraceOpen) => Expr::Struct(parse_field_inits(stream)?),
        Some(Token::Ident(_)) => {
            let name = stream.expect_ident("in value position")?;
            match stream.peek() {
                Some(Token::BraceOpen) => Expr::MessageLiteral {
                    name,
                    fields: parse_field_inits(stream)?,
                },
                Some(Token::BracketOpen) => Expr::MessageArray {
                    name,
                    elements: parse_struct_array(stream)?,
                },
                Some(Token::ParenOpen) => {
                    let args = parse_call_args(stream)?;
                    let out = if stream.eat(&Token::Arrow) {
                        Some(stream.expect_ident("after '->'")?)
                    } else {
                        None
                    };
                    Expr::Qualifier { name, args, out }
                }
                Some(Token::Dot) => {
                    let mut path = vec![name.node];
                    while stream.eat(&Token::Dot) {
                        path.push(stream.expect_ident("after '.'")?.node);
                    }
                    Expr::Ref(path)
                }
                _ => Expr::Ref(vec![name.node]),
            }
        }
        found => {
            return Err(ParseError::unexpected(
                found,
                "where a value was expected",
                stream.current_span(),
            ))
        }
    };
    Ok(Spanned::new(node, stream.span_from(start)))
}

/// Parse a literal token into a [`Literal`].
pub(crate) fn parse_literal(stream: &mut TokenStream) -> Result<Literal, ParseError> {
    let span = stream.current_span();
    match stream.advance() {
        Some(Token::Integer(v)) => Ok(Literal::Int(*v)),
        Some(Token::Boolean(v)) => Ok(Literal::Bool(*v)),
        Some(Token::StringLit(v)) => Ok(Literal::Str(v.clone())),
        Some(Token::Null) => Ok(Literal::Null),
        found => Err(ParseError::unexpected(
            found,
            "where a literal was expected",
            span,
        )),
    }
}

/// Parse `name.name...` into path segments.
fn parse_dotted_path(stream: &mut TokenStream) -> Result<Vec<String>, ParseError> {
    let mut path = vec![stream.expect_ident("in reference")?.node];
    while stream.eat(&Token::Dot) {
        path.push(stream.expect_ident("after '.'")?.node);
    }
    Ok(path)
}

/// Parse `[ expr, expr, ]` (trailing comma and empty form allowed).
fn parse_array(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    stream.expect(Token::BracketOpen)?;
    let mut items = Vec::new();
    if stream.eat(&Token::BracketClose) {
        return Ok(Expr::Array(items));
    }
    loop {
        items.push(parse_expr(stream)?);
        if !stream.eat(&Token::Comma) {
            break;
        }
        if stream.check(&Token::BracketClose) {
            break;
        }
    }
    stream.expect(Token::BracketClose)?;
    Ok(Expr::Array(items))
}

/// Parse `{ field = expr; ... }`.
///
/// The semicolon after a field value is required after scalar values but
/// tolerated as absent after nested literals, matching the reference grammar.
pub(crate) fn parse_field_inits(
    stream: &mut TokenStream,
) -> Result<Vec<FieldInit>, ParseError> {
    stream.expect(Token::BraceOpen)?;
    let mut fields = Vec::new();
    while !stream.check(&Token::BraceClose) {
        let name = stream.expect_ident("as a field name")?;
        stream.expect(Token::Equals)?;
        let value = parse_expr(stream)?;
        stream.eat(&Token::Semicolon);
        fields.push(FieldInit { name, value });
    }
    stream.expect(Token::BraceClose)?;
    Ok(fields)
}

/// Parse `[ { ... }, { ... } ]` — the element list of a message-array
/// literal.
fn parse_struct_array(
    stream: &mut TokenStream,
) -> Result<Vec<Vec<FieldInit>>, ParseError> {
    stream.expect(Token::BracketOpen)?;
    let mut elements = Vec::new();
    if stream.eat(&Token::BracketClose) {
        return Ok(elements);
    }
    loop {
        elements.push(parse_field_inits(stream)?);
        if !stream.eat(&Token::Comma) {
            break;
        }
        if stream.check(&Token::BracketClose) {
            break;
        }
    }
    stream.expect(Token::BracketClose)?;
    Ok(elements)
}
