//! Token stream wrapper for the hand-written parser.

use crate::ParseError;
use std::ops::Range;
use stl_ast::{Span, Spanned};
use stl_lexer::Token;

/// Token stream with one token of lookahead and span tracking.
pub struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    file_id: u16,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [(Token, Range<usize>)], file_id: u16) -> Self {
        Self {
            tokens,
            pos: 0,
            file_id,
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    /// Advance to the next token and return the consumed one.
    pub fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token matches the expected variant.
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Consume the current token if it matches, without erroring.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a specific token and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(ParseError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Expect an identifier and return it with its span.
    pub fn expect_ident(&mut self, context: &str) -> Result<Spanned<String>, ParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => {
                let span = self.current_span();
                let Some(Token::Ident(name)) = self.advance() else {
                    unreachable!("peeked an identifier");
                };
                Ok(Spanned::new(name.clone(), span))
            }
            found => Err(ParseError::unexpected(found, context, self.current_span())),
        }
    }

    /// Expect a string literal and return it with its span.
    pub fn expect_string(&mut self, context: &str) -> Result<Spanned<String>, ParseError> {
        match self.peek() {
            Some(Token::StringLit(_)) => {
                let span = self.current_span();
                let Some(Token::StringLit(value)) = self.advance() else {
                    unreachable!("peeked a string literal");
                };
                Ok(Spanned::new(value.clone(), span))
            }
            found => Err(ParseError::unexpected(found, context, self.current_span())),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Span covering tokens from `start` (a previous `current_pos`) through
    /// the last consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let start_byte = self
            .tokens
            .get(start)
            .map(|(_, span)| span.start as u32)
            .unwrap_or(0);
        let end_byte = if self.pos > 0 {
            self.tokens
                .get(self.pos - 1)
                .map(|(_, span)| span.end as u32)
                .unwrap_or(start_byte)
        } else {
            start_byte
        };
        Span::new(self.file_id, start_byte, end_byte)
    }

    /// Span of the current token, or a zero-length span at EOF.
    pub fn current_span(&self) -> Span {
        if let Some((_, span)) = self.tokens.get(self.pos) {
            Span::new(self.file_id, span.start as u32, span.end as u32)
        } else if let Some((_, span)) = self.tokens.last() {
            Span::new(self.file_id, span.end as u32, span.end as u32)
        } else {
            Span::zero(self.file_id)
        }
    }
}
