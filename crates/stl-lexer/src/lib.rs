//! Lexer for STL (.stl files)
//!
//! Uses Logos for fast, compile-time optimized tokenization. Whitespace and
//! `//` line comments are skipped; everything else becomes a [`Token`] paired
//! with its byte span.

use logos::{Logos, Span};

/// Token type for STL
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // === Keywords ===
    #[token("bool")]
    BoolType,
    #[token("const")]
    Const,
    #[token("encode")]
    Encode,
    #[token("error_states")]
    ErrorStates,
    #[token("event")]
    Event,
    #[token("events")]
    Events,
    #[token("external")]
    External,
    #[token("int")]
    IntType,
    #[token("message")]
    Message,
    #[token("module")]
    Module,
    #[token("optional")]
    Optional,
    #[token("post_states")]
    PostStates,
    #[token("pre_states")]
    PreStates,
    #[token("qualifier")]
    Qualifier,
    #[token("repeated")]
    Repeated,
    #[token("required")]
    Required,
    #[token("role")]
    Role,
    #[token("state")]
    State,
    #[token("string")]
    StringType,
    #[token("transition")]
    Transition,

    // === Literals ===
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),

    #[token("null")]
    Null,

    /// Integer literal. The leading sign is lexed so the checker can reject
    /// it with a pointed message; only non-negative values are accepted
    /// downstream.
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),

    /// Double-quoted string literal; a backslash escapes the next character.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StringLit(String),

    // === Identifiers ===
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Punctuation ===
    #[token("{")]
    BraceOpen,
    #[token("}")]
    BraceClose,
    #[token("[")]
    BracketOpen,
    #[token("]")]
    BracketClose,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("=")]
    Equals,
    #[token("&")]
    Ampersand,
    #[token("*")]
    Star,
    #[token("->")]
    Arrow,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::BoolType => write!(f, "bool"),
            Token::Const => write!(f, "const"),
            Token::Encode => write!(f, "encode"),
            Token::ErrorStates => write!(f, "error_states"),
            Token::Event => write!(f, "event"),
            Token::Events => write!(f, "events"),
            Token::External => write!(f, "external"),
            Token::IntType => write!(f, "int"),
            Token::Message => write!(f, "message"),
            Token::Module => write!(f, "module"),
            Token::Optional => write!(f, "optional"),
            Token::PostStates => write!(f, "post_states"),
            Token::PreStates => write!(f, "pre_states"),
            Token::Qualifier => write!(f, "qualifier"),
            Token::Repeated => write!(f, "repeated"),
            Token::Required => write!(f, "required"),
            Token::Role => write!(f, "role"),
            Token::State => write!(f, "state"),
            Token::StringType => write!(f, "string"),
            Token::Transition => write!(f, "transition"),
            Token::Boolean(v) => write!(f, "{v}"),
            Token::Null => write!(f, "null"),
            Token::Integer(v) => write!(f, "{v}"),
            Token::StringLit(v) => write!(f, "{v:?}"),
            Token::Ident(v) => write!(f, "{v}"),
            Token::BraceOpen => write!(f, "{{"),
            Token::BraceClose => write!(f, "}}"),
            Token::BracketOpen => write!(f, "["),
            Token::BracketClose => write!(f, "]"),
            Token::ParenOpen => write!(f, "("),
            Token::ParenClose => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
            Token::Equals => write!(f, "="),
            Token::Ampersand => write!(f, "&"),
            Token::Star => write!(f, "*"),
            Token::Arrow => write!(f, "->"),
        }
    }
}

/// Strip the surrounding quotes and resolve `\c` escapes.
fn unescape(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Tokenize source code into a vector of tokens with byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                return Err(LexError {
                    span: lexer.span(),
                    slice: lexer.slice().to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

/// Error during lexing: an unexpected character or an unterminated string.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub slice: String,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unexpected character(s) '{}' at byte {}",
            self.slice, self.span.start
        )
    }
}

impl std::error::Error for LexError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords() {
        let toks = tokens("module role state transition event message");
        assert_eq!(
            toks,
            vec![
                Token::Module,
                Token::Role,
                Token::State,
                Token::Transition,
                Token::Event,
                Token::Message,
            ]
        );
    }

    #[test]
    fn test_state_section_keywords() {
        let toks = tokens("pre_states events post_states error_states");
        assert_eq!(
            toks,
            vec![
                Token::PreStates,
                Token::Events,
                Token::PostStates,
                Token::ErrorStates,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let toks = tokens("42 0 -17");
        assert_eq!(
            toks,
            vec![Token::Integer(42), Token::Integer(0), Token::Integer(-17)]
        );
    }

    #[test]
    fn test_booleans_and_null() {
        let toks = tokens("true false null");
        assert_eq!(
            toks,
            vec![Token::Boolean(true), Token::Boolean(false), Token::Null]
        );
    }

    #[test]
    fn test_string_literal() {
        let toks = tokens(r#""hello world""#);
        assert_eq!(toks, vec![Token::StringLit("hello world".to_string())]);
    }

    #[test]
    fn test_string_escapes() {
        let toks = tokens(r#""a \"quoted\" word and a \\ slash""#);
        assert_eq!(
            toks,
            vec![Token::StringLit(r#"a "quoted" word and a \ slash"#.to_string())]
        );
    }

    #[test]
    fn test_identifiers() {
        let toks = tokens("rSender sTlsState kNotConnected _private");
        assert_eq!(
            toks,
            vec![
                Token::Ident("rSender".to_string()),
                Token::Ident("sTlsState".to_string()),
                Token::Ident("kNotConnected".to_string()),
                Token::Ident("_private".to_string()),
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        let toks = tokens("states rolex");
        assert_eq!(
            toks,
            vec![
                Token::Ident("states".to_string()),
                Token::Ident("rolex".to_string()),
            ]
        );
    }

    #[test]
    fn test_punctuation() {
        let toks = tokens("{ } [ ] ( ) , ; . = & *");
        assert_eq!(
            toks,
            vec![
                Token::BraceOpen,
                Token::BraceClose,
                Token::BracketOpen,
                Token::BracketClose,
                Token::ParenOpen,
                Token::ParenClose,
                Token::Comma,
                Token::Semicolon,
                Token::Dot,
                Token::Equals,
                Token::Ampersand,
                Token::Star,
            ]
        );
    }

    #[test]
    fn test_arrow() {
        let toks = tokens("rSender -> TlsConnect -> rReceiver");
        assert_eq!(toks[1], Token::Arrow);
        assert_eq!(toks[3], Token::Arrow);
    }

    #[test]
    fn test_comments_skipped() {
        let toks = tokens("role // a comment\nstate");
        assert_eq!(toks, vec![Token::Role, Token::State]);
    }

    #[test]
    fn test_event_line() {
        let toks = tokens("rSender -> SendRequest(mRequest { requestId = 1; }) -> rReceiver;");
        assert!(toks.contains(&Token::Arrow));
        assert!(toks.contains(&Token::Ident("SendRequest".to_string())));
        assert!(toks.contains(&Token::Integer(1)));
    }

    #[test]
    fn test_unterminated_string_fails() {
        assert!(lex(r#""no closing quote"#).is_err());
    }

    #[test]
    fn test_unexpected_character_fails() {
        let err = lex("role %").unwrap_err();
        assert_eq!(err.slice, "%");
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let spanned = lex("module tls;").unwrap();
        assert_eq!(spanned[0].1, 0..6);
        assert_eq!(spanned[1].1, 7..10);
        assert_eq!(spanned[2].1, 10..11);
    }
}
