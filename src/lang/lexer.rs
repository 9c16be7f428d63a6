//! Tokenizer shared by path and script expressions
//!
//! Single pass over the input, byte positions kept for error reporting.
//! `-` immediately followed by `>` is always the path arrow, so `A->B` never
//! lexes as subtraction.

use crate::error::{BindError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    /// `->` path separator
    Arrow,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    /// `??` null coalescing
    Coalesce,
    Question,
    Colon,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Number(n) => format!("number {}", n),
            Token::Str(_) => "string literal".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Arrow => "->",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::LtEq => "<=",
            Token::Gt => ">",
            Token::GtEq => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Coalesce => "??",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Ident(_) | Token::Number(_) | Token::Str(_) => "",
        }
    }
}

/// Token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

pub fn is_ident_continue(ch: char) -> bool {
    ch == '_' || ch.is_alphanumeric()
}

/// Valid identifier: `[A-Za-z_][A-Za-z0-9_]*` (unicode letters allowed)
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_ident_start(first) => chars.all(is_ident_continue),
        _ => false,
    }
}

/// Tokenize an expression
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    let error = |pos: usize, details: String| BindError::InvalidExpression {
        expression: source.to_string(),
        position: pos,
        details,
    };

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if is_ident_start(ch) {
            let mut end = pos;
            while let Some(&(i, c)) = chars.peek() {
                if !is_ident_continue(c) {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(Spanned {
                token: Token::Ident(source[pos..end].to_string()),
                pos,
            });
            continue;
        }

        let starts_number = ch.is_ascii_digit()
            || (ch == '.' && source[pos + 1..].starts_with(|c: char| c.is_ascii_digit()));
        if starts_number {
            let mut end = pos;
            let mut seen_exponent = false;
            while let Some(&(i, c)) = chars.peek() {
                let accept = c.is_ascii_digit()
                    || c == '.'
                    || (!seen_exponent && (c == 'e' || c == 'E'))
                    || ((c == '+' || c == '-') && matches!(source[..i].chars().last(), Some('e' | 'E')));
                if !accept {
                    break;
                }
                if c == 'e' || c == 'E' {
                    seen_exponent = true;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            let text = &source[pos..end];
            let value: f64 = text
                .parse()
                .map_err(|_| error(pos, format!("malformed number '{}'", text)))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                pos,
            });
            continue;
        }

        if ch == '\'' || ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, 'r')) => text.push('\r'),
                        Some((_, other)) => text.push(other),
                        None => break,
                    },
                    c if c == ch => {
                        closed = true;
                        break;
                    }
                    c => text.push(c),
                }
            }
            if !closed {
                return Err(error(pos, "unterminated string literal".to_string()));
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                pos,
            });
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, c)| c);
        let (token, two_char) = match (ch, next) {
            ('-', Some('>')) => (Token::Arrow, true),
            ('=', Some('=')) => (Token::EqEq, true),
            ('!', Some('=')) => (Token::NotEq, true),
            ('<', Some('=')) => (Token::LtEq, true),
            ('>', Some('=')) => (Token::GtEq, true),
            ('&', Some('&')) => (Token::AndAnd, true),
            ('|', Some('|')) => (Token::OrOr, true),
            ('?', Some('?')) => (Token::Coalesce, true),
            ('{', _) => (Token::LBrace, false),
            ('}', _) => (Token::RBrace, false),
            ('(', _) => (Token::LParen, false),
            (')', _) => (Token::RParen, false),
            (',', _) => (Token::Comma, false),
            ('+', _) => (Token::Plus, false),
            ('-', _) => (Token::Minus, false),
            ('*', _) => (Token::Star, false),
            ('/', _) => (Token::Slash, false),
            ('%', _) => (Token::Percent, false),
            ('!', _) => (Token::Bang, false),
            ('<', _) => (Token::Lt, false),
            ('>', _) => (Token::Gt, false),
            ('?', _) => (Token::Question, false),
            (':', _) => (Token::Colon, false),
            ('=', _) => return Err(error(pos, "assignment is not allowed, use '=='".to_string())),
            (other, _) => return Err(error(pos, format!("unexpected character '{}'", other))),
        };
        if two_char {
            chars.next();
        }
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}
