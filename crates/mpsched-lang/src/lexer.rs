//! Tokenizer for scheduler program text.
//!
//! Keywords are not distinguished here; the parser matches identifier text.
//! Integer literals are kept as text so range checks can report the
//! literal as written.

use crate::error::{Location, ParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Int(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl Cursor<'_> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }
}

/// Split source text into tokens, ending with a single `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut cur = Cursor {
        chars: source.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();

    loop {
        let Some(c) = cur.peek() else {
            tokens.push(Token {
                kind: TokenKind::Eof,
                location: cur.location(),
            });
            return Ok(tokens);
        };
        let location = cur.location();

        if c.is_whitespace() {
            cur.bump();
            continue;
        }
        if c == '#' {
            cur.skip_line();
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut text = String::new();
            while let Some(c) = cur.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    text.push(c);
                    cur.bump();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(text),
                location,
            });
            continue;
        }

        if c.is_ascii_digit() {
            let mut text = String::new();
            while let Some(c) = cur.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    cur.bump();
                } else if c == '_' {
                    cur.bump();
                } else {
                    break;
                }
            }
            if matches!(cur.peek(), Some(c) if c.is_ascii_alphabetic()) {
                return Err(ParseError::new(location, "malformed integer literal"));
            }
            tokens.push(Token {
                kind: TokenKind::Int(text),
                location,
            });
            continue;
        }

        cur.bump();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '%' => TokenKind::Percent,
            '/' => {
                if cur.peek() == Some('/') {
                    cur.skip_line();
                    continue;
                }
                TokenKind::Slash
            }
            '=' => pair(&mut cur, '=', TokenKind::EqEq, TokenKind::Assign),
            '!' => pair(&mut cur, '=', TokenKind::NotEq, TokenKind::Bang),
            '<' => pair(&mut cur, '=', TokenKind::Le, TokenKind::Lt),
            '>' => pair(&mut cur, '=', TokenKind::Ge, TokenKind::Gt),
            '&' if cur.peek() == Some('&') => {
                cur.bump();
                TokenKind::AndAnd
            }
            '|' if cur.peek() == Some('|') => {
                cur.bump();
                TokenKind::OrOr
            }
            other => {
                return Err(ParseError::new(
                    location,
                    format!("unexpected character {other:?}"),
                ));
            }
        };
        tokens.push(Token { kind, location });
    }
}

fn pair(cur: &mut Cursor<'_>, next: char, joined: TokenKind, single: TokenKind) -> TokenKind {
    if cur.peek() == Some(next) {
        cur.bump();
        joined
    } else {
        single
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_statement() {
        assert_eq!(
            kinds("VAR x = R1 + 10;"),
            vec![
                TokenKind::Ident("VAR".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Ident("R1".into()),
                TokenKind::Plus,
                TokenKind::Int("10".into()),
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("<= >= == != && || < > = !"),
            vec![
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Assign,
                TokenKind::Bang,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_tracks_lines() {
        let tokens = tokenize("# header\n  FALLBACK; // trailing\n").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("FALLBACK".into()));
        assert_eq!(tokens[0].location, Location::new(2, 3));
        assert_eq!(tokens[1].kind, TokenKind::Semi);
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }

    #[test]
    fn digit_separators_are_dropped() {
        assert_eq!(
            kinds("10_000_000"),
            vec![TokenKind::Int("10000000".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn rejects_stray_characters() {
        let err = tokenize("VAR x = 1 $ 2;").unwrap_err();
        assert_eq!(err.location, Location::new(1, 11));

        let err = tokenize("VAR x = 12ab;").unwrap_err();
        assert!(err.message.contains("malformed"));
    }
}
