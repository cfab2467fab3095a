// src/lang/lexer.rs

//! Scanner for pointy source text.
//!
//! Tokens are matched longest-first, left-to-right. Comments (`#` to end of
//! line) and directives (`@` to end of line) are recognized and kept in the
//! stream so that tooling can inspect them; the parser skips both. Anything
//! unrecognized becomes an `Error` token carrying its position, which the
//! parser turns into a syntax error.

use std::fmt;

/// Kind of a scanned token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `->` sequential pipe.
    Pointer,
    /// `|->` broadcast pipe.
    PipePointer,
    /// `||` concurrent composition.
    Parallel,
    /// `*` retry operator.
    Retry,
    /// `,` group separator.
    Separator,
    LParen,
    RParen,
    /// Unsigned decimal literal.
    Number,
    /// Task identifier: `[A-Za-z_][A-Za-z0-9_]*`.
    TaskName,
    /// `#` to end of line; inert.
    Comment,
    /// `@` to end of line; inert, surfaced via [`directives`].
    Directive,
    /// Unrecognized input.
    Error,
}

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub line: usize,
    pub col: usize,
}

impl Pos {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

/// One scanned token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub pos: Pos,
}

/// A `@name [args…]` line surfaced by [`directives`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: String,
    pub pos: Pos,
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.col)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Consume to end of line, excluding the newline itself.
    fn take_line(&mut self, first: char) -> String {
        let mut text = String::new();
        text.push(first);
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.bump();
        }
        text
    }
}

/// Scan pointy source into a token stream.
///
/// Never fails: lexical problems are represented in-band as
/// [`TokenKind::Error`] tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();

    while let Some(ch) = scanner.peek() {
        let pos = scanner.pos();

        if ch.is_whitespace() {
            scanner.bump();
            continue;
        }

        let token = match ch {
            '#' => {
                scanner.bump();
                let text = scanner.take_line('#');
                Token {
                    kind: TokenKind::Comment,
                    lexeme: text,
                    pos,
                }
            }
            '@' => {
                scanner.bump();
                let text = scanner.take_line('@');
                Token {
                    kind: TokenKind::Directive,
                    lexeme: text,
                    pos,
                }
            }
            '-' => {
                scanner.bump();
                if scanner.peek() == Some('>') {
                    scanner.bump();
                    Token {
                        kind: TokenKind::Pointer,
                        lexeme: "->".into(),
                        pos,
                    }
                } else {
                    Token {
                        kind: TokenKind::Error,
                        lexeme: "-".into(),
                        pos,
                    }
                }
            }
            '|' => {
                scanner.bump();
                match scanner.peek() {
                    Some('|') => {
                        scanner.bump();
                        Token {
                            kind: TokenKind::Parallel,
                            lexeme: "||".into(),
                            pos,
                        }
                    }
                    Some('-') => {
                        scanner.bump();
                        if scanner.peek() == Some('>') {
                            scanner.bump();
                            Token {
                                kind: TokenKind::PipePointer,
                                lexeme: "|->".into(),
                                pos,
                            }
                        } else {
                            Token {
                                kind: TokenKind::Error,
                                lexeme: "|-".into(),
                                pos,
                            }
                        }
                    }
                    _ => Token {
                        kind: TokenKind::Error,
                        lexeme: "|".into(),
                        pos,
                    },
                }
            }
            '*' => {
                scanner.bump();
                Token {
                    kind: TokenKind::Retry,
                    lexeme: "*".into(),
                    pos,
                }
            }
            ',' => {
                scanner.bump();
                Token {
                    kind: TokenKind::Separator,
                    lexeme: ",".into(),
                    pos,
                }
            }
            '(' => {
                scanner.bump();
                Token {
                    kind: TokenKind::LParen,
                    lexeme: "(".into(),
                    pos,
                }
            }
            ')' => {
                scanner.bump();
                Token {
                    kind: TokenKind::RParen,
                    lexeme: ")".into(),
                    pos,
                }
            }
            d if d.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(d) = scanner.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    text.push(d);
                    scanner.bump();
                }
                Token {
                    kind: TokenKind::Number,
                    lexeme: text,
                    pos,
                }
            }
            a if a.is_ascii_alphabetic() || a == '_' => {
                let mut text = String::new();
                while let Some(a) = scanner.peek() {
                    if !(a.is_ascii_alphanumeric() || a == '_') {
                        break;
                    }
                    text.push(a);
                    scanner.bump();
                }
                Token {
                    kind: TokenKind::TaskName,
                    lexeme: text,
                    pos,
                }
            }
            other => {
                scanner.bump();
                Token {
                    kind: TokenKind::Error,
                    lexeme: other.to_string(),
                    pos,
                }
            }
        };

        tokens.push(token);
    }

    tokens
}

/// Collect `@`-directives from source without parsing it.
///
/// Directives carry no meaning in the grammar; this is the preprocessing
/// hook for callers that want to honor them (e.g. engine hints).
pub fn directives(source: &str) -> Vec<Directive> {
    tokenize(source)
        .into_iter()
        .filter(|t| t.kind == TokenKind::Directive)
        .map(|t| {
            let body = t.lexeme.trim_start_matches('@');
            let mut parts = body.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").to_string();
            let args = parts.next().unwrap_or("").trim().to_string();
            Directive {
                name,
                args,
                pos: t.pos,
            }
        })
        .collect()
}
