// src/lang/parser.rs

//! Expression parser for the pointy grammar.
//!
//! A deterministic single-token-lookahead parser over the scanner's token
//! stream. Binding strength, tightest first:
//!
//! 1. conditional call parentheses
//! 2. `*` retry (non-associative, one number and one task)
//! 3. `||` parallel composition
//! 4. `->` / `|->` pipes (equal strength, left-associative)
//!
//! A `NUMBER` is disambiguated by the following terminal: before `->`/`|->`
//! it is a replication descriptor, adjacent to `*` it is a retry budget.
//! There is no error recovery; the first unexpected token aborts the parse.

use thiserror::Error;

use crate::lang::ast::{Expr, PipeKind};
use crate::lang::lexer::{tokenize, Pos, Token, TokenKind};

/// Parse failure: what was expected and what was actually seen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at {position}: expected {expected}, got {got}")]
pub struct SyntaxError {
    pub position: Pos,
    pub expected: String,
    pub got: String,
}

impl SyntaxError {
    fn new(position: Pos, expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self {
            position,
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Parse pointy source into an operator tree.
///
/// Comments and directives are dropped here; source with no executable
/// content at all (empty, or comments/directives only) is a syntax error.
pub fn parse(source: &str) -> Result<Expr, SyntaxError> {
    let tokens: Vec<Token> = tokenize(source)
        .into_iter()
        .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Directive))
        .collect();

    let end = tokens
        .last()
        .map(|t| Pos::new(t.pos.line, t.pos.col + t.lexeme.chars().count()))
        .unwrap_or(Pos::new(1, 1));

    let mut parser = Parser { tokens, at: 0, end };
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
    /// Position just past the last token, reported for unexpected EOF.
    end: Pos,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn err(&self, expected: &str) -> SyntaxError {
        let (position, got) = match self.peek() {
            Some(t) => (t.pos, format!("'{}'", t.lexeme)),
            None => (self.end, "end of input".to_string()),
        };
        SyntaxError::new(position, expected, got)
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.err("'->', '|->', '||', or end of input")),
        }
    }

    fn pipe_kind_here(&self) -> Option<PipeKind> {
        match self.peek_kind() {
            Some(TokenKind::Pointer) => Some(PipeKind::Seq),
            Some(TokenKind::PipePointer) => Some(PipeKind::Broadcast),
            _ => None,
        }
    }

    /// expression := parallel ( ('->' | '|->') parallel )*
    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parallel()?;

        while let Some(kind) = self.pipe_kind_here() {
            self.bump();
            let right = self.parallel()?;
            left = Expr::Pipe {
                kind,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// parallel := operand ( '||' operand )*
    fn parallel(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.operand()?;

        while self.peek_kind() == Some(TokenKind::Parallel) {
            self.bump();
            let right = self.operand()?;
            left = Expr::Parallel {
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// operand := NUMBER '*' task
    ///          | NUMBER ('->' | '|->') operand
    ///          | task ('*' NUMBER)?
    fn operand(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Number) => {
                let number = self.number()?;
                match self.peek_kind() {
                    Some(TokenKind::Retry) => {
                        self.bump();
                        let task = self.task()?;
                        Ok(Expr::Retry {
                            task: Box::new(task),
                            budget: number,
                        })
                    }
                    Some(TokenKind::Pointer) | Some(TokenKind::PipePointer) => {
                        let pipe = self.pipe_kind_here().unwrap();
                        self.bump();
                        let child = self.operand()?;
                        Ok(Expr::Replicate {
                            count: number,
                            pipe,
                            child: Box::new(child),
                        })
                    }
                    _ => Err(self.err("'*', '->' or '|->' after a number")),
                }
            }
            Some(TokenKind::TaskName) => {
                let task = self.task()?;
                if self.peek_kind() == Some(TokenKind::Retry) {
                    self.bump();
                    let budget = self.number()?;
                    return Ok(Expr::Retry {
                        task: Box::new(task),
                        budget,
                    });
                }
                Ok(task)
            }
            _ => Err(self.err("a task name or number")),
        }
    }

    /// task := TASKNAME | task '(' task_group ')'
    fn task(&mut self) -> Result<Expr, SyntaxError> {
        let token = match self.peek() {
            Some(t) if t.kind == TokenKind::TaskName => self.bump().unwrap(),
            _ => return Err(self.err("a task name")),
        };

        let mut task = Expr::Task {
            name: token.lexeme,
            pos: token.pos,
        };

        while self.peek_kind() == Some(TokenKind::LParen) {
            self.bump();
            let branches = self.task_group()?;
            match self.peek_kind() {
                Some(TokenKind::RParen) => {
                    self.bump();
                }
                _ => return Err(self.err("',' or ')'")),
            }
            task = Expr::Call {
                callee: Box::new(task),
                branches,
            };
        }

        Ok(task)
    }

    /// task_group := expression ( ',' expression )+
    ///
    /// A conditional group needs at least two alternatives; a one-element
    /// group would make branch selection meaningless.
    fn task_group(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut branches = vec![self.expression()?];

        while self.peek_kind() == Some(TokenKind::Separator) {
            self.bump();
            branches.push(self.expression()?);
        }

        if branches.len() < 2 {
            return Err(self.err("',' and a second branch"));
        }

        Ok(branches)
    }

    fn number(&mut self) -> Result<u32, SyntaxError> {
        let token = match self.peek() {
            Some(t) if t.kind == TokenKind::Number => self.bump().unwrap(),
            _ => return Err(self.err("a number")),
        };

        token.lexeme.parse::<u32>().map_err(|_| {
            SyntaxError::new(
                token.pos,
                "a number small enough to fit 32 bits",
                format!("'{}'", token.lexeme),
            )
        })
    }
}
