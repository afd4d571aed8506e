//! Core parser struct and helper methods.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

pub type ParseResult<T> = Result<T, ParserError>;

/// Diagnostics collected before the parser gives up.
pub const MAX_ERRORS: usize = 10;

/// The parser for REAPER.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) current: usize,
    pub(crate) errors: Vec<ParserError>,
}

impl Parser {
    /// Line markers are only significant to an interactive shell; the
    /// grammar itself is terminator-delimited, so they are dropped here.
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .collect();
        if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
            let end = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::eof(end.end, end.line.max(1), end.column + 1));
        }
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    /// Parse a complete program. On failure the first diagnostic is
    /// returned; all of them stay available through [`Parser::errors`].
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn parse(&mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    tracing::debug!(error = %err, "parse error, resynchronizing");
                    self.errors.push(err);
                    if self.errors.len() >= MAX_ERRORS {
                        break;
                    }
                    self.synchronize();
                }
            }
        }

        match self.errors.first() {
            Some(first) => Err(first.clone()),
            None => Ok(Program::new(statements)),
        }
    }

    pub fn errors(&self) -> &[ParserError] {
        &self.errors
    }

    /// Skip to just after a `;` or to the next statement keyword.
    pub(crate) fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            if self.peek().kind.is_type_keyword() {
                return;
            }
            match self.peek().kind {
                TokenKind::Infect
                | TokenKind::If
                | TokenKind::Shamble
                | TokenKind::Decay
                | TokenKind::Soulless
                | TokenKind::Harvest
                | TokenKind::Reap
                | TokenKind::Flee
                | TokenKind::Persist
                | TokenKind::Eternal
                | TokenKind::Risk
                | TokenKind::Judge => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ===== Token manipulation =====

    pub(crate) fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.tokens[self.current.saturating_sub(1)].clone()
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    pub(crate) fn peek_nth(&self, n: usize) -> &Token {
        let index = if self.current + n < self.tokens.len() {
            self.current + n
        } else {
            self.tokens.len() - 1
        };
        &self.tokens[index]
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            false
        } else {
            std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
        }
    }

    pub(crate) fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParserError::unexpected_token(
                format!("{}", kind),
                format!("{}", self.peek().kind),
                self.current_span(),
            ))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(ParserError::unexpected_token(
                "identifier",
                format!("{}", self.peek().kind),
                self.current_span(),
            )),
        }
    }

    /// Identifier or keyword spelled as a name (method names after `.`).
    pub(crate) fn expect_word(&mut self) -> ParseResult<String> {
        match self.peek().kind.word() {
            Some(name) => {
                self.advance();
                Ok(name)
            }
            None => Err(ParserError::unexpected_token(
                "name",
                format!("{}", self.peek().kind),
                self.current_span(),
            )),
        }
    }

    pub(crate) fn current_span(&self) -> Span {
        self.peek().span
    }

    pub(crate) fn previous_span(&self) -> Span {
        self.previous().span
    }
}
