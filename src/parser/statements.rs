//! Statement parsing: control flow, loops, exceptions, blocks.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser {
    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Tomb
                if matches!(self.peek_nth(1).kind, TokenKind::Identifier(_))
                    && self.peek_nth(2).kind != TokenKind::Equal
                    && self.peek_nth(2).kind != TokenKind::Semicolon =>
            {
                self.class_declaration()
            }
            k if k.is_type_keyword()
                && matches!(self.peek_nth(1).kind, TokenKind::Identifier(_)) =>
            {
                self.var_declaration(false)
            }
            TokenKind::Eternal => self.var_declaration(true),
            TokenKind::Infect if self.peek_nth(1).kind != TokenKind::LeftParen => {
                self.function_declaration()
            }
            TokenKind::If => self.if_statement(),
            TokenKind::Shamble => self.shamble_statement(),
            TokenKind::Decay => self.decay_statement(),
            TokenKind::Soulless => self.soulless_statement(),
            TokenKind::Judge => self.judge_statement(),
            TokenKind::Flee => self.simple_statement(StmtKind::Flee),
            TokenKind::Persist => self.simple_statement(StmtKind::Persist),
            TokenKind::Reap => self.reap_statement(),
            TokenKind::Harvest => self.harvest_statement(),
            TokenKind::Rest => self.rest_statement(),
            TokenKind::Raise => self.raise_statement(),
            TokenKind::Risk => self.risk_statement(),
            TokenKind::Exploit => self.exploit_statement(),
            TokenKind::Throw => self.throw_statement(),
            TokenKind::Infiltrate => self.infiltrate_statement(),
            TokenKind::Cloak => self.cloak_statement(),
            TokenKind::Breach => {
                let start_span = self.current_span();
                let expr = self.expression()?;
                self.match_token(&TokenKind::Semicolon);
                let span = start_span.merge(&self.previous_span());
                Ok(Stmt::new(StmtKind::Expression(expr), span))
            }
            TokenKind::LeftBrace => self.block_statement(),
            _ => self.expression_statement(),
        }
    }

    fn simple_statement(&mut self, kind: StmtKind) -> ParseResult<Stmt> {
        let start_span = self.advance().span;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::new(kind, start_span.merge(&self.previous_span())))
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::If)?;

        let condition = self.expression()?;
        let then_branch = Box::new(self.block_statement()?);

        let else_branch = if self.match_token(&TokenKind::Otherwise) {
            if self.check(&TokenKind::If) {
                Some(Box::new(self.if_statement()?))
            } else {
                Some(Box::new(self.block_statement()?))
            }
        } else {
            None
        };

        let span = start_span.merge(&self.previous_span());

        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    fn shamble_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Shamble)?;
        let variable = self.expect_identifier()?;
        self.expect(&TokenKind::From)?;
        let start = self.expression()?;
        self.expect(&TokenKind::To)?;
        let end = self.expression()?;
        let body = Box::new(self.block_statement()?);
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Shamble {
                variable,
                start,
                end,
                body,
            },
            span,
        ))
    }

    fn decay_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Decay)?;
        let variable = self.expect_identifier()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.expression()?;
        let body = Box::new(self.block_statement()?);
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Decay {
                variable,
                iterable,
                body,
            },
            span,
        ))
    }

    fn soulless_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Soulless)?;
        let body = Box::new(self.block_statement()?);
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Soulless(body), span))
    }

    fn judge_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Judge)?;
        let subject = self.expression()?;
        self.expect(&TokenKind::LeftBrace)?;

        let mut cases = Vec::new();
        let mut default = None;
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            let case_span = self.current_span();
            if self.match_token(&TokenKind::Case) {
                let value = self.expression()?;
                let body = self.block_statements()?;
                cases.push(JudgeCase {
                    value,
                    body,
                    span: case_span.merge(&self.previous_span()),
                });
            } else if self.match_token(&TokenKind::Default) {
                if default.is_some() {
                    return Err(ParserError::general(
                        "Duplicate 'default' in judge",
                        case_span,
                    ));
                }
                default = Some(self.block_statements()?);
            } else {
                return Err(ParserError::unexpected_token(
                    "'case' or 'default'",
                    format!("{}", self.peek().kind),
                    case_span,
                ));
            }
        }
        self.expect(&TokenKind::RightBrace)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Judge {
                subject,
                cases,
                default,
            },
            span,
        ))
    }

    fn reap_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Reap)?;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Reap(value), span))
    }

    fn harvest_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Harvest)?;
        let mut values = Vec::new();
        if !self.check(&TokenKind::Semicolon) {
            loop {
                values.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Semicolon)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Harvest(values), span))
    }

    fn rest_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Rest)?;
        self.expect(&TokenKind::LeftParen)?;
        let duration = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        self.expect(&TokenKind::Semicolon)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Rest(duration), span))
    }

    fn raise_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Raise)?;
        let call = self.expression()?;
        if !matches!(
            call.kind,
            ExprKind::Call { .. } | ExprKind::MethodCall { .. }
        ) {
            return Err(ParserError::general(
                "Expected function call after 'raise'",
                call.span,
            ));
        }
        self.expect(&TokenKind::Semicolon)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Expression(call), span))
    }

    fn risk_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Risk)?;
        let body = self.block_statements()?;

        let mut catches = Vec::new();
        while self.check(&TokenKind::Catch) {
            let catch_span = self.advance().span;
            self.expect(&TokenKind::LeftParen)?;
            let (error_type, binding) = if self.check(&TokenKind::RightParen) {
                (None, None)
            } else {
                let error_type = self.expect_identifier()?;
                let binding = match &self.peek().kind {
                    TokenKind::Identifier(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                (Some(error_type), binding)
            };
            self.expect(&TokenKind::RightParen)?;
            let body = self.block_statements()?;
            catches.push(CatchClause {
                error_type,
                binding,
                body,
                span: catch_span.merge(&self.previous_span()),
            });
        }

        let finally = if self.match_token(&TokenKind::Finally) {
            Some(self.block_statements()?)
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            return Err(ParserError::unexpected_token(
                "'catch' or 'finally'",
                format!("{}", self.peek().kind),
                self.current_span(),
            ));
        }

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Risk {
                body,
                catches,
                finally,
            },
            span,
        ))
    }

    /// Legacy `exploit { } otherwise (Type) { }`: a single unbound catch.
    fn exploit_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Exploit)?;
        let body = self.block_statements()?;
        let catch_span = self.current_span();
        self.expect(&TokenKind::Otherwise)?;
        self.expect(&TokenKind::LeftParen)?;
        let error_type = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.expect_identifier()?)
        };
        self.expect(&TokenKind::RightParen)?;
        let handler = self.block_statements()?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Risk {
                body,
                catches: vec![CatchClause {
                    error_type,
                    binding: None,
                    body: handler,
                    span: catch_span.merge(&self.previous_span()),
                }],
                finally: None,
            },
            span,
        ))
    }

    /// `throw [Type] [message];`. A leading name is a type only when it
    /// reads as an error type (ends in `Error`); otherwise it starts the message.
    fn throw_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Throw)?;

        let error_type = match &self.peek().kind {
            TokenKind::Identifier(name) if name.ends_with("Error") => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };
        let message = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Throw {
                error_type,
                message,
            },
            span,
        ))
    }

    pub(crate) fn block_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        let statements = self.block_statements()?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Block(statements), span))
    }

    pub(crate) fn block_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::LeftBrace)?;
        let mut statements = Vec::new();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
        }

        self.expect(&TokenKind::RightBrace)?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let span = expr.span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Expression(expr), span))
    }
}
