//! Expression parsing using Pratt precedence.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::{StringPart, Token, TokenKind};
use crate::span::Span;

use super::core::{ParseResult, Parser};
use super::precedence::{get_precedence, Precedence};

impl Parser {
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.parse_precedence(Precedence::Assignment)
    }

    pub(crate) fn parse_precedence(&mut self, min_precedence: Precedence) -> ParseResult<Expr> {
        let mut left = self.parse_prefix()?;

        while !self.is_at_end() {
            let precedence = get_precedence(&self.peek().kind);
            if precedence == Precedence::None || precedence < min_precedence {
                break;
            }

            left = self.parse_infix(left, precedence)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let start_span = token.span;

        match &token.kind {
            TokenKind::IntLiteral(n) | TokenKind::HexLiteral(n) | TokenKind::BinaryLiteral(n) => {
                Ok(Expr::new(ExprKind::IntLiteral(*n), start_span))
            }
            TokenKind::FloatLiteral(n) => Ok(Expr::new(ExprKind::FloatLiteral(*n), start_span)),
            TokenKind::StringLiteral(s) => {
                Ok(Expr::new(ExprKind::StringLiteral(s.clone()), start_span))
            }
            TokenKind::InterpolatedString(parts) => {
                self.parse_interpolated_string(parts, start_span)
            }
            TokenKind::Void => Ok(Expr::new(ExprKind::Void, start_span)),

            TokenKind::Identifier(name) => {
                Ok(Expr::new(ExprKind::Variable(name.clone()), start_span))
            }

            TokenKind::This => Ok(Expr::new(ExprKind::This, start_span)),

            TokenKind::LeftParen => {
                let mut expr = self.expression()?;
                self.expect(&TokenKind::RightParen)?;
                expr.span = start_span.merge(&self.previous_span());
                Ok(expr)
            }

            TokenKind::LeftBracket => self.parse_array(start_span),
            TokenKind::LeftBrace => self.parse_dict(start_span),

            TokenKind::Minus => self.unary(UnaryOp::Negate, start_span),
            TokenKind::Banish => self.unary(UnaryOp::Not, start_span),
            TokenKind::Invert => self.unary(UnaryOp::BitNot, start_span),

            TokenKind::Await => {
                let operand = self.parse_precedence(Precedence::Unary)?;
                let span = start_span.merge(&operand.span);
                Ok(Expr::new(ExprKind::Await(Box::new(operand)), span))
            }

            TokenKind::Spawn => {
                let class_name = self.expect_identifier()?;
                self.expect(&TokenKind::LeftParen)?;
                let arguments = self.parse_arguments()?;
                self.expect(&TokenKind::RightParen)?;
                let span = start_span.merge(&self.previous_span());
                Ok(Expr::new(
                    ExprKind::Spawn {
                        class_name,
                        arguments,
                    },
                    span,
                ))
            }

            TokenKind::Infect => self.parse_lambda(start_span),

            TokenKind::Breach => {
                let body = self.block_statements()?;
                let span = start_span.merge(&self.previous_span());
                Ok(Expr::new(ExprKind::Breach(body), span))
            }

            _ => Err(ParserError::unexpected_token(
                "expression",
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    fn unary(&mut self, operator: UnaryOp, start_span: Span) -> ParseResult<Expr> {
        let operand = self.parse_precedence(Precedence::Unary)?;
        let span = start_span.merge(&operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                operator,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_array(&mut self, start_span: Span) -> ParseResult<Expr> {
        let mut elements = Vec::new();
        if !self.check(&TokenKind::RightBracket) {
            let first = self.expression()?;
            // [expr for x in iter if cond]
            if self.check(&TokenKind::For) {
                return self.parse_list_comprehension(start_span, first);
            }
            elements.push(first);
            while self.match_token(&TokenKind::Comma) {
                if self.check(&TokenKind::RightBracket) {
                    break;
                }
                elements.push(self.expression()?);
            }
        }
        self.expect(&TokenKind::RightBracket)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Array(elements), span))
    }

    fn parse_list_comprehension(&mut self, start_span: Span, element: Expr) -> ParseResult<Expr> {
        self.expect(&TokenKind::For)?;
        let variable = self.expect_identifier()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.parse_precedence(Precedence::Or)?;
        let condition = if self.match_token(&TokenKind::If) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        self.expect(&TokenKind::RightBracket)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(
            ExprKind::ListComprehension {
                element: Box::new(element),
                variable,
                iterable: Box::new(iterable),
                condition,
            },
            span,
        ))
    }

    fn parse_dict(&mut self, start_span: Span) -> ParseResult<Expr> {
        let mut pairs = Vec::new();
        if !self.check(&TokenKind::RightBrace) {
            loop {
                let key = self.expression()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.expression()?;
                pairs.push((key, value));
                if !self.match_token(&TokenKind::Comma) || self.check(&TokenKind::RightBrace) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightBrace)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Dict(pairs), span))
    }

    /// `infect (params) => expr` or `infect (params) => { block }`.
    fn parse_lambda(&mut self, start_span: Span) -> ParseResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parse_parameters()?;
        self.expect(&TokenKind::RightParen)?;
        self.expect(&TokenKind::FatArrow)?;

        let body = if self.check(&TokenKind::LeftBrace) {
            self.block_statements()?
        } else {
            let expr = self.expression()?;
            let span = expr.span;
            vec![Stmt::new(StmtKind::Reap(Some(expr)), span)]
        };
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Lambda { params, body }, span))
    }

    fn parse_infix(&mut self, left: Expr, precedence: Precedence) -> ParseResult<Expr> {
        let token = self.advance();

        match &token.kind {
            TokenKind::Plus => self.binary_expr(left, BinaryOp::Add, precedence),
            TokenKind::Minus => self.binary_expr(left, BinaryOp::Subtract, precedence),
            TokenKind::Star => self.binary_expr(left, BinaryOp::Multiply, precedence),
            TokenKind::Slash => self.binary_expr(left, BinaryOp::Divide, precedence),
            TokenKind::Percent => self.binary_expr(left, BinaryOp::Modulo, precedence),
            TokenKind::EqualEqual => self.binary_expr(left, BinaryOp::Equal, precedence),
            TokenKind::BangEqual => self.binary_expr(left, BinaryOp::NotEqual, precedence),
            TokenKind::Less => self.binary_expr(left, BinaryOp::Less, precedence),
            TokenKind::LessEqual => self.binary_expr(left, BinaryOp::LessEqual, precedence),
            TokenKind::Greater => self.binary_expr(left, BinaryOp::Greater, precedence),
            TokenKind::GreaterEqual => self.binary_expr(left, BinaryOp::GreaterEqual, precedence),
            TokenKind::Wither => self.binary_expr(left, BinaryOp::BitAnd, precedence),
            TokenKind::Spread => self.binary_expr(left, BinaryOp::BitOr, precedence),
            TokenKind::Mutate => self.binary_expr(left, BinaryOp::BitXor, precedence),
            TokenKind::Rot => self.binary_expr(left, BinaryOp::RotateLeft, precedence),

            TokenKind::Corrupt => self.logical_expr(left, LogicalOp::And, precedence),
            TokenKind::Infest => self.logical_expr(left, LogicalOp::Or, precedence),

            TokenKind::Equal => self.assignment(left, AssignOp::Assign, &token),
            TokenKind::PlusEqual => self.assignment(left, AssignOp::Add, &token),
            TokenKind::MinusEqual => self.assignment(left, AssignOp::Subtract, &token),
            TokenKind::StarEqual => self.assignment(left, AssignOp::Multiply, &token),
            TokenKind::SlashEqual => self.assignment(left, AssignOp::Divide, &token),
            TokenKind::PercentEqual => self.assignment(left, AssignOp::Modulo, &token),

            TokenKind::LeftParen => {
                let arguments = self.parse_arguments()?;
                self.expect(&TokenKind::RightParen)?;
                let span = left.span.merge(&self.previous_span());
                let kind = match left.kind {
                    ExprKind::Member { object, name } => ExprKind::MethodCall {
                        object,
                        method: name,
                        arguments,
                    },
                    other => ExprKind::Call {
                        callee: Box::new(Expr::new(other, left.span)),
                        arguments,
                    },
                };
                Ok(Expr::new(kind, span))
            }

            TokenKind::Dot => {
                let name = self.expect_word()?;
                let span = left.span.merge(&self.previous_span());
                Ok(Expr::new(
                    ExprKind::Member {
                        object: Box::new(left),
                        name,
                    },
                    span,
                ))
            }

            TokenKind::LeftBracket => self.parse_index_or_slice(left),

            _ => Err(ParserError::unexpected_token(
                "operator",
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    fn parse_index_or_slice(&mut self, object: Expr) -> ParseResult<Expr> {
        let start = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };

        if !self.match_token(&TokenKind::Colon) {
            self.expect(&TokenKind::RightBracket)?;
            let span = object.span.merge(&self.previous_span());
            return match start {
                Some(index) => Ok(Expr::new(
                    ExprKind::Index {
                        object: Box::new(object),
                        index,
                    },
                    span,
                )),
                None => Err(ParserError::general("Expected index expression", span)),
            };
        }

        let end = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RightBracket) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let step = if self.match_token(&TokenKind::Colon) && !self.check(&TokenKind::RightBracket)
        {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        self.expect(&TokenKind::RightBracket)?;
        let span = object.span.merge(&self.previous_span());
        Ok(Expr::new(
            ExprKind::Slice {
                object: Box::new(object),
                start,
                end,
                step,
            },
            span,
        ))
    }

    fn binary_expr(
        &mut self,
        left: Expr,
        operator: BinaryOp,
        precedence: Precedence,
    ) -> ParseResult<Expr> {
        let right = self.parse_precedence(precedence.next())?;
        let span = left.span.merge(&right.span);
        Ok(Expr::new(
            ExprKind::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        ))
    }

    fn logical_expr(
        &mut self,
        left: Expr,
        operator: LogicalOp,
        precedence: Precedence,
    ) -> ParseResult<Expr> {
        let right = self.parse_precedence(precedence.next())?;
        let span = left.span.merge(&right.span);
        Ok(Expr::new(
            ExprKind::Logical {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        ))
    }

    /// Right-associative; the target must be a name, property or index.
    fn assignment(&mut self, target: Expr, operator: AssignOp, token: &Token) -> ParseResult<Expr> {
        if !matches!(
            target.kind,
            ExprKind::Variable(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(ParserError::general("Invalid assignment target", token.span));
        }
        let value = self.parse_precedence(Precedence::Assignment)?;
        let span = target.span.merge(&value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                operator,
                value: Box::new(value),
            },
            span,
        ))
    }

    pub(crate) fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        Ok(args)
    }

    /// Each part's embedded tokens are parsed as one complete expression.
    fn parse_interpolated_string(&mut self, parts: &[StringPart], span: Span) -> ParseResult<Expr> {
        let mut result = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StringPart::Literal(text) => result.push(InterpolatedPart::Literal(text.clone())),
                StringPart::Expr(tokens) => {
                    let mut inner = Parser::new(tokens.clone());
                    if inner.is_at_end() {
                        return Err(ParserError::general("Empty interpolation expression", span));
                    }
                    let expr = inner.expression()?;
                    if !inner.is_at_end() {
                        return Err(ParserError::unexpected_token(
                            "'}'",
                            format!("{}", inner.peek().kind),
                            inner.current_span(),
                        ));
                    }
                    result.push(InterpolatedPart::Expression(expr));
                }
            }
        }
        Ok(Expr::new(ExprKind::InterpolatedString(result), span))
    }
}
