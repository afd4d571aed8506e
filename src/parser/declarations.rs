//! Declaration parsing: variables, functions, classes, imports.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser {
    /// `<type> name [= expr];` or `eternal <type> name = expr;`.
    pub(crate) fn var_declaration(&mut self, is_constant: bool) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        if is_constant {
            self.expect(&TokenKind::Eternal)?;
        }
        let type_tag = self.expect_type()?;
        let name = self.expect_identifier()?;

        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        if is_constant && initializer.is_none() {
            return Err(ParserError::general(
                format!("Constant '{}' requires an initializer", name),
                self.current_span(),
            ));
        }
        self.expect(&TokenKind::Semicolon)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::VarDecl {
                name,
                type_tag,
                initializer,
                is_constant,
            },
            span,
        ))
    }

    pub(crate) fn expect_type(&mut self) -> ParseResult<TypeTag> {
        match TypeTag::from_token(&self.peek().kind) {
            Some(tag) => {
                self.advance();
                Ok(tag)
            }
            None => Err(ParserError::unexpected_token(
                "type",
                format!("{}", self.peek().kind),
                self.current_span(),
            )),
        }
    }

    pub(crate) fn function_declaration(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        let decl = self.function_decl()?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Function(decl), span))
    }

    /// `infect name(params) [-> type] { body }`.
    fn function_decl(&mut self) -> ParseResult<FunctionDecl> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Infect)?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LeftParen)?;
        let params = self.parse_parameters()?;
        self.expect(&TokenKind::RightParen)?;

        let return_type = if self.match_token(&TokenKind::Arrow) {
            match TypeTag::from_token(&self.peek().kind) {
                Some(tag) => {
                    self.advance();
                    Some(tag)
                }
                // Class names are accepted as return types but not recorded
                None => {
                    self.expect_identifier()?;
                    None
                }
            }
        } else {
            None
        };

        let body = self.block_statements()?;
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span: start_span.merge(&self.previous_span()),
        })
    }

    /// `[type] name [= default], ...` up to (not including) `)`.
    pub(crate) fn parse_parameters(&mut self) -> ParseResult<Vec<Parameter>> {
        let mut params = Vec::new();
        if self.check(&TokenKind::RightParen) {
            return Ok(params);
        }
        loop {
            let span = self.current_span();
            let type_tag = TypeTag::from_token(&self.peek().kind);
            if type_tag.is_some() {
                self.advance();
            }
            let name = self.expect_identifier()?;
            if params.iter().any(|p: &Parameter| p.name == name) {
                return Err(ParserError::general(
                    format!("Duplicate parameter '{}'", name),
                    self.previous_span(),
                ));
            }
            let default_value = if self.match_token(&TokenKind::Equal) {
                Some(self.expression()?)
            } else {
                None
            };
            params.push(Parameter {
                name,
                type_tag,
                default_value,
                span: span.merge(&self.previous_span()),
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// `tomb Name { <type> field [= init]; infect method(...) { } }`.
    pub(crate) fn class_declaration(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Tomb)?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LeftBrace)?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if self.check(&TokenKind::Infect) {
                methods.push(self.function_decl()?);
                continue;
            }
            let field_span = self.current_span();
            let type_tag = self.expect_type()?;
            let field_name = self.expect_identifier()?;
            let initializer = if self.match_token(&TokenKind::Equal) {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect(&TokenKind::Semicolon)?;
            fields.push(FieldDecl {
                name: field_name,
                type_tag,
                initializer,
                span: field_span.merge(&self.previous_span()),
            });
        }
        self.expect(&TokenKind::RightBrace)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Class(ClassDecl {
                name,
                fields,
                methods,
                span,
            }),
            span,
        ))
    }

    /// `infiltrate module [as alias] [(a, b)];`.
    pub(crate) fn infiltrate_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Infiltrate)?;
        let module = self.expect_identifier()?;

        let alias = if matches!(&self.peek().kind, TokenKind::Identifier(word) if word == "as") {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };

        let mut items = Vec::new();
        if self.match_token(&TokenKind::LeftParen) {
            if !self.check(&TokenKind::RightParen) {
                loop {
                    items.push(self.expect_identifier()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RightParen)?;
        }
        self.expect(&TokenKind::Semicolon)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Infiltrate(ImportDecl {
                module,
                alias,
                items,
                span,
            }),
            span,
        ))
    }

    pub(crate) fn cloak_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Cloak)?;
        let feature = self.expect_word()?;
        self.expect(&TokenKind::Semicolon)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Cloak(feature), span))
    }
}
