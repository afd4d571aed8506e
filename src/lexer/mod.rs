//! Lexer module for REAPER.

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{StringPart, Token, TokenKind};

use crate::error::LexerError;

/// Tokenize a whole source file. `name` only labels diagnostics and logs;
/// positions live in each token's span.
#[tracing::instrument(level = "debug", skip(source))]
pub fn tokenize(source: &str, name: &str) -> Result<Vec<Token>, LexerError> {
    let tokens = Scanner::new(source).scan_tokens()?;
    tracing::trace!(count = tokens.len(), "tokenized");
    Ok(tokens)
}
