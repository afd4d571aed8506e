//! Parser module for REAPER.

mod core;
mod declarations;
mod expressions;
mod precedence;
mod statements;


pub use self::core::{ParseResult, Parser, MAX_ERRORS};
