//! Function, builtin and method calls.

mod function;
mod method;
