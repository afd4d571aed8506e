//! Exceptions and async tasks.

mod exceptions;
mod tasks;
