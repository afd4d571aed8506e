//! Class declarations and instances.

mod classes;
