//! Tree-walking interpreter and the runtime shared with the VM.

pub mod async_pool;
pub mod builtins;
pub mod environment;
pub mod executor;
pub mod guard;
pub mod modules;
pub mod ops;
pub mod output;
pub mod rate_limit;
pub mod secure;
pub mod value;

pub use environment::Environment;
pub use executor::{Completion, Interpreter};
pub use guard::ResourceGuard;
pub use modules::{ModuleLoader, StaticModuleLoader};
pub use output::{CaptureSink, ScriptedInput};
pub use value::Value;
