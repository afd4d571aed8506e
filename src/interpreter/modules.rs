//! Module resolution for `infiltrate`. Resolution policy belongs to the host;
//! the interpreter only asks for a module's exported symbols by name.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::interpreter::value::Value;

pub trait ModuleLoader: Send + Sync {
    /// Exported `(symbol, value)` pairs, or a reason the module is unavailable.
    fn load(&self, name: &str) -> Result<Vec<(String, Value)>, String>;
}

/// Loader backed by modules registered up front.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<IndexMap<String, Vec<(String, Value)>>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I>(&self, name: &str, symbols: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.modules
            .write()
            .insert(name.to_string(), symbols.into_iter().collect());
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, name: &str) -> Result<Vec<(String, Value)>, String> {
        self.modules
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| format!("Module '{}' not found", name))
    }
}
