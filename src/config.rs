//! Engine limits shared by the interpreter and the VM.
//!
//! Sources, lowest to highest priority: built-in defaults, a JSON file,
//! `REAPER_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// VM value stack ceiling.
    pub max_stack_size: usize,
    /// VM call-frame ceiling.
    pub max_call_depth: usize,
    /// Interpreter recursion ceiling.
    pub max_recursion_depth: usize,
    /// Total user function calls per interpretation.
    pub max_function_calls: usize,
    pub timeout_ms: u64,
    pub max_instructions: u64,
    /// Interpreter token bucket, consulted per statement and call.
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: f64,
    /// VM token bucket, consulted by the `RATE_LIMIT` opcode.
    pub vm_rate_per_second: f64,
    pub vm_rate_burst: f64,
    pub max_string_length: usize,
    pub max_array_size: usize,
    pub max_dict_size: usize,
    pub max_memory_bytes: usize,
    pub max_file_size: usize,
    pub async_workers: usize,
    pub profile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_size: 10_000,
            max_call_depth: 1_000,
            max_recursion_depth: 1_000,
            max_function_calls: 1_000_000,
            timeout_ms: 30_000,
            max_instructions: 1_000_000,
            rate_limit_per_second: 1_000_000.0,
            rate_limit_burst: 100_000.0,
            vm_rate_per_second: 1_000.0,
            vm_rate_burst: 100.0,
            max_string_length: 1_000_000,
            max_array_size: 100_000,
            max_dict_size: 100_000,
            max_memory_bytes: 100 * 1024 * 1024,
            max_file_size: 10 * 1024 * 1024,
            async_workers: 10,
            profile: false,
        }
    }
}

/// Native stack reserved per level of interpreter recursion.
pub const STACK_PER_CALL: usize = 256 * 1024;
/// Smallest native stack handed to an interpreter thread.
pub const MIN_INTERPRETER_STACK: usize = 8 * 1024 * 1024;

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Native stack for a thread running the tree-walking interpreter, so
    /// `max_recursion_depth` is reached before the thread overflows.
    pub fn interpreter_stack_size(&self) -> usize {
        self.max_recursion_depth
            .saturating_add(1)
            .saturating_mul(STACK_PER_CALL)
            .max(MIN_INTERPRETER_STACK)
    }

    /// Defaults, overlaid by `path` (if any), overlaid by the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply `REAPER_*` overrides. Unknown variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("REAPER_") else {
                continue;
            };
            match name {
                "MAX_STACK" => self.max_stack_size = parse_env(&key, &value)?,
                "MAX_CALL_DEPTH" => self.max_call_depth = parse_env(&key, &value)?,
                "MAX_RECURSION" => self.max_recursion_depth = parse_env(&key, &value)?,
                "MAX_FUNCTION_CALLS" => self.max_function_calls = parse_env(&key, &value)?,
                "TIMEOUT_MS" => self.timeout_ms = parse_env(&key, &value)?,
                "MAX_INSTRUCTIONS" => self.max_instructions = parse_env(&key, &value)?,
                "RATE_LIMIT" => self.rate_limit_per_second = parse_env(&key, &value)?,
                "RATE_BURST" => self.rate_limit_burst = parse_env(&key, &value)?,
                "VM_RATE_LIMIT" => self.vm_rate_per_second = parse_env(&key, &value)?,
                "VM_RATE_BURST" => self.vm_rate_burst = parse_env(&key, &value)?,
                "MAX_STRING" => self.max_string_length = parse_env(&key, &value)?,
                "MAX_ARRAY" => self.max_array_size = parse_env(&key, &value)?,
                "MAX_DICT" => self.max_dict_size = parse_env(&key, &value)?,
                "MAX_MEMORY" => self.max_memory_bytes = parse_env(&key, &value)?,
                "MAX_FILE_SIZE" => self.max_file_size = parse_env(&key, &value)?,
                "ASYNC_WORKERS" => self.async_workers = parse_env(&key, &value)?,
                "PROFILE" => {
                    self.profile = matches!(value.as_str(), "1" | "true" | "yes" | "on")
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"max_stack_size": 64, "profile": true}"#)
            .expect("valid json");
        assert_eq!(config.max_stack_size, 64);
        assert!(config.profile);
        assert_eq!(config.max_call_depth, EngineConfig::default().max_call_depth);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_env(vec![
                ("REAPER_TIMEOUT_MS".to_string(), "250".to_string()),
                ("REAPER_PROFILE".to_string(), "on".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .expect("valid overrides");
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(config.profile);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env(vec![("REAPER_MAX_STACK".to_string(), "lots".to_string())])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_interpreter_stack_scales_with_recursion_depth() {
        let config = EngineConfig::default();
        assert_eq!(config.interpreter_stack_size(), 1001 * STACK_PER_CALL);
        let shallow = EngineConfig {
            max_recursion_depth: 3,
            ..EngineConfig::default()
        };
        assert_eq!(shallow.interpreter_stack_size(), MIN_INTERPRETER_STACK);
    }

    #[test]
    fn test_file_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reaper.json");
        std::fs::write(&path, r#"{"async_workers": 2}"#).expect("write config");
        let config = EngineConfig::from_file(&path).expect("load config");
        assert_eq!(config.async_workers, 2);
    }
}
