//! Resource limits enforced while a program runs.

use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::interpreter::rate_limit::TokenBucket;
use crate::interpreter::value::Value;
use crate::span::Span;

/// Wall-clock deadline, rate limiter, size ceilings and call budget for one
/// execution. Tracked memory only grows.
#[derive(Debug, Clone)]
pub struct ResourceGuard {
    deadline: Instant,
    timeout: Duration,
    bucket: TokenBucket,
    max_string_length: usize,
    max_array_size: usize,
    max_dict_size: usize,
    max_memory_bytes: usize,
    max_file_size: usize,
    max_function_calls: usize,
    memory_used: usize,
    function_calls: usize,
}

impl ResourceGuard {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_bucket(
            config,
            TokenBucket::new(config.rate_limit_per_second, config.rate_limit_burst),
        )
    }

    pub fn with_bucket(config: &EngineConfig, bucket: TokenBucket) -> Self {
        let timeout = config.timeout();
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            bucket,
            max_string_length: config.max_string_length,
            max_array_size: config.max_array_size,
            max_dict_size: config.max_dict_size,
            max_memory_bytes: config.max_memory_bytes,
            max_file_size: config.max_file_size,
            max_function_calls: config.max_function_calls,
            memory_used: 0,
            function_calls: 0,
        }
    }

    /// Restart the wall clock, e.g. at the start of an execution.
    pub fn restart(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn function_calls(&self) -> usize {
        self.function_calls
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    pub fn timeout_error(span: Span) -> RuntimeError {
        RuntimeError::new("Execution timeout exceeded", span)
    }

    pub fn check_timeout(&self, span: Span) -> Result<(), RuntimeError> {
        if Instant::now() >= self.deadline {
            return Err(Self::timeout_error(span));
        }
        Ok(())
    }

    pub fn acquire(&mut self, cost: f64, operation: &str, span: Span) -> Result<(), RuntimeError> {
        if !self.bucket.try_acquire(cost) {
            return Err(RuntimeError::new(
                format!("Rate limit exceeded for {} operations", operation),
                span,
            ));
        }
        Ok(())
    }

    /// Per-statement and per-expression check.
    pub fn tick(&mut self, span: Span) -> Result<(), RuntimeError> {
        self.check_timeout(span)?;
        self.acquire(1.0, "execution", span)
    }

    /// Charge one user function call.
    pub fn count_call(&mut self, span: Span) -> Result<(), RuntimeError> {
        if self.function_calls >= self.max_function_calls {
            return Err(RuntimeError::new(
                format!("Maximum function calls {} exceeded", self.max_function_calls),
                span,
            ));
        }
        self.function_calls += 1;
        self.acquire(1.0, "function call", span)
    }

    fn charge(&mut self, bytes: usize, span: Span) -> Result<(), RuntimeError> {
        self.memory_used = self.memory_used.saturating_add(bytes);
        if self.memory_used > self.max_memory_bytes {
            return Err(RuntimeError::memory(
                format!(
                    "Total memory usage {} exceeds maximum {}",
                    self.memory_used, self.max_memory_bytes
                ),
                "total",
                self.memory_used,
                self.max_memory_bytes,
                span,
            ));
        }
        Ok(())
    }

    pub fn check_string(&mut self, len: usize, span: Span) -> Result<(), RuntimeError> {
        if len > self.max_string_length {
            return Err(RuntimeError::memory(
                format!(
                    "String length {} exceeds maximum {}",
                    len, self.max_string_length
                ),
                "string",
                len,
                self.max_string_length,
                span,
            ));
        }
        self.charge(len, span)
    }

    pub fn check_array(&mut self, len: usize, span: Span) -> Result<(), RuntimeError> {
        if len > self.max_array_size {
            return Err(RuntimeError::memory(
                format!("Array size {} exceeds maximum {}", len, self.max_array_size),
                "array",
                len,
                self.max_array_size,
                span,
            ));
        }
        self.charge(len.saturating_mul(8), span)
    }

    pub fn check_dict(&mut self, len: usize, span: Span) -> Result<(), RuntimeError> {
        if len > self.max_dict_size {
            return Err(RuntimeError::memory(
                format!(
                    "Dictionary size {} exceeds maximum {}",
                    len, self.max_dict_size
                ),
                "dict",
                len,
                self.max_dict_size,
                span,
            ));
        }
        self.charge(len.saturating_mul(16), span)
    }

    /// An array grew in place by `added` items; only the new items are charged.
    pub fn grow_array(&mut self, len: usize, added: usize, span: Span) -> Result<(), RuntimeError> {
        if len > self.max_array_size {
            return Err(RuntimeError::memory(
                format!("Array size {} exceeds maximum {}", len, self.max_array_size),
                "array",
                len,
                self.max_array_size,
                span,
            ));
        }
        self.charge(added.saturating_mul(8), span)
    }

    pub fn grow_dict(&mut self, len: usize, added: usize, span: Span) -> Result<(), RuntimeError> {
        if len > self.max_dict_size {
            return Err(RuntimeError::memory(
                format!(
                    "Dictionary size {} exceeds maximum {}",
                    len, self.max_dict_size
                ),
                "dict",
                len,
                self.max_dict_size,
                span,
            ));
        }
        self.charge(added.saturating_mul(16), span)
    }

    /// Apply the matching ceiling to a freshly produced value.
    pub fn check_value(&mut self, value: &Value, span: Span) -> Result<(), RuntimeError> {
        match value {
            Value::Text(s) => self.check_string(s.len(), span),
            Value::Secure(s) => self.check_string(s.len(), span),
            Value::Array(items) => {
                let len = items.read().len();
                self.check_array(len, span)
            }
            Value::Map(map) => {
                let len = map.read().len();
                self.check_dict(len, span)
            }
            _ => Ok(()),
        }
    }

    /// Sleep up to `ms`, never past the deadline.
    pub fn rest(&self, ms: u64, span: Span) -> Result<(), RuntimeError> {
        let wanted = Duration::from_millis(ms);
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if wanted > remaining {
            std::thread::sleep(remaining);
            return Err(Self::timeout_error(span));
        }
        std::thread::sleep(wanted);
        Ok(())
    }
}
