//! Tree-walking interpreter for REAPER.

mod expressions;
mod operators;
mod statements;
mod variables;

pub mod calls;
pub mod control;
pub mod objects;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::debug;

use crate::ast::{Program, Stmt, StmtKind};
use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::interpreter::async_pool::AsyncPool;
use crate::interpreter::builtins::{register_builtins, Host};
use crate::interpreter::environment::{is_reserved, Environment, ROOT_SCOPE};
use crate::interpreter::guard::ResourceGuard;
use crate::interpreter::modules::{ModuleLoader, StaticModuleLoader};
use crate::interpreter::output::{self, InputSource, OutputSink, SharedInput, SharedOutput};
use crate::interpreter::secure::SecureString;
use crate::interpreter::value::Value;
use crate::span::Span;

pub(crate) type RuntimeResult<T> = Result<T, RuntimeError>;

/// Non-local exits out of a statement. Loops absorb `Break`/`Continue`,
/// calls absorb `Return`, `risk` absorbs matching `Raised` errors.
#[derive(Debug, Clone)]
pub(crate) enum ControlSignal {
    Break,
    Continue,
    Return(Value),
    Raised(RuntimeError),
}

impl From<RuntimeError> for ControlSignal {
    fn from(err: RuntimeError) -> Self {
        ControlSignal::Raised(err)
    }
}

/// Statement outcome: the statement's value, or a signal to unwind.
pub(crate) type ExecResult = Result<Value, ControlSignal>;

/// How a program run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Value of a top-level `reap`, else of a trailing top-level expression
    /// statement, else `void`.
    Finished(Value),
    /// `final_rest(code)` was called.
    Exited(i32),
}

/// The REAPER tree-walking interpreter.
///
/// Clones share the output, input, module loader, worker pool and binding
/// cells. Each clone owns its scope stack, so a clone can run a `breach`
/// block on another thread.
#[derive(Clone)]
pub struct Interpreter {
    pub(crate) env: Environment,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) guard: ResourceGuard,
    pub(crate) output: SharedOutput,
    pub(crate) input: SharedInput,
    pub(crate) modules: Arc<dyn ModuleLoader>,
    pub(crate) pool: Arc<AsyncPool>,
    pub(crate) secure_strings: Vec<Arc<SecureString>>,
    pub(crate) call_depth: usize,
    pub(crate) cloaked: Vec<String>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut env = Environment::new();
        register_builtins(&mut env, &[]);
        Self {
            env,
            guard: ResourceGuard::new(&config),
            pool: Arc::new(
                AsyncPool::new(config.async_workers).with_stack_size(config.interpreter_stack_size()),
            ),
            config: Arc::new(config),
            output: output::stdout(),
            input: output::stdin(),
            modules: Arc::new(StaticModuleLoader::new()),
            secure_strings: Vec::new(),
            call_depth: 0,
            cloaked: Vec::new(),
        }
    }

    pub fn with_output(mut self, output: SharedOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_output_sink(self, sink: impl OutputSink + 'static) -> Self {
        self.with_output(Arc::new(parking_lot::Mutex::new(sink)))
    }

    pub fn with_input(mut self, input: SharedInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_input_source(self, source: impl InputSource + 'static) -> Self {
        self.with_input(Arc::new(parking_lot::Mutex::new(source)))
    }

    pub fn with_modules(mut self, modules: Arc<dyn ModuleLoader>) -> Self {
        self.modules = modules;
        self
    }

    /// Seed `ritual_args` with the host's command-line arguments.
    pub fn with_args(mut self, args: &[String]) -> Self {
        let args = args.iter().map(|a| Value::text(a.as_str())).collect();
        self.env.define_builtin("ritual_args", Value::array(args));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn resource_guard(&self) -> &ResourceGuard {
        &self.guard
    }

    /// Features switched on by `cloak`, in order.
    pub fn cloaked_features(&self) -> &[String] {
        &self.cloaked
    }

    /// Interpret a complete program on the calling thread, which must have
    /// room for `max_recursion_depth` nested calls
    /// (see [`EngineConfig::interpreter_stack_size`]). `reaper::run_with_options`
    /// provides such a thread.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn interpret(&mut self, program: &Program) -> RuntimeResult<Completion> {
        self.guard.restart();
        let result = self.run_top_level(&program.statements);
        self.clear_secure_strings();
        self.pool.shutdown();
        match result {
            Ok(value) => Ok(Completion::Finished(value)),
            Err(err) => match err.exit_code() {
                Some(code) => {
                    debug!(code, "program exited");
                    Ok(Completion::Exited(code))
                }
                None => Err(err),
            },
        }
    }

    fn run_top_level(&mut self, statements: &[Stmt]) -> RuntimeResult<Value> {
        self.hoist_functions(statements)?;
        let mut last = Value::Void;
        for stmt in statements {
            match self.execute(stmt) {
                Ok(value) if matches!(stmt.kind, StmtKind::Expression(_)) => last = value,
                Ok(_) => last = Value::Void,
                Err(ControlSignal::Return(value)) => return Ok(value),
                Err(signal) => return Err(self.signal_to_error(signal, stmt.span)),
            }
        }
        Ok(last)
    }

    /// Bind every top-level `infect` before the first statement runs, so a
    /// call may precede its declaration. Reserved names are left for the
    /// declaration itself to reject in order.
    fn hoist_functions(&mut self, statements: &[Stmt]) -> RuntimeResult<()> {
        for stmt in statements {
            if let StmtKind::Function(decl) = &stmt.kind {
                if !is_reserved(&decl.name) {
                    self.declare_function(decl)?;
                }
            }
        }
        Ok(())
    }

    /// Collapse a signal that escaped every construct able to absorb it.
    pub(crate) fn signal_to_error(&self, signal: ControlSignal, span: Span) -> RuntimeError {
        match signal {
            ControlSignal::Raised(err) => err,
            ControlSignal::Break => RuntimeError::new("'flee' outside of a loop", span),
            ControlSignal::Continue => RuntimeError::new("'persist' outside of a loop", span),
            ControlSignal::Return(_) => RuntimeError::new("'reap' outside of a function", span),
        }
    }

    /// Zeroize every secure string created by this run.
    pub fn clear_secure_strings(&mut self) {
        if !self.secure_strings.is_empty() {
            debug!(count = self.secure_strings.len(), "clearing secure strings");
        }
        for secret in self.secure_strings.drain(..) {
            secret.clear();
        }
    }

    pub(crate) fn track_secure(&mut self, secret: &Arc<SecureString>) {
        self.secure_strings.push(Arc::clone(secret));
    }

    /// Run `f` inside a fresh child of the current scope.
    pub(crate) fn with_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.env.push_scope();
        let result = f(self);
        self.env.pop_scope();
        result
    }

    /// Run `f` in a scope whose parent is the root, as calls do.
    pub(crate) fn with_call_scope<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.env.push_scope_with_parent(ROOT_SCOPE);
        let result = f(self);
        self.env.pop_scope();
        result
    }

    /// Execute statements in order, stopping at the first signal.
    pub(crate) fn execute_statements(&mut self, statements: &[Stmt]) -> ExecResult {
        let mut last = Value::Void;
        for stmt in statements {
            last = self.execute(stmt)?;
        }
        Ok(last)
    }

    pub(crate) fn execute_block(&mut self, statements: &[Stmt]) -> ExecResult {
        self.with_scope(|this| this.execute_statements(statements))
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for Interpreter {
    fn write_line(&mut self, line: &str) {
        self.output.lock().write_line(line);
    }

    fn read_line(&mut self) -> Option<String> {
        self.input.lock().read_line()
    }

    fn guard(&mut self) -> &mut ResourceGuard {
        &mut self.guard
    }
}
