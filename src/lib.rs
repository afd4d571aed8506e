//! REAPER: a death-themed scripting language for security operations.
//!
//! This is the library root that exports all modules.
//!
//! # Execution Modes
//!
//! REAPER supports two execution modes:
//! - **Tree-walk interpreter**: the full language, interpreted from the AST
//! - **Bytecode VM**: the procedural subset, compiled to REAP bytecode

#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

pub mod ast;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod jit;
pub mod lexer;
pub mod parser;
pub mod span;

use std::path::Path;
use std::sync::Once;

use tracing::{debug, info_span};

use config::EngineConfig;
use error::ReaperError;
use interpreter::Completion;
use jit::OptimizationHints;

/// Execution mode for running REAPER programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Tree-walking interpreter (default, supports every construct)
    #[default]
    TreeWalk,
    /// Bytecode virtual machine
    Bytecode,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub completion: Completion,
    /// Present for bytecode runs with profiling enabled.
    pub profile: Option<OptimizationHints>,
}

impl RunReport {
    /// Process exit status for this run.
    pub fn exit_code(&self) -> i32 {
        match self.completion {
            Completion::Exited(code) => code,
            Completion::Finished(_) => 0,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the `tracing` subscriber.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=reaper=debug` or `RUST_LOG=reaper=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

/// Run a REAPER program from source code using the default execution mode.
pub fn run(source: &str) -> Result<RunReport, ReaperError> {
    run_with_options(source, ExecutionMode::default(), &EngineConfig::default(), &[])
}

/// Run a REAPER program with bytecode VM.
pub fn run_bytecode(source: &str) -> Result<RunReport, ReaperError> {
    run_with_options(source, ExecutionMode::Bytecode, &EngineConfig::default(), &[])
}

/// Run a REAPER program with full control over execution options.
pub fn run_with_options(
    source: &str,
    mode: ExecutionMode,
    config: &EngineConfig,
    args: &[String],
) -> Result<RunReport, ReaperError> {
    let _span = info_span!("run", ?mode).entered();
    let program = parse(source)?;

    match mode {
        ExecutionMode::TreeWalk => {
            let completion = on_interpreter_stack(config, || {
                let mut interpreter =
                    interpreter::Interpreter::with_config(config.clone()).with_args(args);
                interpreter.interpret(&program)
            })??;
            Ok(RunReport {
                completion,
                profile: None,
            })
        }
        ExecutionMode::Bytecode => {
            let compiled = bytecode::Compiler::new().compile(&program)?;
            run_program(compiled, config, args)
        }
    }
}

/// Run `f` on a scoped thread whose stack fits `max_recursion_depth`
/// nested interpreter calls, whatever the caller's own stack is.
fn on_interpreter_stack<T, F>(config: &EngineConfig, f: F) -> Result<T, ReaperError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("reaper-interpreter".into())
            .stack_size(config.interpreter_stack_size())
            .spawn_scoped(scope, f)?;
        handle.join().map_err(|_| {
            ReaperError::Runtime(error::RuntimeError::new(
                "Interpreter thread panicked",
                span::Span::default(),
            ))
        })
    })
}

/// Execute an already compiled program on the VM.
pub fn run_program(
    program: bytecode::BytecodeProgram,
    config: &EngineConfig,
    args: &[String],
) -> Result<RunReport, ReaperError> {
    let mut vm = bytecode::VM::with_config(config.clone()).with_args(args);
    let completion = vm.execute(program)?;
    debug!(instructions = vm.instruction_count(), "bytecode run finished");
    Ok(RunReport {
        completion,
        profile: vm.profiler().map(|profiler| profiler.suggestions()),
    })
}

/// Run a REAPER program from a file path.
pub fn run_file(
    path: &Path,
    mode: ExecutionMode,
    config: &EngineConfig,
    args: &[String],
) -> Result<RunReport, ReaperError> {
    let source = std::fs::read_to_string(path)?;
    run_with_options(&source, mode, config, args)
}

/// Parse source code into an AST without executing.
pub fn parse(source: &str) -> Result<ast::Program, ReaperError> {
    let tokens = lexer::Scanner::new(source).scan_tokens()?;
    let program = parser::Parser::new(tokens).parse()?;
    Ok(program)
}

/// Compile source code to bytecode without executing.
pub fn compile(source: &str) -> Result<bytecode::BytecodeProgram, ReaperError> {
    let program = parse(source)?;
    Ok(bytecode::Compiler::new().compile(&program)?)
}

/// Compile source code straight to REAP bytes.
pub fn compile_to_bytes(source: &str) -> Result<Vec<u8>, ReaperError> {
    Ok(bytecode::serialize(&compile(source)?)?)
}

/// Load a REAP file and run it on the VM.
pub fn exec_bytes(
    bytes: &[u8],
    config: &EngineConfig,
    args: &[String],
) -> Result<RunReport, ReaperError> {
    run_program(bytecode::deserialize(bytes)?, config, args)
}

/// Disassemble compiled bytecode to a string.
pub fn disassemble(program: &bytecode::BytecodeProgram) -> String {
    bytecode::disassemble(program)
}
