//! Hot path detection for the bytecode VM.
//!
//! The profiler only produces hints: which instructions, loops and
//! functions dominate a run. Nothing here generates or swaps in code.

mod profiler;

pub use profiler::{
    ExecutionProfile, HotPath, Profiler, HOT_FUNCTION_THRESHOLD, HOT_INSTRUCTION_FRACTION,
    HOT_LOOP_THRESHOLD,
};

use serde::Serialize;

/// Summary of a profiled run, as dumped by `reaper run --profile`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationHints {
    pub hot_instructions: Vec<usize>,
    pub hot_loops: Vec<usize>,
    pub hot_functions: Vec<String>,
    pub total_instructions: u64,
    pub hot_paths: Vec<HotPath>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Compiler, VM};
    use crate::config::EngineConfig;
    use crate::interpreter::output::CaptureSink;

    fn profile_run(source: &str) -> OptimizationHints {
        let tokens = crate::lexer::Scanner::new(source).scan_tokens().unwrap();
        let program = crate::parser::Parser::new(tokens).parse().unwrap();
        let program = Compiler::new().compile(&program).unwrap();
        let config = EngineConfig {
            profile: true,
            ..EngineConfig::default()
        };
        let mut vm = VM::with_config(config).with_output(CaptureSink::new().shared());
        vm.execute(program).unwrap();
        vm.profiler().unwrap().suggestions()
    }

    #[test]
    fn test_hot_loop_and_function_detected() {
        let hints = profile_run(
            r#"
            infect bump(corpse n) { reap n + 1; }
            corpse total = 0;
            shamble i from 1 to 150 { total = bump(total); }
            "#,
        );
        assert_eq!(hints.hot_functions, vec!["bump".to_string()]);
        assert_eq!(hints.hot_loops.len(), 1);
        assert!(hints.total_instructions > 150);
        assert!(!hints.hot_paths.is_empty());
    }

    #[test]
    fn test_straight_line_code_has_no_loops() {
        let hints = profile_run("corpse x = 1; harvest x;");
        assert!(hints.hot_loops.is_empty());
        assert!(hints.hot_functions.is_empty());
    }
}
