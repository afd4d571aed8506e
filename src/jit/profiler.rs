//! Execution profiler for hot path detection.
//!
//! Counts what the VM executes: instructions, non-sequential control
//! edges, loop entries (targets of backward jumps) and function calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::bytecode::instruction::{Instruction, OpCode};

/// Default fraction of all executed instructions that makes one "hot".
pub const HOT_INSTRUCTION_FRACTION: f64 = 0.1;
/// Loop entries before a loop counts as hot.
pub const HOT_LOOP_THRESHOLD: u64 = 100;
/// Calls before a function counts as hot.
pub const HOT_FUNCTION_THRESHOLD: u64 = 10;

/// Raw execution counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionProfile {
    pub instruction_counts: BTreeMap<usize, u64>,
    #[serde(serialize_with = "serialize_edges")]
    pub edge_counts: BTreeMap<(usize, usize), u64>,
    pub loop_entries: BTreeMap<usize, u64>,
    pub function_calls: BTreeMap<String, u64>,
    pub total_instructions: u64,
}

#[derive(Serialize)]
struct Edge {
    from: usize,
    to: usize,
    count: u64,
}

fn serialize_edges<S: Serializer>(
    edges: &BTreeMap<(usize, usize), u64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(edges.len()))?;
    for (&(from, to), &count) in edges {
        seq.serialize_element(&Edge { from, to, count })?;
    }
    seq.end()
}

/// A hot instruction and the successor it most often jumps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotPath {
    pub path: Vec<usize>,
    pub count: u64,
}

impl ExecutionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_instruction(&mut self, pc: usize) {
        *self.instruction_counts.entry(pc).or_insert(0) += 1;
        self.total_instructions += 1;
    }

    pub fn record_edge(&mut self, from: usize, to: usize) {
        *self.edge_counts.entry((from, to)).or_insert(0) += 1;
    }

    pub fn record_loop_entry(&mut self, pc: usize) {
        *self.loop_entries.entry(pc).or_insert(0) += 1;
    }

    pub fn record_function_call(&mut self, name: &str) {
        *self.function_calls.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Instructions executed at least `threshold` of the total count.
    pub fn hot_instructions(&self, threshold: f64) -> BTreeSet<usize> {
        if self.total_instructions == 0 {
            return BTreeSet::new();
        }
        let min_count = (self.total_instructions as f64 * threshold) as u64;
        self.instruction_counts
            .iter()
            .filter(|(_, &count)| count >= min_count)
            .map(|(&pc, _)| pc)
            .collect()
    }

    pub fn hot_loops(&self, threshold: u64) -> Vec<usize> {
        self.loop_entries
            .iter()
            .filter(|(_, &count)| count >= threshold)
            .map(|(&pc, _)| pc)
            .collect()
    }

    pub fn hot_functions(&self, threshold: u64) -> Vec<String> {
        self.function_calls
            .iter()
            .filter(|(_, &count)| count >= threshold)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The `max_paths` most executed instructions that have an outgoing
    /// edge, each followed by its heaviest edge target.
    pub fn analyze_hot_paths(&self, max_paths: usize) -> Vec<HotPath> {
        let mut ranked: Vec<(usize, u64)> = self
            .instruction_counts
            .iter()
            .map(|(&pc, &count)| (pc, count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(max_paths)
            .filter_map(|(pc, count)| {
                let (&(_, to), _) = self
                    .edge_counts
                    .range((pc, 0)..=(pc, usize::MAX))
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0 .1.cmp(&a.0 .1)))?;
                Some(HotPath {
                    path: vec![pc, to],
                    count,
                })
            })
            .collect()
    }
}

/// Passive observer the VM calls after every instruction.
#[derive(Debug, Clone)]
pub struct Profiler {
    enabled: bool,
    hot_threshold: f64,
    profile: ExecutionProfile,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hot_threshold: HOT_INSTRUCTION_FRACTION,
            profile: ExecutionProfile::new(),
        }
    }

    pub fn with_hot_threshold(mut self, threshold: f64) -> Self {
        self.hot_threshold = threshold;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn profile(&self) -> &ExecutionProfile {
        &self.profile
    }

    /// Record one executed instruction. `next_pc` is `None` when the
    /// instruction halted the program.
    pub fn record_execution(&mut self, pc: usize, instruction: &Instruction, next_pc: Option<usize>) {
        if !self.enabled {
            return;
        }
        self.profile.record_instruction(pc);
        if let Some(next) = next_pc {
            if next != pc + 1 {
                self.profile.record_edge(pc, next);
            }
        }
        if instruction.opcode == OpCode::Jmp {
            if let Some(target) = instruction.jump_target() {
                if target < pc {
                    self.profile.record_loop_entry(target);
                }
            }
        }
    }

    pub fn record_function_call(&mut self, name: &str) {
        if self.enabled {
            self.profile.record_function_call(name);
        }
    }

    /// Whether the instruction at `pc` is currently hot.
    pub fn is_hot(&self, pc: usize) -> bool {
        self.enabled && self.profile.hot_instructions(self.hot_threshold).contains(&pc)
    }

    pub fn suggestions(&self) -> super::OptimizationHints {
        let hints = super::OptimizationHints {
            hot_instructions: self
                .profile
                .hot_instructions(self.hot_threshold)
                .into_iter()
                .collect(),
            hot_loops: self.profile.hot_loops(HOT_LOOP_THRESHOLD),
            hot_functions: self.profile.hot_functions(HOT_FUNCTION_THRESHOLD),
            total_instructions: self.profile.total_instructions,
            hot_paths: self.profile.analyze_hot_paths(5),
        };
        debug!(
            hot_loops = hints.hot_loops.len(),
            hot_functions = hints.hot_functions.len(),
            "profile summarized"
        );
        hints
    }

    pub fn reset(&mut self) {
        self.profile = ExecutionProfile::new();
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instruction::Operand;
    use crate::span::Span;
    use pretty_assertions::assert_eq;

    fn jmp(target: i64) -> Instruction {
        Instruction::with_operand(OpCode::Jmp, Operand::Int(target), Span::default())
    }

    fn nop() -> Instruction {
        Instruction::new(OpCode::Dup, Span::default())
    }

    #[test]
    fn test_backward_jump_records_loop() {
        let mut profiler = Profiler::new(true);
        for _ in 0..3 {
            profiler.record_execution(0, &nop(), Some(1));
            profiler.record_execution(1, &jmp(0), Some(0));
        }
        let profile = profiler.profile();
        assert_eq!(profile.total_instructions, 6);
        assert_eq!(profile.loop_entries.get(&0), Some(&3));
        assert_eq!(profile.edge_counts.get(&(1, 0)), Some(&3));
        assert!(profile.edge_counts.get(&(0, 1)).is_none());
        assert_eq!(profile.hot_loops(3), vec![0]);
        assert!(profile.hot_loops(4).is_empty());
    }

    #[test]
    fn test_disabled_profiler_records_nothing() {
        let mut profiler = Profiler::new(false);
        profiler.record_execution(0, &nop(), Some(1));
        profiler.record_function_call("f");
        assert_eq!(profiler.profile(), &ExecutionProfile::new());
    }

    #[test]
    fn test_hot_queries() {
        let mut profile = ExecutionProfile::new();
        assert!(profile.hot_instructions(0.1).is_empty());
        for _ in 0..9 {
            profile.record_instruction(4);
        }
        profile.record_instruction(7);
        let hot: Vec<usize> = profile.hot_instructions(0.5).into_iter().collect();
        assert_eq!(hot, vec![4]);

        for _ in 0..10 {
            profile.record_function_call("reap_souls");
        }
        profile.record_function_call("rare");
        assert_eq!(profile.hot_functions(10), vec!["reap_souls".to_string()]);
    }

    #[test]
    fn test_hot_paths_follow_heaviest_edge() {
        let mut profile = ExecutionProfile::new();
        for _ in 0..5 {
            profile.record_instruction(2);
        }
        profile.record_instruction(3);
        profile.record_edge(2, 8);
        profile.record_edge(2, 0);
        profile.record_edge(2, 0);
        let paths = profile.analyze_hot_paths(10);
        assert_eq!(
            paths,
            vec![HotPath {
                path: vec![2, 0],
                count: 5
            }]
        );
    }

    #[test]
    fn test_profile_serializes_edges_as_list() {
        let mut profile = ExecutionProfile::new();
        profile.record_edge(3, 1);
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["edge_counts"][0]["from"], 3);
        assert_eq!(json["edge_counts"][0]["to"], 1);
        assert_eq!(json["edge_counts"][0]["count"], 1);
    }
}
