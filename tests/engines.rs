//! Differential tests: the tree-walking interpreter and the bytecode VM
//! must agree on every program the bytecode backend accepts.

use proptest::prelude::*;

use reaper::ast::Program;
use reaper::bytecode::{Compiler, VM};
use reaper::error::ErrorKind;
use reaper::interpreter::{CaptureSink, Completion, Interpreter, Value};
use reaper::lexer::Scanner;
use reaper::parser::Parser;

/// What a run produced, in a form both engines can be compared on.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Ok { lines: Vec<String>, value: String },
    Exited { lines: Vec<String>, code: i32 },
    Failed { kind: ErrorKind, message: String },
}

fn parse(source: &str) -> Program {
    let tokens = Scanner::new(source).scan_tokens().expect("lexer error");
    Parser::new(tokens).parse().expect("parser error")
}

fn outcome(result: Result<Completion, reaper::error::RuntimeError>, lines: Vec<String>) -> Outcome {
    match result {
        Ok(Completion::Finished(value)) => Outcome::Ok {
            lines,
            value: value.repr(),
        },
        Ok(Completion::Exited(code)) => Outcome::Exited { lines, code },
        // Name hints depend on each engine's scoping, so they are dropped.
        Err(err) => Outcome::Failed {
            kind: err.kind,
            message: match err.message.split_once(" Available names") {
                Some((head, _)) => head.to_string(),
                None => err.message,
            },
        },
    }
}

fn interpret(source: &str) -> Outcome {
    let sink = CaptureSink::new();
    let mut interpreter = Interpreter::new().with_output(sink.shared());
    let result = interpreter.interpret(&parse(source));
    outcome(result, sink.lines())
}

fn execute(source: &str, peephole: bool) -> Outcome {
    let program = Compiler::new()
        .with_peephole(peephole)
        .compile(&parse(source))
        .expect("compile error");
    let sink = CaptureSink::new();
    let mut vm = VM::new().with_output(sink.shared());
    let result = vm.execute(program);
    outcome(result, sink.lines())
}

fn assert_engines_agree(source: &str) -> Outcome {
    let expected = interpret(source);
    assert_eq!(execute(source, true), expected, "optimized VM diverged on {}", source);
    assert_eq!(execute(source, false), expected, "plain VM diverged on {}", source);
    expected
}

#[test]
fn test_end_to_end_examples() {
    assert_eq!(
        assert_engines_agree("corpse a = 10; corpse b = 20; harvest a + b;"),
        Outcome::Ok {
            lines: vec!["30".into()],
            value: "void".into()
        }
    );
    match assert_engines_agree("corpse x = 5; corpse y = 0; harvest x / y;") {
        Outcome::Failed { kind, .. } => assert_eq!(kind, ErrorKind::ZeroDivision),
        other => panic!("expected a failure, got {:?}", other),
    }
    match assert_engines_agree("shamble i from 1 to 3 { harvest i; }") {
        Outcome::Ok { lines, .. } => assert_eq!(lines, vec!["1", "2", "3"]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_control_flow_agrees() {
    for source in [
        "corpse n = 0; soulless { n += 1; if (n == 4) { flee; } } harvest n;",
        "decay c in \"grave\" { if (c == \"a\") { persist; } harvest c; }",
        "corpse x = 3; if (x > 5) { harvest 1; } otherwise if (x > 2) { harvest 2; } otherwise { harvest 3; }",
        "judge (3) { case 1 { harvest \"one\"; } case 3 { harvest \"three\"; } default { harvest \"?\"; } }",
        "shamble i from 1 to 4 { shamble j from i to 4 { if (j == 3) { flee; } harvest i * 10 + j; } }",
        "harvest DEAD corrupt (1 / 0); harvest RISEN infest (1 / 0);",
    ] {
        assert_engines_agree(source);
    }
}

#[test]
fn test_functions_agree() {
    for source in [
        "infect greet(soul who, soul how = \"Hail\") { reap how + \" \" + who; } harvest greet(\"Mort\"), greet(\"Mort\", \"Begone\");",
        "infect fact(corpse n) { if (n <= 1) { reap 1; } reap n * fact(n - 1); } fact(12);",
        "infect noop() { corpse x = 1; } harvest noop();",
        "infect f(corpse a) { reap a; } f(1, 2);",
        "infect order(corpse a, corpse b, corpse c) { reap a * 100 + b * 10 + c; } order(1, 2, 3);",
        "corpse g = 1; infect bump() { g = g + 1; reap g; } bump(); bump(); g;",
    ] {
        assert_engines_agree(source);
    }
}

#[test]
fn test_collections_and_strings_agree() {
    for source in [
        "crypt xs = [3, 1, 2]; xs[1] += 5; xs.entomb(9); harvest xs, xs.length;",
        "grimoire g = {\"a\": 1}; g[\"b\"] = 2; g.a *= 10; harvest g;",
        "harvest [x * x for x in [1, 2, 3, 4] if x % 2 == 0];",
        "harvest \"necropolis\"[2:6], [1, 2, 3, 4, 5][::-2];",
        "corpse n = 4; harvest \"#{n} souls, #{n * 2} hands\";",
        "soul s = \"Night Shade\"; harvest s.scream(), s.haunt(\"Shade\");",
        "crypt xs = [1]; harvest xs[5];",
        "grimoire g = {}; harvest g[\"missing\"];",
    ] {
        assert_engines_agree(source);
    }
}

#[test]
fn test_errors_and_exit_agree() {
    for source in [
        "harvest ghost;",
        "shamble i from 1 to 2 { corpse t = i; } harvest t;",
        "harvest 1 + \"x\" - 1;",
        "harvest 1; final_rest(3); harvest 2;",
        "corpse harvest = 1;",
    ] {
        assert_engines_agree(source);
    }
}

#[test]
fn test_compound_assignment_reads_target_first() {
    for (source, expected) in [
        ("corpse x = 1; infect bump() { x = 10; reap 1; } x += bump(); harvest x;", "2"),
        ("crypt xs = [1]; infect bump() { xs[0] = 10; reap 1; } xs[0] += bump(); harvest xs[0];", "2"),
        ("grimoire g = {\"n\": 1}; infect bump() { g.n = 10; reap 1; } g.n += bump(); harvest g.n;", "2"),
    ] {
        match assert_engines_agree(source) {
            Outcome::Ok { lines, .. } => assert_eq!(lines, vec![expected]),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn test_forward_calls_agree() {
    match assert_engines_agree("harvest later(); infect later() { reap 7; }") {
        Outcome::Ok { lines, .. } => assert_eq!(lines, vec!["7"]),
        other => panic!("unexpected {:?}", other),
    }
    assert_engines_agree("infect even(corpse n) { if (n == 0) { reap RISEN; } reap odd(n - 1); } infect odd(corpse n) { if (n == 0) { reap DEAD; } reap even(n - 1); } harvest even(10);");
}

#[test]
fn test_breach_writes_are_kept() {
    let source = "corpse n = 1; corpse t = breach { n = 5; }; await t; harvest n;";
    match interpret(source) {
        Outcome::Ok { lines, .. } => assert_eq!(lines, vec!["5"]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_bitwise_agrees() {
    assert_engines_agree("harvest 12 mutate 10, \" \", 6 rot 4;");
    assert_engines_agree("corpse a = 5; harvest a mutate 3;");
}

#[test]
fn test_final_value_is_shared() {
    let expected = Outcome::Ok {
        lines: vec![],
        value: "42".into(),
    };
    assert_eq!(assert_engines_agree("corpse x = 6; x * 7;"), expected);
    let void = Outcome::Ok {
        lines: vec![],
        value: "void".into(),
    };
    assert_eq!(assert_engines_agree("if (RISEN) { 5; }"), void);
    assert_eq!(assert_engines_agree("corpse x = 4; x * 2; corpse y = x;"), void);
    let value = match interpret("reap 5; harvest 1;") {
        Outcome::Ok { value, .. } => value,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(value, Value::Int(5).repr());
}

fn arb_binop() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("+"),
        Just("-"),
        Just("*"),
        Just("/"),
        Just("%"),
        Just("=="),
        Just("<"),
        Just(">="),
        Just("mutate"),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_integer_literals_denote_their_value(n in 0i64..i64::MAX) {
        for literal in [n.to_string(), format!("0x{:x}", n), format!("0b{:b}", n)] {
            let source = format!("{};", literal);
            let expected = Outcome::Ok { lines: vec![], value: n.to_string() };
            prop_assert_eq!(interpret(&source), expected);
            prop_assert_eq!(execute(&source, true), interpret(&source));
        }
    }

    #[test]
    fn prop_float_literals_denote_their_value(whole in 0u32..100_000, frac in 0u32..1000) {
        let literal = format!("{}.{:03}", whole, frac);
        let expected: f64 = literal.parse().unwrap();
        let source = format!("{};", literal);
        prop_assert_eq!(interpret(&source), Outcome::Ok { lines: vec![], value: Value::Float(expected).repr() });
        prop_assert_eq!(execute(&source, true), interpret(&source));
    }

    #[test]
    fn prop_folded_arithmetic_matches_interpreter(a in 0i64..10_000, b in 0i64..50, op in arb_binop()) {
        let source = format!("harvest {} {} {};", a, op, b);
        let expected = interpret(&source);
        prop_assert_eq!(execute(&source, true), expected.clone());
        prop_assert_eq!(execute(&source, false), expected);
    }
}
