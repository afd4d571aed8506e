use std::sync::Arc;

use pretty_assertions::assert_eq;

use super::*;
use crate::error::ErrorKind;
use crate::interpreter::modules::StaticModuleLoader;
use crate::interpreter::output::{CaptureSink, ScriptedInput};
use crate::lexer::Scanner;
use crate::parser::Parser;

fn parse(source: &str) -> Program {
    let tokens = Scanner::new(source).scan_tokens().unwrap();
    Parser::new(tokens).parse().unwrap()
}

fn run_with(interpreter: Interpreter, source: &str) -> (RuntimeResult<Completion>, Vec<String>) {
    let sink = CaptureSink::new();
    let mut interpreter = interpreter.with_output(sink.shared());
    let result = interpreter.interpret(&parse(source));
    (result, sink.lines())
}

fn output(source: &str) -> Vec<String> {
    let (result, lines) = run_with(Interpreter::new(), source);
    result.unwrap();
    lines
}

fn error(source: &str) -> RuntimeError {
    run_with(Interpreter::new(), source).0.unwrap_err()
}

fn value(source: &str) -> Value {
    match run_with(Interpreter::new(), source).0.unwrap() {
        Completion::Finished(value) => value,
        other => panic!("expected a value, got {:?}", other),
    }
}

#[test]
fn test_arithmetic_and_harvest() {
    assert_eq!(output("corpse a = 10; corpse b = 20; harvest a + b;"), vec!["30"]);
    assert_eq!(output("harvest 7 / 2, \" \", 7.0 / 2;"), vec!["3 3.5"]);
    assert_eq!(output("harvest -7 % 3;"), vec!["2"]);
}

#[test]
fn test_division_by_zero() {
    let err = error("corpse x = 5; corpse y = 0; harvest x / y;");
    assert_eq!(err.kind, ErrorKind::ZeroDivision);
}

#[test]
fn test_shamble_is_inclusive() {
    assert_eq!(output("shamble i from 1 to 3 { harvest i; }"), vec!["1", "2", "3"]);
    assert!(output("shamble i from 3 to 1 { harvest i; }").is_empty());
}

#[test]
fn test_flee_and_persist() {
    let source = r#"
        shamble i from 1 to 10 {
            if (i % 2 == 0) { persist; }
            if (i > 5) { flee; }
            harvest i;
        }
    "#;
    assert_eq!(output(source), vec!["1", "3", "5"]);
}

#[test]
fn test_decay_over_collections() {
    assert_eq!(output("decay c in \"ab\" { harvest c; }"), vec!["a", "b"]);
    assert_eq!(
        output("grimoire g = {\"x\": 1, \"y\": 2}; decay k in g { harvest k, g[k]; }"),
        vec!["x1", "y2"]
    );
}

#[test]
fn test_soulless_until_flee() {
    let source = "corpse n = 0; soulless { n += 1; if (n == 4) { flee; } } harvest n;";
    assert_eq!(output(source), vec!["4"]);
}

#[test]
fn test_judge_first_match_no_fallthrough() {
    let source = r#"
        judge (2) {
            case 1 { harvest "one"; }
            case 2 { harvest "two"; }
            case 2 { harvest "again"; }
            default { harvest "other"; }
        }
        judge (9) { case 1 { harvest "one"; } default { harvest "other"; } }
    "#;
    assert_eq!(output(source), vec!["two", "other"]);
}

#[test]
fn test_function_defaults_and_recursion() {
    let source = r#"
        infect greet(soul name, soul greeting = "Hail") { reap greeting + ", " + name; }
        infect fact(corpse n) { if (n <= 1) { reap 1; } reap n * fact(n - 1); }
        harvest greet("Reaper");
        harvest greet("Reaper", "Begone");
        harvest fact(10);
    "#;
    assert_eq!(output(source), vec!["Hail, Reaper", "Begone, Reaper", "3628800"]);
}

#[test]
fn test_function_without_reap_returns_void() {
    assert_eq!(output("infect f() { corpse x = 1; } harvest f();"), vec!["void"]);
}

#[test]
fn test_too_many_arguments() {
    let err = error("infect f(corpse a) { reap a; } f(1, 2);");
    assert_eq!(err.message, "Function 'f' expects 1 arguments, got 2");
}

#[test]
fn test_recursion_limit() {
    let config = EngineConfig {
        max_recursion_depth: 20,
        ..EngineConfig::default()
    };
    let (result, _) = run_with(
        Interpreter::with_config(config),
        "infect down(corpse n) { reap down(n + 1); } down(0);",
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Recursion);
    assert!(err.trace.len() >= 20);
}

#[test]
fn test_lambda_captures_by_value() {
    let source = r#"
        infect make_adder(corpse n) { reap infect (corpse x) => x + n; }
        corpse add5 = make_adder(5);
        harvest add5(10);
    "#;
    assert_eq!(output(source), vec!["15"]);
}

#[test]
fn test_block_scoping() {
    let source = "corpse x = 1; { corpse x = 2; harvest x; } harvest x;";
    assert_eq!(output(source), vec!["2", "1"]);
    let err = error("{ corpse inner = 1; } harvest inner;");
    assert!(err.message.starts_with("Undefined variable 'inner'"));
}

#[test]
fn test_constants_and_builtins_are_protected() {
    let err = error("eternal corpse x = 1; x = 2;");
    assert_eq!(err.message, "Cannot modify constant 'x'");
    let err = error("corpse harvest = 1;");
    assert_eq!(err.message, "Cannot redefine reserved identifier 'harvest'");
}

#[test]
fn test_compound_assignment_on_collections() {
    let source = r#"
        crypt xs = [1, 2, 3];
        xs[0] += 10;
        grimoire g = {"hits": 1};
        g.hits *= 5;
        harvest xs, " ", g;
    "#;
    assert_eq!(output(source), vec!["[11, 2, 3] {'hits': 5}"]);
}

#[test]
fn test_methods_and_properties() {
    let source = r#"
        crypt xs = [3, 1];
        xs.entomb(7);
        harvest xs.curse(), xs.length;
        soul s = "Night Shade";
        harvest s.scream(), s.haunt("Shade");
    "#;
    assert_eq!(output(source), vec!["33", "NIGHT SHADERISEN"]);
}

#[test]
fn test_comprehension_and_slices() {
    let source = r#"
        crypt evens = [x * x for x in [1, 2, 3, 4] if x % 2 == 0];
        harvest evens;
        harvest [1, 2, 3, 4, 5][1:4], "grave"[::-1];
    "#;
    assert_eq!(output(source), vec!["[4, 16]", "[2, 3, 4]evarg"]);
}

#[test]
fn test_interpolation() {
    assert_eq!(output("corpse n = 3; harvest \"#{n} souls, #{n * 2} hands\";"), vec!["3 souls, 6 hands"]);
}

#[test]
fn test_class_constructor_and_methods() {
    let source = r#"
        tomb Vault {
            corpse opened = 0;
            soul owner;
            infect Vault(soul who) { this.owner = who; reap 99; }
            infect open() { this.opened += 1; reap this.owner + " opened"; }
        }
        tomb v = spawn Vault("Mort");
        harvest v.open();
        harvest v.opened;
    "#;
    assert_eq!(output(source), vec!["Mort opened", "1"]);
}

#[test]
fn test_constructor_arity() {
    let err = error("tomb A { infect A(corpse x) { } } spawn A();");
    assert_eq!(err.message, "Constructor 'A' expects 1 arguments, got 0");
    let err = error("tomb B { } spawn B(1);");
    assert_eq!(err.message, "Class 'B' has no constructor but got 1 arguments");
}

#[test]
fn test_risk_catch_finally() {
    let source = r#"
        risk {
            harvest 1 / 0;
        } catch (ReaperZeroDivisionError e) {
            harvest "caught ", e.type;
        } finally {
            harvest "finally";
        }
    "#;
    assert_eq!(
        output(source),
        vec!["caught ReaperZeroDivisionError", "finally"]
    );
}

#[test]
fn test_unmatched_error_propagates_after_finally() {
    let source = r#"
        risk { throw ReaperKeyError "missing"; }
        catch (ReaperTypeError e) { harvest "wrong"; }
        finally { harvest "cleanup"; }
    "#;
    let (result, lines) = run_with(Interpreter::new(), source);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Key);
    assert_eq!(err.message, "missing");
    assert_eq!(lines, vec!["cleanup"]);
}

#[test]
fn test_base_error_catches_everything() {
    let source = r#"
        risk { crypt xs = [1]; harvest xs[5]; }
        catch (ReaperError e) { harvest e.message; }
    "#;
    assert_eq!(output(source), vec!["Array index 5 out of bounds"]);
}

#[test]
fn test_throw_defaults() {
    let err = error("throw;");
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert_eq!(err.message, "Exception raised");
}

#[test]
fn test_legacy_exploit() {
    let source = "exploit { throw ReaperTypeError \"bad\"; } otherwise (ReaperTypeError) { harvest \"handled\"; }";
    assert_eq!(output(source), vec!["handled"]);
}

#[test]
fn test_final_rest_is_not_caught() {
    let source = "risk { final_rest(3); } catch () { harvest \"no\"; } harvest \"after\";";
    let (result, lines) = run_with(Interpreter::new(), source);
    assert_eq!(result.unwrap(), Completion::Exited(3));
    assert!(lines.is_empty());
}

#[test]
fn test_breach_and_await() {
    let source = r#"
        corpse base = 40;
        corpse task = breach { reap base + 2; };
        harvest await task;
    "#;
    assert_eq!(output(source), vec!["42"]);
}

#[test]
fn test_breach_writes_enclosing_bindings() {
    let source = r#"
        corpse x = 0;
        corpse t = breach { x = 5; corpse inner = 1; reap x; };
        harvest await t;
        harvest x;
    "#;
    assert_eq!(output(source), vec!["5", "5"]);
    let err = error("corpse t = breach { corpse inner = 1; }; await t; harvest inner;");
    assert!(err.message.starts_with("Undefined variable 'inner'"));
}

#[test]
fn test_await_propagates_task_error() {
    let err = error("corpse t = breach { throw ReaperKeyError \"lost\"; }; await t;");
    assert_eq!(err.kind, ErrorKind::Key);
    assert_eq!(err.message, "lost");
    let err = error("await 5;");
    assert_eq!(err.message, "Cannot await non-async value: corpse");
}

#[test]
fn test_infiltrate_namespace_and_symbols() {
    let loader = StaticModuleLoader::new();
    loader.register(
        "hexcraft",
        vec![
            ("key_size".to_string(), Value::Int(256)),
            ("cipher".to_string(), Value::text("aes")),
        ],
    );
    let interpreter = Interpreter::new().with_modules(Arc::new(loader));
    let source = r#"
        infiltrate hexcraft as hx;
        infiltrate hexcraft (cipher);
        harvest hx.key_size, " ", cipher;
    "#;
    let (result, lines) = run_with(interpreter, source);
    result.unwrap();
    assert_eq!(lines, vec!["256 aes"]);

    let err = error("infiltrate nowhere;");
    assert_eq!(
        err.message,
        "Failed to import module 'nowhere': Module 'nowhere' not found"
    );
}

#[test]
fn test_shadow_values_are_cleared_after_run() {
    let source = "shadow pin = \"1234\"; harvest pin; reap pin;";
    let (result, lines) = run_with(Interpreter::new(), source);
    assert_eq!(lines, vec!["SecureString(len=4)"]);
    match result.unwrap() {
        Completion::Finished(Value::Secure(secret)) => assert!(secret.is_empty()),
        other => panic!("unexpected completion {:?}", other),
    }
}

#[test]
fn test_cloak_records_feature() {
    let mut interpreter = Interpreter::new().with_output(CaptureSink::new().shared());
    interpreter.interpret(&parse("cloak tor_routing;")).unwrap();
    assert_eq!(interpreter.cloaked_features(), ["tor_routing".to_string()]);
}

#[test]
fn test_summon_reads_input() {
    let interpreter =
        Interpreter::new().with_input(ScriptedInput::shared(["necromancer"]));
    let (result, lines) = run_with(interpreter, "harvest summon(); harvest summon();");
    result.unwrap();
    assert_eq!(lines, vec!["necromancer", "void"]);
}

#[test]
fn test_ritual_args() {
    let interpreter = Interpreter::new().with_args(&["-v".to_string(), "grave".to_string()]);
    let (result, lines) = run_with(interpreter, "harvest ritual_args[1], ritual_args.length;");
    result.unwrap();
    assert_eq!(lines, vec!["grave2"]);
}

#[test]
fn test_top_level_value() {
    assert_eq!(value("corpse x = 4; x * 2;"), Value::Int(8));
    assert_eq!(value("reap 3; harvest 1;"), Value::Int(3));
    assert_eq!(value("if (RISEN) { 5; }"), Value::Void);
    assert_eq!(value("corpse x = 4; x * 2; harvest x;"), Value::Void);
}

#[test]
fn test_size_ceiling() {
    let config = EngineConfig {
        max_array_size: 3,
        ..EngineConfig::default()
    };
    let (result, _) = run_with(Interpreter::with_config(config), "crypt xs = [1, 2, 3, 4];");
    assert_eq!(result.unwrap_err().kind, ErrorKind::Memory);
}

#[test]
fn test_timeout() {
    let config = EngineConfig {
        timeout_ms: 30,
        rate_limit_per_second: 1e12,
        rate_limit_burst: 1e12,
        ..EngineConfig::default()
    };
    let (result, _) = run_with(Interpreter::with_config(config), "soulless { }");
    assert_eq!(result.unwrap_err().message, "Execution timeout exceeded");
}

#[test]
fn test_rate_limit() {
    let config = EngineConfig {
        rate_limit_per_second: 0.0,
        rate_limit_burst: 5.0,
        ..EngineConfig::default()
    };
    let (result, lines) = run_with(
        Interpreter::with_config(config),
        "shamble i from 1 to 10 { harvest i; }",
    );
    assert!(result.unwrap_err().message.starts_with("Rate limit exceeded"));
    assert!(lines.len() < 10);
}

#[test]
fn test_truthiness_errors() {
    let err = error("infect f() { } if (f) { }");
    assert_eq!(err.message, "Cannot convert infect to boolean");
}

#[test]
fn test_logical_short_circuit() {
    let source = "corpse hits = 0; infect hit() { hits += 1; reap RISEN; } DEAD corrupt hit(); RISEN infest hit(); harvest hits;";
    assert_eq!(output(source), vec!["0"]);
}
