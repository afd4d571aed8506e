//! REAPER CLI: run, compile, execute and disassemble scripts.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;

use colored::Colorize;

use reaper::config::EngineConfig;
use reaper::error::ReaperError;
use reaper::{ExecutionMode, RunReport};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The parser and compiler recurse on deeply nested source. Interpreter
/// runs get their own thread sized from the config.
const MAIN_STACK_SIZE: usize = 64 * 1024 * 1024;

/// CLI command to execute.
enum Command {
    /// Run a script file
    Run {
        file: String,
        bytecode: bool,
        profile: bool,
        config: Option<PathBuf>,
        args: Vec<String>,
    },
    /// Compile a script to a REAP file
    Compile { file: String, output: Option<String> },
    /// Execute a REAP file
    Exec {
        file: String,
        config: Option<PathBuf>,
        args: Vec<String>,
    },
    /// Print a bytecode listing
    Disasm { file: String },
    Version,
    Help,
}

fn print_usage() {
    eprintln!("REAPER {} - security operations scripting", VERSION);
    eprintln!();
    eprintln!("Usage: reaper run <file> [--bytecode] [--profile] [--config FILE] [-- args...]");
    eprintln!("       reaper compile <file> [-o out.reap]");
    eprintln!("       reaper exec <file.reap> [--config FILE] [-- args...]");
    eprintln!("       reaper disasm <file>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --bytecode      Compile and run on the bytecode VM");
    eprintln!("  --profile       Profile the VM run and print hot spots as JSON");
    eprintln!("  --config FILE   Load engine limits from a JSON file");
    eprintln!("  -o FILE         Output path for compile (default: <file>.reap)");
    eprintln!("  --version, -V   Show version");
    eprintln!("  --help, -h      Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  REAPER_*        Override engine limits (e.g. REAPER_TIMEOUT_MS=5000)");
    eprintln!("  RUST_LOG        Enable tracing output (e.g. RUST_LOG=reaper=debug)");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{} {}", "error:".red().bold(), message);
    print_usage();
    process::exit(64);
}

fn parse_args(args: Vec<String>) -> Command {
    let mut iter = args.into_iter();
    let Some(command) = iter.next() else {
        return Command::Help;
    };
    let rest: Vec<String> = iter.collect();

    match command.as_str() {
        "--version" | "-V" => Command::Version,
        "--help" | "-h" | "help" => Command::Help,
        "run" | "exec" => {
            let mut file = None;
            let mut bytecode = false;
            let mut profile = false;
            let mut config = None;
            let mut script_args = Vec::new();
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--" => {
                        script_args.extend(rest[i + 1..].iter().cloned());
                        break;
                    }
                    "--bytecode" if command == "run" => bytecode = true,
                    "--profile" if command == "run" => profile = true,
                    "--config" => {
                        i += 1;
                        let Some(path) = rest.get(i) else {
                            usage_error("--config requires a file path");
                        };
                        config = Some(PathBuf::from(path));
                    }
                    arg if arg.starts_with('-') => {
                        usage_error(&format!("Unknown option for {}: {}", command, arg))
                    }
                    arg if file.is_none() => file = Some(arg.to_string()),
                    arg => script_args.push(arg.to_string()),
                }
                i += 1;
            }
            let Some(file) = file else {
                usage_error(&format!("{} requires a file", command));
            };
            if command == "run" {
                Command::Run {
                    file,
                    bytecode,
                    profile,
                    config,
                    args: script_args,
                }
            } else {
                Command::Exec {
                    file,
                    config,
                    args: script_args,
                }
            }
        }
        "compile" => {
            let mut file = None;
            let mut output = None;
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "-o" | "--output" => {
                        i += 1;
                        let Some(path) = rest.get(i) else {
                            usage_error("-o requires a file path");
                        };
                        output = Some(path.clone());
                    }
                    arg if arg.starts_with('-') => {
                        usage_error(&format!("Unknown option for compile: {}", arg))
                    }
                    arg if file.is_none() => file = Some(arg.to_string()),
                    arg => usage_error(&format!("Unexpected argument: {}", arg)),
                }
                i += 1;
            }
            let Some(file) = file else {
                usage_error("compile requires a file");
            };
            Command::Compile { file, output }
        }
        "disasm" => match rest.as_slice() {
            [file] => Command::Disasm { file: file.clone() },
            _ => usage_error("disasm requires exactly one file"),
        },
        other => usage_error(&format!("Unknown command: {}", other)),
    }
}

fn main() {
    reaper::init_tracing();
    let command = parse_args(env::args().skip(1).collect());

    let worker = thread::Builder::new()
        .name("reaper-main".into())
        .stack_size(MAIN_STACK_SIZE)
        .spawn(move || dispatch(command));
    let code = match worker.map(|handle| handle.join()) {
        Ok(Ok(code)) => code,
        Ok(Err(_)) => {
            eprintln!("{} interpreter thread panicked", "fatal:".red().bold());
            70
        }
        Err(e) => {
            eprintln!("{} cannot start interpreter thread: {}", "fatal:".red().bold(), e);
            70
        }
    };
    process::exit(code);
}

fn dispatch(command: Command) -> i32 {
    match command {
        Command::Version => {
            println!("reaper {}", VERSION);
            0
        }
        Command::Help => {
            print_usage();
            0
        }
        Command::Run {
            file,
            bytecode,
            profile,
            config,
            args,
        } => run_file(&file, bytecode, profile, config.as_deref(), &args),
        Command::Compile { file, output } => compile_file(&file, output),
        Command::Exec { file, config, args } => exec_file(&file, config.as_deref(), &args),
        Command::Disasm { file } => disasm_file(&file),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, i32> {
    EngineConfig::load(path).map_err(|e| {
        report(&ReaperError::from(e), "", "config");
        1
    })
}

fn read_source(path: &str) -> Result<String, i32> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("{} cannot read '{}': {}", "error:".red().bold(), path, e);
        1
    })
}

fn report(error: &ReaperError, source: &str, filename: &str) {
    let rendered = error.render(source, filename);
    let mut lines = rendered.lines();
    if let Some(first) = lines.next() {
        eprintln!("{}", first.red().bold());
    }
    for line in lines {
        eprintln!("{}", line.dimmed());
    }
}

fn finish(report_result: Result<RunReport, ReaperError>, source: &str, filename: &str) -> i32 {
    match report_result {
        Ok(run) => {
            if let Some(profile) = &run.profile {
                match serde_json::to_string_pretty(profile) {
                    Ok(json) => {
                        eprintln!("{}", "== profile ==".cyan().bold());
                        eprintln!("{}", json);
                    }
                    Err(e) => eprintln!("{} cannot encode profile: {}", "warning:".yellow(), e),
                }
            }
            run.exit_code()
        }
        Err(e) => {
            report(&e, source, filename);
            1
        }
    }
}

fn run_file(
    path: &str,
    bytecode: bool,
    profile: bool,
    config: Option<&Path>,
    args: &[String],
) -> i32 {
    let mut config = match load_config(config) {
        Ok(config) => config,
        Err(code) => return code,
    };
    config.profile |= profile;
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let mode = if bytecode || config.profile {
        ExecutionMode::Bytecode
    } else {
        ExecutionMode::TreeWalk
    };
    finish(
        reaper::run_with_options(&source, mode, &config, args),
        &source,
        path,
    )
}

fn compile_file(path: &str, output: Option<String>) -> i32 {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let output = output.unwrap_or_else(|| {
        Path::new(path)
            .with_extension("reap")
            .to_string_lossy()
            .into_owned()
    });
    let bytes = match reaper::compile_to_bytes(&source) {
        Ok(bytes) => bytes,
        Err(e) => {
            report(&e, &source, path);
            return 1;
        }
    };
    if let Err(e) = fs::write(&output, &bytes) {
        eprintln!("{} cannot write '{}': {}", "error:".red().bold(), output, e);
        return 1;
    }
    println!(
        "{} {} ({} bytes)",
        "compiled".green().bold(),
        output,
        bytes.len()
    );
    0
}

fn exec_file(path: &str, config: Option<&Path>, args: &[String]) -> i32 {
    let config = match load_config(config) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{} cannot read '{}': {}", "error:".red().bold(), path, e);
            return 1;
        }
    };
    finish(reaper::exec_bytes(&bytes, &config, args), "", path)
}

fn disasm_file(path: &str) -> i32 {
    let (result, source) = if path.ends_with(".reap") {
        let loaded = fs::read(path)
            .map_err(ReaperError::from)
            .and_then(|bytes| Ok(reaper::bytecode::deserialize(&bytes)?));
        (loaded, String::new())
    } else {
        let source = match read_source(path) {
            Ok(source) => source,
            Err(code) => return code,
        };
        (reaper::compile(&source), source)
    };
    match result {
        Ok(program) => {
            print!("{}", reaper::disassemble(&program));
            0
        }
        Err(e) => {
            report(&e, &source, path);
            1
        }
    }
}
