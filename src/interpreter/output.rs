//! Where `harvest` writes and `summon` reads.

use std::io::{BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;

pub trait OutputSink: Send {
    fn write_line(&mut self, line: &str);
}

pub trait InputSource: Send {
    /// The next line without its terminator, or `None` at end of input.
    fn read_line(&mut self) -> Option<String>;
}

pub type SharedOutput = Arc<Mutex<dyn OutputSink>>;
pub type SharedInput = Arc<Mutex<dyn InputSource>>;

pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
        let _ = handle.flush();
    }
}

pub fn stdout() -> SharedOutput {
    Arc::new(Mutex::new(StdoutSink))
}

/// Collects lines in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct CaptureSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn shared(&self) -> SharedOutput {
        Arc::new(Mutex::new(self.clone()))
    }
}

impl OutputSink for CaptureSink {
    fn write_line(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

pub struct StdinSource;

impl InputSource for StdinSource {
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
        }
    }
}

pub fn stdin() -> SharedInput {
    Arc::new(Mutex::new(StdinSource))
}

/// Serves a fixed list of lines, then end of input.
pub struct ScriptedInput {
    lines: std::collections::VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shared<I, S>(lines: I) -> SharedInput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Mutex::new(Self::new(lines)))
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}
