//! Stack-based virtual machine for executing bytecode.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::ast::BinaryOp;
use crate::bytecode::instruction::{Instruction, OpCode};
use crate::bytecode::program::{BytecodeProgram, FunctionEntry, ARGC_LOCAL};
use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::interpreter::builtins::{self, call_builtin, Builtin, Host};
use crate::interpreter::environment::is_reserved;
use crate::interpreter::executor::Completion;
use crate::interpreter::guard::ResourceGuard;
use crate::interpreter::ops::{self, OpResult};
use crate::interpreter::output::{self, InputSource, OutputSink, SharedInput, SharedOutput};
use crate::interpreter::rate_limit::TokenBucket;
use crate::interpreter::secure::SecureString;
use crate::interpreter::value::{new_map, HashKey, Value};
use crate::jit::Profiler;
use crate::span::Span;

/// Result type for VM operations.
pub type VMResult<T> = Result<T, RuntimeError>;

/// Lifecycle of a VM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No program attached.
    Idle,
    Loaded,
    Running,
    Halted,
    Failed,
}

/// A call frame representing a function invocation.
#[derive(Debug, Clone)]
struct CallFrame {
    function: String,
    return_address: usize,
    /// Stack height when the call was made, below the arguments.
    stack_base: usize,
    locals: HashMap<String, Value>,
    call_span: Span,
}

/// What the dispatch loop does after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Halt(Value),
}

/// The bytecode virtual machine.
pub struct VM {
    config: Arc<EngineConfig>,
    program: Arc<BytecodeProgram>,
    state: VmState,
    pc: usize,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    guard: ResourceGuard,
    output: SharedOutput,
    input: SharedInput,
    secure_strings: Vec<Arc<SecureString>>,
    instruction_count: u64,
    profiler: Option<Profiler>,
    args: Vec<String>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let bucket = TokenBucket::new(config.vm_rate_per_second, config.vm_rate_burst);
        Self {
            guard: ResourceGuard::with_bucket(&config, bucket),
            profiler: config.profile.then(|| Profiler::new(true)),
            config: Arc::new(config),
            program: Arc::new(BytecodeProgram::new()),
            state: VmState::Idle,
            pc: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: HashMap::new(),
            output: output::stdout(),
            input: output::stdin(),
            secure_strings: Vec::new(),
            instruction_count: 0,
            args: Vec::new(),
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

    /// Values for `ritual_args`, seeded when a program is loaded.
    pub fn with_args(mut self, args: &[String]) -> Self {
        self.args = args.to_vec();
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    pub fn reset_profile(&mut self) {
        if let Some(profiler) = &mut self.profiler {
            profiler.reset();
        }
    }

    /// Attach a program and reset globals to the builtin set.
    pub fn load(&mut self, program: BytecodeProgram) {
        self.program = Arc::new(program);
        self.globals.clear();
        self.globals.insert("DEAD".into(), Value::Int(0));
        self.globals.insert("RISEN".into(), Value::Int(1));
        self.globals.insert("void".into(), Value::Void);
        for builtin in Builtin::ALL {
            self.globals
                .insert(builtin.name().into(), Value::Builtin(builtin));
        }
        for (name, constant) in &self.program.globals {
            self.globals.insert(name.clone(), constant.to_value());
        }
        let args = self.args.iter().map(|a| Value::text(a.as_str())).collect();
        self.globals.insert("ritual_args".into(), Value::array(args));
        self.state = VmState::Loaded;
    }

    /// Load and run in one go.
    pub fn execute(&mut self, program: BytecodeProgram) -> VMResult<Completion> {
        self.load(program);
        self.run()
    }

    /// Run the loaded program from the start.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run(&mut self) -> VMResult<Completion> {
        if self.state == VmState::Idle {
            return Err(RuntimeError::new("No program loaded", Span::default()));
        }
        self.pc = 0;
        self.stack.clear();
        self.frames.clear();
        self.instruction_count = 0;
        self.guard.restart();
        self.state = VmState::Running;

        let outcome = self.dispatch();
        self.clear_secure_strings();
        debug!(instructions = self.instruction_count, "vm stopped");

        match outcome {
            Ok(value) => {
                self.state = VmState::Halted;
                Ok(Completion::Finished(value))
            }
            Err(err) => match err.exit_code() {
                Some(code) => {
                    self.state = VmState::Halted;
                    debug!(code, "program exited");
                    Ok(Completion::Exited(code))
                }
                None => {
                    self.state = VmState::Failed;
                    Err(self.unwind(err))
                }
            },
        }
    }

    /// Attach the failing position and the active call chain.
    fn unwind(&mut self, err: RuntimeError) -> RuntimeError {
        let span = self
            .program
            .instructions
            .get(self.pc)
            .map(|i| i.span)
            .unwrap_or_default();
        let mut err = err.at(span);
        for frame in self.frames.drain(..).rev() {
            err.push_frame(frame.function, frame.call_span);
        }
        err
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

    fn dispatch(&mut self) -> VMResult<Value> {
        let program = Arc::clone(&self.program);
        while let Some(instruction) = program.instructions.get(self.pc) {
            let pc = self.pc;
            self.guard.check_timeout(instruction.span)?;
            if self.instruction_count >= self.config.max_instructions {
                return Err(RuntimeError::new(
                    "Maximum instruction count exceeded",
                    instruction.span,
                ));
            }
            self.instruction_count += 1;

            let flow = self.step(&program, pc, instruction)?;
            let next = match flow {
                Flow::Next => pc + 1,
                Flow::Jump(target) => target,
                Flow::Halt(value) => {
                    if let Some(profiler) = &mut self.profiler {
                        profiler.record_execution(pc, instruction, None);
                    }
                    return Ok(value);
                }
            };
            if let Some(profiler) = &mut self.profiler {
                profiler.record_execution(pc, instruction, Some(next));
            }
            self.pc = next;
        }
        Ok(self.stack.pop().unwrap_or(Value::Void))
    }

    fn step(
        &mut self,
        program: &BytecodeProgram,
        pc: usize,
        instruction: &Instruction,
    ) -> VMResult<Flow> {
        let span = instruction.span;
        match instruction.opcode {
            OpCode::PushConst => {
                let index = count_operand(instruction)?;
                let constant = program.constants.get(index).ok_or_else(|| {
                    RuntimeError::new(format!("Constant index {} out of range", index), span)
                })?;
                self.push(constant.to_value(), span)?;
            }
            OpCode::PushLocal | OpCode::LoadLocal => {
                let name = text_operand(instruction)?;
                let value = self.load_local(name, span)?;
                self.push(value, span)?;
            }
            OpCode::PushGlobal | OpCode::LoadGlobal => {
                let name = text_operand(instruction)?;
                let value = self.load_global(name, span)?;
                self.push(value, span)?;
            }
            OpCode::StoreLocal => {
                let name = text_operand(instruction)?;
                let value = self.pop(span)?;
                self.store(name, value, true, span)?;
            }
            OpCode::StoreGlobal => {
                let name = text_operand(instruction)?;
                let value = self.pop(span)?;
                self.store(name, value, false, span)?;
            }
            OpCode::Pop => {
                self.pop(span)?;
            }
            OpCode::Dup => {
                let top = self.peek(span)?.clone();
                self.push(top, span)?;
            }
            OpCode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(underflow(span));
                }
                self.stack.swap(len - 1, len - 2);
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::BitXor
            | OpCode::BitShl
            | OpCode::BitShr
            | OpCode::BitRot
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::LogAnd
            | OpCode::LogOr => {
                let right = self.pop(span)?;
                let left = self.pop(span)?;
                let result = eval_binary(instruction.opcode, &left, &right, span)?;
                if matches!(result, Value::Text(_) | Value::Secure(_)) {
                    self.guard.check_value(&result, span)?;
                }
                self.push(result, span)?;
            }
            OpCode::Neg => {
                let value = self.pop(span)?;
                self.push(ops::negate(&value, span)?, span)?;
            }
            OpCode::Inc => {
                let value = self.pop(span)?;
                self.push(ops::add(&value, &Value::Int(1), span)?, span)?;
            }
            OpCode::Dec => {
                let value = self.pop(span)?;
                self.push(ops::subtract(&value, &Value::Int(1), span)?, span)?;
            }
            OpCode::BitNot => {
                let value = self.pop(span)?;
                self.push(ops::bit_not(&value, span)?, span)?;
            }
            OpCode::LogNot => {
                let value = self.pop(span)?;
                self.push(Value::Bool(!ops::truthy(&value, span)?), span)?;
            }

            OpCode::Jmp => return Ok(Flow::Jump(self.jump_operand(program, instruction)?)),
            OpCode::JmpIf | OpCode::JmpIfNot => {
                let target = self.jump_operand(program, instruction)?;
                let condition = ops::truthy(&self.pop(span)?, span)?;
                if condition == (instruction.opcode == OpCode::JmpIf) {
                    return Ok(Flow::Jump(target));
                }
            }
            OpCode::Call => {
                let name = text_operand(instruction)?;
                let args = self.pop_args(span)?;
                match program.functions.get(name) {
                    Some(function) => {
                        self.enter_function(name, function, args, pc, span)?;
                        return Ok(Flow::Jump(function.entry));
                    }
                    None => match Builtin::from_name(name) {
                        Some(builtin) => {
                            let result = call_builtin(self, builtin, args, span)?;
                            self.push(result, span)?;
                        }
                        None => {
                            return Err(RuntimeError::undefined_variable(
                                name,
                                self.visible_names(),
                                span,
                            ))
                        }
                    },
                }
            }
            OpCode::Return => {
                let base = self.frames.last().map_or(0, |frame| frame.stack_base);
                let value = if self.stack.len() > base {
                    self.pop(span)?
                } else {
                    Value::Void
                };
                match self.frames.pop() {
                    None => return Ok(Flow::Halt(value)),
                    Some(frame) => {
                        self.stack.truncate(frame.stack_base);
                        self.push(value, span)?;
                        return Ok(Flow::Jump(frame.return_address));
                    }
                }
            }
            OpCode::CallBuiltin => {
                let name = text_operand(instruction)?;
                let args = self.pop_args(span)?;
                let result = self.call_builtin_named(name, args, span)?;
                self.push(result, span)?;
            }

            OpCode::ArrayNew => {
                let count = count_operand(instruction)?;
                let items = self.pop_n(count, span)?;
                self.guard.check_array(items.len(), span)?;
                self.push(Value::array(items), span)?;
            }
            OpCode::ArrayGet | OpCode::DictGet => {
                let index = self.pop(span)?;
                let object = self.pop(span)?;
                self.push(builtins::index_get(&object, &index, span)?, span)?;
            }
            OpCode::ArraySet | OpCode::DictSet => {
                let value = self.pop(span)?;
                let index = self.pop(span)?;
                let object = self.pop(span)?;
                let before = map_len(&object);
                builtins::index_set(&object, &index, value, span)?;
                let after = map_len(&object);
                if after > before {
                    self.guard.grow_dict(after, after - before, span)?;
                }
                self.push(object, span)?;
            }
            OpCode::ArrayLen => {
                let object = self.pop(span)?;
                let Value::Array(items) = &object else {
                    return Err(RuntimeError::type_mismatch(
                        "crypt",
                        object.type_name(),
                        "ARRAY_LEN",
                        span,
                    ));
                };
                let len = items.read().len();
                self.push(Value::Int(len as i64), span)?;
            }
            OpCode::DictNew => {
                let count = count_operand(instruction)?;
                let flat = self.pop_n(count.saturating_mul(2), span)?;
                let mut store = new_map();
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    store.insert(HashKey::from_value(&key, span)?, value);
                }
                self.guard.check_dict(store.len(), span)?;
                self.push(Value::map(store), span)?;
            }
            OpCode::DictHas => {
                let key = self.pop(span)?;
                let object = self.pop(span)?;
                let Value::Map(map) = &object else {
                    return Err(RuntimeError::type_mismatch(
                        "grimoire",
                        object.type_name(),
                        "DICT_HAS",
                        span,
                    ));
                };
                let found = map.read().contains_key(&HashKey::from_value(&key, span)?);
                self.push(Value::Bool(found), span)?;
            }
            OpCode::DictKeys => {
                let object = self.pop(span)?;
                let Value::Map(map) = &object else {
                    return Err(RuntimeError::type_mismatch(
                        "grimoire",
                        object.type_name(),
                        "DICT_KEYS",
                        span,
                    ));
                };
                let keys = map.read().keys().map(HashKey::to_value).collect();
                self.push(Value::array(keys), span)?;
            }

            OpCode::StrConcat => {
                let right = self.pop(span)?;
                let left = self.pop(span)?;
                let joined = format!("{}{}", left, right);
                self.guard.check_string(joined.len(), span)?;
                self.push(Value::Text(joined), span)?;
            }
            OpCode::StrLen => {
                let value = self.pop(span)?;
                let len = match &value {
                    Value::Text(text) => text.chars().count(),
                    Value::Secure(secret) => secret.len(),
                    other => other.to_string().chars().count(),
                };
                self.push(Value::Int(len as i64), span)?;
            }
            OpCode::StrSub => {
                let end = self.pop(span)?;
                let start = self.pop(span)?;
                let text = self.pop(span)?;
                let sliced = builtins::slice(&text, Some(&start), Some(&end), None, span)?;
                self.push(sliced, span)?;
            }

            OpCode::TypeCheck => {
                let expected = text_operand(instruction)?;
                let actual = self.peek(span)?.type_name();
                if actual != expected {
                    return Err(RuntimeError::type_mismatch(expected, actual, "type check", span));
                }
            }
            OpCode::TypeConvert => {
                let target = text_operand(instruction)?;
                let value = self.pop(span)?;
                let converted = self.convert(value, target, span)?;
                self.push(converted, span)?;
            }

            OpCode::SecureString => {
                let value = self.pop(span)?;
                let value = match value {
                    Value::Text(text) => {
                        let secret = Arc::new(SecureString::from_plain(&text));
                        self.secure_strings.push(Arc::clone(&secret));
                        Value::Secure(secret)
                    }
                    other => other,
                };
                self.push(value, span)?;
            }
            OpCode::ClearMemory => self.clear_secure_strings(),
            OpCode::RateLimit => self.guard.acquire(1.0, "VM", span)?,
            OpCode::Halt => return Ok(Flow::Halt(self.stack.pop().unwrap_or(Value::Void))),
        }
        Ok(Flow::Next)
    }

    fn push(&mut self, value: Value, span: Span) -> VMResult<()> {
        let max = self.config.max_stack_size;
        if self.stack.len() >= max {
            return Err(RuntimeError::memory(
                format!("Stack overflow: maximum size {} exceeded", max),
                "stack",
                self.stack.len() + 1,
                max,
                span,
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, span: Span) -> VMResult<Value> {
        self.stack.pop().ok_or_else(|| underflow(span))
    }

    fn peek(&self, span: Span) -> VMResult<&Value> {
        self.stack.last().ok_or_else(|| underflow(span))
    }

    /// The top `count` values, in push order.
    fn pop_n(&mut self, count: usize, span: Span) -> VMResult<Vec<Value>> {
        if count > self.stack.len() {
            return Err(underflow(span));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Arguments of a call: an argument count on top of the arguments.
    fn pop_args(&mut self, span: Span) -> VMResult<Vec<Value>> {
        let argc = self.pop(span)?.expect_int("argument count", span)?;
        let argc = usize::try_from(argc)
            .map_err(|_| RuntimeError::new(format!("Invalid argument count {}", argc), span))?;
        self.pop_n(argc, span)
    }

    fn jump_operand(&self, program: &BytecodeProgram, instruction: &Instruction) -> VMResult<usize> {
        let target = count_operand(instruction)?;
        if target > program.instructions.len() {
            return Err(RuntimeError::new(
                format!("Jump target {} out of range", target),
                instruction.span,
            ));
        }
        Ok(target)
    }

    fn enter_function(
        &mut self,
        name: &str,
        function: &FunctionEntry,
        args: Vec<Value>,
        pc: usize,
        span: Span,
    ) -> VMResult<()> {
        let max = self.config.max_call_depth;
        if self.frames.len() >= max {
            return Err(RuntimeError::memory(
                format!("Call stack overflow: maximum depth {} exceeded", max),
                "call stack",
                self.frames.len() + 1,
                max,
                span,
            ));
        }
        let params = &function.params;
        if args.len() > params.len() {
            return Err(RuntimeError::new(
                format!(
                    "Function '{}' expects {} arguments, got {}",
                    name,
                    params.len(),
                    args.len()
                ),
                span,
            ));
        }
        for (position, param) in params.iter().enumerate().skip(args.len()) {
            if !function.defaults.get(position).copied().unwrap_or(false) {
                return Err(RuntimeError::new(
                    format!("Missing argument for parameter '{}'", param),
                    span,
                ));
            }
        }

        trace!(function = name, depth = self.frames.len(), "call");
        if let Some(profiler) = &mut self.profiler {
            profiler.record_function_call(name);
        }
        let mut locals = HashMap::new();
        locals.insert(ARGC_LOCAL.to_string(), Value::Int(args.len() as i64));
        self.frames.push(CallFrame {
            function: name.to_string(),
            return_address: pc + 1,
            stack_base: self.stack.len(),
            locals,
            call_span: span,
        });
        // The prologue pops parameters in declaration order.
        let mut args = args;
        args.resize(params.len(), Value::Void);
        for value in args.into_iter().rev() {
            self.push(value, span)?;
        }
        Ok(())
    }

    /// `@name` reads a property, `@name=` writes one, `.name` calls a
    /// method on the first argument and `$slice` slices.
    fn call_builtin_named(&mut self, name: &str, mut args: Vec<Value>, span: Span) -> VMResult<Value> {
        if let Some(property) = name.strip_prefix('@') {
            if let Some(property) = property.strip_suffix('=') {
                let [object, value]: [Value; 2] = args
                    .try_into()
                    .map_err(|_| RuntimeError::new("Property assignment needs 2 values", span))?;
                builtins::set_property(&object, property, value.clone(), span)?;
                return Ok(value);
            }
            let object = args
                .first()
                .ok_or_else(|| RuntimeError::new("Property access needs an object", span))?;
            return builtins::get_property(object, property, span);
        }
        if let Some(method) = name.strip_prefix('.') {
            if args.is_empty() {
                return Err(RuntimeError::new("Method call needs a receiver", span));
            }
            let receiver = args.remove(0);
            return builtins::call_method(&mut self.guard, &receiver, method, args, span);
        }
        if name == "$slice" {
            let [object, start, end, step]: [Value; 4] = args
                .try_into()
                .map_err(|_| RuntimeError::new("Slice needs 4 values", span))?;
            let sliced = builtins::slice(&object, Some(&start), Some(&end), Some(&step), span)?;
            self.guard.check_value(&sliced, span)?;
            return Ok(sliced);
        }
        match Builtin::from_name(name) {
            Some(builtin) => call_builtin(self, builtin, args, span),
            None => Err(RuntimeError::new(format!("Unknown builtin '{}'", name), span)),
        }
    }

    fn convert(&mut self, value: Value, target: &str, span: Span) -> VMResult<Value> {
        match (target, value) {
            ("iter", value) => Ok(Value::array(builtins::iterate(&value, span)?)),
            ("soul", value) => Ok(Value::Text(value.to_string())),
            ("wraith", value) => Ok(Value::Bool(ops::truthy(&value, span)?)),
            ("corpse", Value::Int(n)) => Ok(Value::Int(n)),
            ("corpse", Value::Float(n)) => Ok(Value::Int(n.trunc() as i64)),
            ("corpse", Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            ("corpse", text @ Value::Text(_)) => call_builtin(self, Builtin::RaiseCorpse, vec![text], span),
            ("phantom", Value::Int(n)) => Ok(Value::Float(n as f64)),
            ("phantom", Value::Float(n)) => Ok(Value::Float(n)),
            ("phantom", text @ Value::Text(_)) => {
                call_builtin(self, Builtin::RaisePhantom, vec![text], span)
            }
            (target, value) => Err(RuntimeError::type_error(
                format!("Cannot convert {} to {}", value.type_name(), target),
                span,
            )),
        }
    }

    fn load_local(&self, name: &str, span: Span) -> VMResult<Value> {
        let Some(frame) = self.frames.last() else {
            return self.load_global(name, span);
        };
        frame
            .locals
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::undefined_variable(source_name(name), self.visible_names(), span))
    }

    fn load_global(&self, name: &str, span: Span) -> VMResult<Value> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::undefined_variable(source_name(name), self.visible_names(), span))
    }

    fn store(&mut self, name: &str, value: Value, local: bool, span: Span) -> VMResult<()> {
        let shown = source_name(name);
        if is_reserved(shown) {
            return Err(RuntimeError::new(
                format!("Cannot redefine reserved identifier '{}'", shown),
                span,
            ));
        }
        match self.frames.last_mut() {
            Some(frame) if local => {
                frame.locals.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Up to five user-visible names, for undefined-variable hints. Block
    /// bindings are left out.
    fn visible_names(&self) -> Vec<String> {
        let locals = self.frames.last().into_iter().flat_map(|f| f.locals.keys());
        let mut names: Vec<String> = locals
            .chain(self.globals.keys())
            .filter(|name| !name.starts_with('$') && !name.contains('@') && !is_reserved(name))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names.truncate(5);
        names
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for VM {
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

/// Binary opcode semantics, shared with the peephole folder.
pub(crate) fn eval_binary(opcode: OpCode, left: &Value, right: &Value, span: Span) -> OpResult {
    match opcode {
        OpCode::Add => ops::add(left, right, span),
        OpCode::Sub => ops::subtract(left, right, span),
        OpCode::Mul => ops::multiply(left, right, span),
        OpCode::Div => ops::divide(left, right, span),
        OpCode::Mod => ops::modulo(left, right, span),
        OpCode::BitAnd => ops::bitwise(BinaryOp::BitAnd, left, right, span),
        OpCode::BitOr => ops::bitwise(BinaryOp::BitOr, left, right, span),
        OpCode::BitXor => ops::bitwise(BinaryOp::BitXor, left, right, span),
        OpCode::BitRot => ops::bitwise(BinaryOp::RotateLeft, left, right, span),
        OpCode::BitShl => ops::shift_left(left, right, span),
        OpCode::BitShr => ops::shift_right(left, right, span),
        OpCode::Eq => Ok(Value::Bool(left == right)),
        OpCode::Ne => Ok(Value::Bool(left != right)),
        OpCode::Lt => ops::compare(BinaryOp::Less, left, right, span),
        OpCode::Le => ops::compare(BinaryOp::LessEqual, left, right, span),
        OpCode::Gt => ops::compare(BinaryOp::Greater, left, right, span),
        OpCode::Ge => ops::compare(BinaryOp::GreaterEqual, left, right, span),
        OpCode::LogAnd => Ok(Value::Bool(ops::truthy(left, span)? && ops::truthy(right, span)?)),
        OpCode::LogOr => Ok(Value::Bool(ops::truthy(left, span)? || ops::truthy(right, span)?)),
        other => Err(RuntimeError::new(
            format!("{} is not a binary operation", other.name()),
            span,
        )),
    }
}

fn underflow(span: Span) -> RuntimeError {
    RuntimeError::new("Stack underflow", span)
}

fn map_len(value: &Value) -> usize {
    match value {
        Value::Map(map) => map.read().len(),
        _ => 0,
    }
}

/// The name a user wrote: block-scoped bindings carry an `@N` suffix.
fn source_name(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

fn text_operand(instruction: &Instruction) -> VMResult<&str> {
    instruction.operand.as_text().ok_or_else(|| {
        RuntimeError::new(
            format!("{} requires a text operand", instruction.opcode.name()),
            instruction.span,
        )
    })
}

fn count_operand(instruction: &Instruction) -> VMResult<usize> {
    instruction
        .operand
        .as_int()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            RuntimeError::new(
                format!("{} requires an integer operand", instruction.opcode.name()),
                instruction.span,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compiler::Compiler;
    use crate::bytecode::instruction::Operand;
    use crate::bytecode::program::Constant;
    use crate::error::ErrorKind;
    use crate::interpreter::output::CaptureSink;
    use crate::lexer::Scanner;
    use crate::parser::Parser;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> BytecodeProgram {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        Compiler::new().compile(&program).unwrap()
    }

    fn run_with(config: EngineConfig, program: BytecodeProgram) -> (VMResult<Completion>, Vec<String>) {
        let sink = CaptureSink::new();
        let mut vm = VM::with_config(config).with_output(sink.shared());
        let result = vm.execute(program);
        (result, sink.lines())
    }

    fn output(source: &str) -> Vec<String> {
        let (result, lines) = run_with(EngineConfig::default(), compile(source));
        result.unwrap();
        lines
    }

    fn error_with(config: EngineConfig, source: &str) -> RuntimeError {
        run_with(config, compile(source)).0.unwrap_err()
    }

    fn error(source: &str) -> RuntimeError {
        error_with(EngineConfig::default(), source)
    }

    fn value(source: &str) -> Value {
        match run_with(EngineConfig::default(), compile(source)).0.unwrap() {
            Completion::Finished(value) => value,
            other => panic!("expected a value, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_harvest() {
        assert_eq!(output("corpse a = 10; corpse b = 20; harvest a + b;"), vec!["30"]);
        assert_eq!(output("harvest 7 / 2, \" \", 7.0 / 2;"), vec!["3 3.5"]);
        assert_eq!(value("corpse x = 6; x * 7;"), Value::Int(42));
    }

    #[test]
    fn test_division_by_zero() {
        let err = error("corpse x = 5; corpse y = 0; harvest x / y;");
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        assert_eq!(error("harvest 1 % 0;").kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn test_functions_defaults_and_recursion() {
        let source = r#"
            infect greet(soul name, soul greeting = "Hail") { reap greeting + ", " + name; }
            infect fact(corpse n) { if (n <= 1) { reap 1; } reap n * fact(n - 1); }
            harvest greet("Mort");
            harvest greet("Mort", "Begone");
            harvest fact(10);
        "#;
        assert_eq!(
            output(source),
            vec!["Hail, Mort", "Begone, Mort", "3628800"]
        );
    }

    #[test]
    fn test_argument_errors() {
        let err = error("infect f(corpse a) { reap a; } f(1, 2);");
        assert_eq!(err.message, "Function 'f' expects 1 arguments, got 2");
        let err = error("infect f(corpse a, corpse b) { reap a; } f(1);");
        assert_eq!(err.message, "Missing argument for parameter 'b'");
    }

    #[test]
    fn test_loops_flee_and_persist() {
        let source = r#"
            shamble i from 1 to 10 {
                if (i % 2 == 0) { persist; }
                if (i > 5) { flee; }
                harvest i;
            }
        "#;
        assert_eq!(output(source), vec!["1", "3", "5"]);
        let source = "corpse n = 0; soulless { n += 1; if (n == 4) { flee; } } harvest n;";
        assert_eq!(output(source), vec!["4"]);
        let source = "decay c in \"abc\" { if (c == \"b\") { persist; } harvest c; }";
        assert_eq!(output(source), vec!["a", "c"]);
    }

    #[test]
    fn test_shamble_bounds() {
        assert!(output("shamble i from 3 to 1 { harvest i; }").is_empty());
        let err = error("shamble i from 1 to \"x\" { }");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_judge() {
        let source = r#"
            infect name(corpse code) {
                judge (code) {
                    case 1 { reap "one"; }
                    case 2 { reap "two"; }
                    default { reap "many"; }
                }
            }
            harvest name(1), name(2), name(9);
        "#;
        assert_eq!(output(source), vec!["onetwomany"]);
    }

    #[test]
    fn test_collections() {
        let source = r#"
            crypt xs = [1, 2, 3];
            xs[0] += 10;
            xs.entomb(4);
            grimoire g = {"hits": 1};
            g["hits"] += 1;
            g["misses"] = 0;
            harvest xs, " ", xs.length, " ", g;
            harvest [x * x for x in xs if x > 2];
            harvest xs[1:3], " ", xs[::-1];
        "#;
        assert_eq!(
            output(source),
            vec![
                "[11, 2, 3, 4] 4 {'hits': 2, 'misses': 0}",
                "[121, 9, 16]",
                "[2, 3] [4, 3, 2, 11]"
            ]
        );
    }

    #[test]
    fn test_logical_short_circuit() {
        let source = r#"
            infect loud() { harvest "evaluated"; reap RISEN; }
            harvest DEAD corrupt loud();
            harvest RISEN infest loud();
            harvest RISEN corrupt loud();
        "#;
        assert_eq!(output(source), vec!["DEAD", "RISEN", "evaluated", "RISEN"]);
    }

    #[test]
    fn test_interpolation() {
        assert_eq!(output("corpse a = 2; harvest \"sum #{a + 3}!\";"), vec!["sum 5!"]);
    }

    #[test]
    fn test_block_scoping() {
        let source = "corpse x = 1; { corpse x = 2; harvest x; } harvest x;";
        assert_eq!(output(source), vec!["2", "1"]);
        let err = error("{ corpse inner = 1; } harvest inner;");
        assert!(err.message.starts_with("Undefined variable 'inner'"));
    }

    #[test]
    fn test_reserved_names() {
        let err = error("corpse harvest = 1;");
        assert_eq!(err.message, "Cannot redefine reserved identifier 'harvest'");
    }

    #[test]
    fn test_call_depth_limit() {
        let config = EngineConfig {
            max_call_depth: 50,
            ..EngineConfig::default()
        };
        let err = error_with(config, "infect dive(corpse n) { reap dive(n + 1); } dive(0);");
        assert_eq!(err.kind, ErrorKind::Memory);
        assert!(err.message.starts_with("Call stack overflow"));
        assert_eq!(err.trace.len(), 50);
    }

    #[test]
    fn test_stack_limit() {
        let config = EngineConfig {
            max_stack_size: 4,
            ..EngineConfig::default()
        };
        let err = error_with(config, "harvest 1, 2, 3, 4, 5;");
        assert_eq!(err.kind, ErrorKind::Memory);
        assert!(err.message.starts_with("Stack overflow"));
    }

    #[test]
    fn test_instruction_limit() {
        let config = EngineConfig {
            max_instructions: 1_000,
            ..EngineConfig::default()
        };
        let (result, _) = run_with(config, compile("soulless { }"));
        assert_eq!(result.unwrap_err().message, "Maximum instruction count exceeded");
    }

    #[test]
    fn test_timeout() {
        let config = EngineConfig {
            timeout_ms: 20,
            max_instructions: u64::MAX,
            ..EngineConfig::default()
        };
        let err = error_with(config, "soulless { }");
        assert_eq!(err.message, "Execution timeout exceeded");
    }

    #[test]
    fn test_rate_limit_opcode() {
        let mut program = BytecodeProgram::new();
        for _ in 0..3 {
            program.add_instruction(Instruction::new(OpCode::RateLimit, Span::default()));
        }
        let config = EngineConfig {
            vm_rate_per_second: 0.0,
            vm_rate_burst: 2.0,
            ..EngineConfig::default()
        };
        let (result, _) = run_with(config, program);
        assert_eq!(
            result.unwrap_err().message,
            "Rate limit exceeded for VM operations"
        );
    }

    #[test]
    fn test_secure_strings_are_cleared() {
        match value("shadow pw = \"hunter2\"; pw;") {
            Value::Secure(secret) => assert!(secret.is_empty()),
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(output("shadow pw = \"hunter2\"; harvest pw.curse();"), vec!["7"]);
    }

    #[test]
    fn test_final_rest_exits() {
        let (result, lines) = run_with(
            EngineConfig::default(),
            compile("harvest 1; final_rest(3); harvest 2;"),
        );
        assert_eq!(result.unwrap(), Completion::Exited(3));
        assert_eq!(lines, vec!["1"]);
    }

    #[test]
    fn test_top_level_reap_halts() {
        assert_eq!(value("reap 5; harvest 1;"), Value::Int(5));
    }

    #[test]
    fn test_hand_built_program() {
        let mut program = BytecodeProgram::new();
        let a = program.add_constant(Constant::Int(6)) as i64;
        let b = program.add_constant(Constant::Int(2)) as i64;
        let op = |opcode, operand| Instruction::with_operand(opcode, operand, Span::default());
        program.instructions = vec![
            op(OpCode::PushConst, Operand::Int(a)),
            op(OpCode::PushConst, Operand::Int(b)),
            op(OpCode::BitShl, Operand::None),
            op(OpCode::Dup, Operand::None),
            op(OpCode::StoreGlobal, Operand::Text("shifted".into())),
            op(OpCode::Halt, Operand::None),
            op(OpCode::PushConst, Operand::Int(b)),
        ];
        let mut vm = VM::new().with_output(CaptureSink::new().shared());
        assert_eq!(vm.execute(program).unwrap(), Completion::Finished(Value::Int(24)));
        assert_eq!(vm.global("shifted"), Some(&Value::Int(24)));
        assert_eq!(vm.state(), VmState::Halted);
        assert_eq!(vm.instruction_count(), 6);
    }

    #[test]
    fn test_shift_opcodes_in_loaded_program() {
        let shift = |value: i64, count: i64, opcode| {
            let mut program = BytecodeProgram::new();
            let a = program.add_constant(Constant::Int(value)) as i64;
            let b = program.add_constant(Constant::Int(count)) as i64;
            let op = |opcode, operand| Instruction::with_operand(opcode, operand, Span::default());
            program.instructions = vec![
                op(OpCode::PushConst, Operand::Int(a)),
                op(OpCode::PushConst, Operand::Int(b)),
                op(opcode, Operand::None),
            ];
            let bytes = crate::bytecode::serialize(&program).unwrap();
            let loaded = crate::bytecode::deserialize(&bytes).unwrap();
            let mut vm = VM::new().with_output(CaptureSink::new().shared());
            let result = vm.execute(loaded);
            (result, vm.state())
        };

        let (result, _) = shift(-16, 2, OpCode::BitShr);
        assert_eq!(result.unwrap(), Completion::Finished(Value::Int(-4)));
        let (result, _) = shift(3, 4, OpCode::BitShl);
        assert_eq!(result.unwrap(), Completion::Finished(Value::Int(48)));
        let (result, state) = shift(1, -1, OpCode::BitShr);
        assert!(result.is_err());
        assert_eq!(state, VmState::Failed);
    }

    #[test]
    fn test_program_globals_are_seeded() {
        let mut program = compile("harvest target + \":\" + steal_soul(port);");
        program.add_global("target", Constant::Text("10.0.0.7".into()));
        program.add_global("port", Constant::Int(443));
        let (result, lines) = run_with(EngineConfig::default(), program);
        result.unwrap();
        assert_eq!(lines, vec!["10.0.0.7:443"]);
    }

    #[test]
    fn test_run_without_program() {
        let mut vm = VM::new();
        assert!(vm.run().is_err());
        assert_eq!(vm.state(), VmState::Idle);
    }
}
