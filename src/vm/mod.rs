use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::ast::{BinaryOp, UnaryOp};
use crate::config::EngineConfig;
use crate::interpreter::Verdict;

pub mod builtins;
pub mod compiler;
pub mod value;

pub use compiler::{CompileError, CompiledProgram, Op, compile};
pub use value::{FunctionId, NativeId, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("{0} is not defined")]
    NotDefined(String),
    #[error("{0}")]
    Type(String),
    #[error("Maximum call stack size exceeded")]
    StackOverflow,
    /// Uncaught `throw`, already reduced to its message.
    #[error("{0}")]
    Thrown(String),
    /// Early termination requested by the program; carries the final verdict.
    #[error("exit({}, {})", .0.success, .0.message)]
    Exit(Verdict),
    #[error("{0}")]
    Host(String),
    #[error("internal VM error: {0}")]
    Internal(&'static str),
}

type VmResult<T> = Result<T, VmError>;

/// Longest array a program may create by writing `length` or an index.
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// What a native call produced.
#[derive(Debug)]
pub enum NativeOutcome {
    Return(Value),
    /// The VM waits until [`Vm::resume`] delivers the result.
    Suspend,
}

/// Implemented by whoever owns the natives injected with [`Vm::define_native`].
pub trait NativeHost {
    fn call_native(&mut self, id: NativeId, args: Vec<Value>) -> VmResult<NativeOutcome>;
}

struct Frame {
    function: FunctionId,
    ip: usize,
    /// Index of local slot 0; the operand stack of this frame starts after the locals.
    base: usize,
}

/// Incremental bytecode machine. Each [`Vm::step`] executes exactly one [`Op`].
pub struct Vm {
    program: Rc<CompiledProgram>,
    globals: BTreeMap<String, Value>,
    /// Globals installed by the engine, hidden from [`Vm::globals_json`].
    builtin_names: BTreeSet<String>,
    natives: Vec<String>,
    frames: Vec<Frame>,
    stack: Vec<Value>,
    awaiting_native: bool,
    rng: fastrand::Rng,
    max_call_depth: usize,
    instructions: u64,
}

impl Vm {
    pub fn new(program: CompiledProgram, config: &EngineConfig) -> Self {
        let mut globals = BTreeMap::new();
        builtins::install(&mut globals);
        let builtin_names = globals.keys().cloned().collect();
        Vm {
            program: Rc::new(program),
            globals,
            builtin_names,
            natives: Vec::new(),
            frames: vec![Frame { function: CompiledProgram::MAIN, ip: 0, base: 0 }],
            stack: Vec::with_capacity(64),
            awaiting_native: false,
            rng: fastrand::Rng::with_seed(config.random_seed),
            max_call_depth: config.max_call_depth.max(1),
            instructions: 0,
        }
    }

    /// Bind `name` in the global scope to a new native. Rebinding a name
    /// replaces the earlier binding.
    pub fn define_native(&mut self, name: &str) -> NativeId {
        let id = NativeId(self.natives.len() as u32);
        self.natives.push(name.to_string());
        self.globals.insert(name.to_string(), Value::Native(id));
        id
    }

    pub fn native_name(&self, id: NativeId) -> Option<&str> {
        self.natives.get(id.index()).map(String::as_str)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// User-visible globals as JSON. Callables and engine builtins are left out.
    pub fn globals_json(&self) -> serde_json::Map<String, serde_json::Value> {
        self.globals
            .iter()
            .filter(|(name, value)| !value.is_callable() && !self.builtin_names.contains(*name))
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// True while a suspended native call has not been resumed.
    pub fn is_paused(&self) -> bool {
        self.awaiting_native
    }

    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Deliver the result of a suspended native call.
    pub fn resume(&mut self, value: Value) {
        if self.awaiting_native {
            self.awaiting_native = false;
            self.stack.push(value);
        }
    }

    /// Execute one instruction.
    ///
    /// Returns `Ok(false)` once the program has run to completion and `Ok(true)`
    /// otherwise, including while waiting on a suspended native (in which case
    /// nothing happens). Any error leaves the machine finished.
    pub fn step(&mut self, host: &mut dyn NativeHost) -> VmResult<bool> {
        if self.frames.is_empty() {
            return Ok(false);
        }
        if self.awaiting_native {
            return Ok(true);
        }
        match self.execute_one(host) {
            Ok(()) => Ok(true),
            Err(err) => {
                log::debug!("vm halted after {} instructions: {err}", self.instructions);
                self.frames.clear();
                self.stack.clear();
                Err(err)
            }
        }
    }

    fn execute_one(&mut self, host: &mut dyn NativeHost) -> VmResult<()> {
        let program = Rc::clone(&self.program);
        let frame = self.frames.last_mut().ok_or(VmError::Internal("no active frame"))?;
        let chunk = &program.function(frame.function).chunk;
        let Some(&op) = chunk.code.get(frame.ip) else {
            return self.return_from_frame(Value::Undefined);
        };
        frame.ip += 1;
        self.instructions += 1;
        log::trace!("{:?} {op:?}", frame.function);

        match op {
            Op::Const(k) => {
                let value = chunk.constants.get(k as usize).cloned().ok_or(VmError::Internal("bad constant"))?;
                self.stack.push(value);
            }
            Op::Undefined => self.stack.push(Value::Undefined),
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let top = self.peek()?.clone();
                self.stack.push(top);
            }
            Op::Dup2 => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(VmError::Internal("stack underflow"));
                }
                self.stack.extend_from_within(len - 2..);
            }

            Op::LoadLocal(slot) => {
                let value = self.local(slot)?.clone();
                self.stack.push(value);
            }
            Op::StoreLocal(slot) => {
                let value = self.peek()?.clone();
                *self.local(slot)? = value;
            }
            Op::LoadGlobal(k) => {
                let name = chunk.constant_name(k);
                let value = self.globals.get(name).cloned().ok_or_else(|| VmError::NotDefined(name.to_string()))?;
                self.stack.push(value);
            }
            Op::StoreGlobal(k) => {
                let value = self.peek()?.clone();
                self.globals.insert(chunk.constant_name(k).to_string(), value);
            }
            Op::DeclareGlobal(k) => {
                self.globals.entry(chunk.constant_name(k).to_string()).or_default();
            }
            Op::TypeofGlobal(k) => {
                let kind = self.globals.get(chunk.constant_name(k)).map_or("undefined", Value::type_of);
                self.stack.push(Value::from(kind));
            }

            Op::GetNamed(k) => {
                let object = self.pop()?;
                let value = get_property(&object, chunk.constant_name(k))?;
                self.stack.push(value);
            }
            Op::GetIndex => {
                let key = self.pop()?;
                let object = self.pop()?;
                let value = get_property(&object, &builtins::property_key(&key))?;
                self.stack.push(value);
            }
            Op::SetNamed(k) => {
                let value = self.pop()?;
                let object = self.pop()?;
                set_property(&object, chunk.constant_name(k), value.clone())?;
                self.stack.push(value);
            }
            Op::SetIndex => {
                let value = self.pop()?;
                let key = self.pop()?;
                let object = self.pop()?;
                set_property(&object, &builtins::property_key(&key), value.clone())?;
                self.stack.push(value);
            }

            Op::Binary(op) => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.stack.push(binary(op, &left, &right));
            }
            Op::Unary(op) => {
                let operand = self.pop()?;
                self.stack.push(unary(op, &operand));
            }

            Op::Jump(target) => self.jump(target)?,
            Op::JumpIfFalse(target) => {
                if !self.pop()?.truthy() {
                    self.jump(target)?;
                }
            }
            Op::JumpIfFalseKeep(target) => {
                if self.peek()?.truthy() {
                    self.pop()?;
                } else {
                    self.jump(target)?;
                }
            }
            Op::JumpIfTrueKeep(target) => {
                if self.peek()?.truthy() {
                    self.jump(target)?;
                } else {
                    self.pop()?;
                }
            }

            Op::Call(argc) => {
                let args = self.pop_n(argc as usize)?;
                let callee = self.pop()?;
                self.invoke(&callee, args, host)?;
            }
            Op::CallMethod(k, argc) => {
                let name = chunk.constant_name(k);
                let args = self.pop_n(argc as usize)?;
                let receiver = self.pop()?;
                self.invoke_method(&receiver, name, args, host)?;
            }
            Op::Return => {
                let result = self.pop()?;
                self.return_from_frame(result)?;
            }
            Op::Throw => {
                let thrown = self.pop()?;
                return Err(VmError::Thrown(thrown_message(&thrown)));
            }

            Op::MakeArray(n) => {
                let items = self.pop_n(n as usize)?;
                self.stack.push(Value::from(items));
            }
            Op::MakeObject(n) => {
                let flat = self.pop_n(n as usize * 2)?;
                let mut fields = BTreeMap::new();
                let mut pairs = flat.into_iter();
                while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                    fields.insert(key.to_string(), value);
                }
                self.stack.push(Value::from(fields));
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::Internal("stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let at = self.stack.len().checked_sub(n).ok_or(VmError::Internal("stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    fn peek(&self) -> VmResult<&Value> {
        self.stack.last().ok_or(VmError::Internal("stack underflow"))
    }

    fn local(&mut self, slot: u16) -> VmResult<&mut Value> {
        let base = self.frames.last().map_or(0, |f| f.base);
        self.stack.get_mut(base + slot as usize).ok_or(VmError::Internal("bad local slot"))
    }

    fn jump(&mut self, target: u32) -> VmResult<()> {
        let frame = self.frames.last_mut().ok_or(VmError::Internal("no active frame"))?;
        frame.ip = target as usize;
        Ok(())
    }

    fn return_from_frame(&mut self, result: Value) -> VmResult<()> {
        let frame = self.frames.pop().ok_or(VmError::Internal("no active frame"))?;
        self.stack.truncate(frame.base);
        if !self.frames.is_empty() {
            self.stack.push(result);
        }
        Ok(())
    }

    fn invoke(&mut self, callee: &Value, args: Vec<Value>, host: &mut dyn NativeHost) -> VmResult<()> {
        match callee {
            Value::Function(id) => {
                if self.frames.len() >= self.max_call_depth {
                    return Err(VmError::StackOverflow);
                }
                let function = self.program.function(*id);
                let base = self.stack.len();
                let mut args = args.into_iter();
                for slot in 0..function.local_count {
                    let value = if slot < function.arity { args.next() } else { None };
                    self.stack.push(value.unwrap_or_default());
                }
                self.frames.push(Frame { function: *id, ip: 0, base });
            }
            Value::Native(id) => {
                log::trace!("native {}({} args)", self.native_name(*id).unwrap_or("?"), args.len());
                match host.call_native(*id, args)? {
                    NativeOutcome::Return(value) => self.stack.push(value),
                    NativeOutcome::Suspend => self.awaiting_native = true,
                }
            }
            Value::Builtin(builtin) => {
                let value = builtins::call(*builtin, &args, &mut self.rng)?;
                self.stack.push(value);
            }
            other => return Err(VmError::Type(format!("{} is not a function", describe(other)))),
        }
        Ok(())
    }

    fn invoke_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>, host: &mut dyn NativeHost) -> VmResult<()> {
        if let Value::Object(fields) = receiver {
            let method = fields.borrow().get(name).cloned();
            return match method {
                Some(method) if method.is_callable() => self.invoke(&method, args, host),
                _ => Err(VmError::Type(format!("{} is not a function", member_name(receiver, name)))),
            };
        }
        if receiver.is_nullish() {
            return Err(VmError::Type(format!("Cannot read properties of {receiver} (reading '{name}')")));
        }
        match builtins::call_method(receiver, name, &args) {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None => Err(VmError::Type(format!("{} is not a function", member_name(receiver, name)))),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Text(s) => format!("\"{s}\""),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
        other => other.to_string(),
    }
}

fn member_name(receiver: &Value, name: &str) -> String {
    format!("{}.{name}", receiver.type_of())
}

/// Message of an uncaught `throw`: the `message` property of an error object,
/// else the thrown value itself.
fn thrown_message(thrown: &Value) -> String {
    if let Value::Object(fields) = thrown {
        if let Some(message) = fields.borrow().get("message") {
            return message.to_string();
        }
    }
    thrown.to_string()
}

fn get_property(object: &Value, key: &str) -> VmResult<Value> {
    match object {
        Value::Undefined | Value::Null => {
            Err(VmError::Type(format!("Cannot read properties of {object} (reading '{key}')")))
        }
        Value::Object(fields) => Ok(fields.borrow().get(key).cloned().unwrap_or_default()),
        other => Ok(builtins::intrinsic_property(other, key).unwrap_or_default()),
    }
}

fn set_property(object: &Value, key: &str, value: Value) -> VmResult<()> {
    match object {
        Value::Undefined | Value::Null => {
            return Err(VmError::Type(format!("Cannot set properties of {object} (setting '{key}')")));
        }
        Value::Object(fields) => {
            fields.borrow_mut().insert(key.to_string(), value);
        }
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            if key == "length" {
                let len = value.to_number();
                if !(len >= 0.0 && len.fract() == 0.0) {
                    return Err(invalid_array_length());
                }
                resize_array(&mut items, len)?;
            } else if let Ok(index) = key.parse::<usize>() {
                if index >= items.len() {
                    resize_array(&mut items, index as f64 + 1.0)?;
                }
                items[index] = value;
            }
        }
        // Primitives silently ignore property writes.
        _ => {}
    }
    Ok(())
}

fn invalid_array_length() -> VmError {
    VmError::Type("Invalid array length".to_string())
}

/// Grow or shrink to `len` holes-as-undefined, refusing lengths over
/// [`MAX_ARRAY_LENGTH`] and allocations the allocator turns down.
fn resize_array(items: &mut Vec<Value>, len: f64) -> VmResult<()> {
    if len > MAX_ARRAY_LENGTH as f64 {
        return Err(invalid_array_length());
    }
    let len = len as usize;
    if len > items.len() {
        items.try_reserve(len - items.len()).map_err(|_| invalid_array_length())?;
    }
    items.resize(len, Value::Undefined);
    Ok(())
}

/// Objects and arrays convert to their string form before arithmetic and comparison.
fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::from(value.to_string()),
        other => other.clone(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let (l, r) = (to_primitive(left), to_primitive(right));
            if matches!(l, Value::Text(_)) || matches!(r, Value::Text(_)) {
                Value::from(format!("{l}{r}"))
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Remainder => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Equals => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEquals => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEquals => Value::Bool(left == right),
        BinaryOp::StrictNotEquals => Value::Bool(left != right),
        BinaryOp::LessThan | BinaryOp::GreaterThan | BinaryOp::LessOrEqual | BinaryOp::GreaterOrEqual => {
            let (l, r) = (to_primitive(left), to_primitive(right));
            let ordering = match (&l, &r) {
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::LessThan => ordering.is_lt(),
                BinaryOp::GreaterThan => ordering.is_gt(),
                BinaryOp::LessOrEqual => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn unary(op: UnaryOp, operand: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!operand.truthy()),
        UnaryOp::Negate => Value::Number(-operand.to_number()),
        UnaryOp::Plus => Value::Number(operand.to_number()),
        UnaryOp::Typeof => Value::from(operand.type_of()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser};

    /// Host whose natives record their arguments. `wait` suspends, `boom` fails.
    #[derive(Default)]
    struct RecordingHost {
        calls: Vec<(String, Vec<Value>)>,
        names: Vec<String>,
    }

    impl NativeHost for RecordingHost {
        fn call_native(&mut self, id: NativeId, args: Vec<Value>) -> VmResult<NativeOutcome> {
            let name = self.names[id.index()].clone();
            self.calls.push((name.clone(), args));
            match name.as_str() {
                "wait" => Ok(NativeOutcome::Suspend),
                "boom" => Err(VmError::Host("boom failed".into())),
                _ => Ok(NativeOutcome::Return(Value::Number(7.0))),
            }
        }
    }

    fn vm_for(source: &str) -> Vm {
        let program = parser::parse(lexer::lex(source).unwrap()).unwrap();
        Vm::new(compile(&program).unwrap(), &EngineConfig::default())
    }

    fn run_with(vm: &mut Vm, host: &mut RecordingHost) -> VmResult<()> {
        while vm.step(host)? {}
        Ok(())
    }

    fn run(source: &str) -> Vm {
        let mut vm = vm_for(source);
        run_with(&mut vm, &mut RecordingHost::default()).unwrap();
        vm
    }

    fn global(vm: &Vm, name: &str) -> Value {
        vm.global(name).cloned().unwrap_or_default()
    }

    fn run_err(source: &str) -> VmError {
        let mut vm = vm_for(source);
        run_with(&mut vm, &mut RecordingHost::default()).unwrap_err()
    }

    #[test]
    fn arithmetic_and_precedence() {
        let vm = run("var a = 1 + 2 * 3; var b = (1 + 2) * 3; var c = 7 % 4; var d = -a;");
        assert_eq!(global(&vm, "a"), Value::Number(7.0));
        assert_eq!(global(&vm, "b"), Value::Number(9.0));
        assert_eq!(global(&vm, "c"), Value::Number(3.0));
        assert_eq!(global(&vm, "d"), Value::Number(-7.0));
    }

    #[test]
    fn string_concatenation() {
        let vm = run("var s = 'n=' + 1 + 2; var t = 1 + 2 + 'x'; var u = [1, 2] + '';");
        assert_eq!(global(&vm, "s").to_string(), "n=12");
        assert_eq!(global(&vm, "t").to_string(), "3x");
        assert_eq!(global(&vm, "u").to_string(), "1,2");
    }

    #[test]
    fn comparisons() {
        let vm = run("var a = 'b' > 'a'; var b = 2 < '10'; var c = 1 < NaN; var d = null == undefined; var e = 1 === '1';");
        assert_eq!(global(&vm, "a"), Value::Bool(true));
        assert_eq!(global(&vm, "b"), Value::Bool(true));
        assert_eq!(global(&vm, "c"), Value::Bool(false));
        assert_eq!(global(&vm, "d"), Value::Bool(true));
        assert_eq!(global(&vm, "e"), Value::Bool(false));
    }

    #[test]
    fn loops_with_break_and_continue() {
        let vm = run(
            "var sum = 0;
             for (var i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; sum += i; }
             var n = 0; do { n++; } while (n < 3);
             var w = 0; while (true) { w = w + 1; if (w == 5) break; }",
        );
        assert_eq!(global(&vm, "sum"), Value::Number(12.0));
        assert_eq!(global(&vm, "n"), Value::Number(3.0));
        assert_eq!(global(&vm, "w"), Value::Number(5.0));
    }

    #[test]
    fn functions_and_recursion() {
        let vm = run(
            "function fact(n) { if (n <= 1) return 1; return n * fact(n - 1); }
             function second(a, b) { return b; }
             var r = fact(5); var u = second(1);",
        );
        assert_eq!(global(&vm, "r"), Value::Number(120.0));
        assert_eq!(global(&vm, "u"), Value::Undefined);
    }

    #[test]
    fn function_locals_do_not_leak() {
        let vm = run("var x = 1; function f() { var x = 2; return x; } var y = f();");
        assert_eq!(global(&vm, "x"), Value::Number(1.0));
        assert_eq!(global(&vm, "y"), Value::Number(2.0));
    }

    #[test]
    fn update_expressions() {
        let vm = run("var i = 5; var a = i++; var b = ++i; var c = i--; var o = {n: 1}; o.n++; var arr = [1]; arr[0] += 4;");
        assert_eq!(global(&vm, "a"), Value::Number(5.0));
        assert_eq!(global(&vm, "b"), Value::Number(7.0));
        assert_eq!(global(&vm, "c"), Value::Number(7.0));
        assert_eq!(global(&vm, "i"), Value::Number(6.0));
        assert_eq!(global(&vm, "o").to_json(), serde_json::json!({"n": 2}));
        assert_eq!(global(&vm, "arr").to_json(), serde_json::json!([5]));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let vm = run("var calls = 0; function hit() { calls++; return true; } var a = false && hit(); var b = true || hit(); var c = 0 || 'x'; var d = 1 && 2;");
        assert_eq!(global(&vm, "calls"), Value::Number(0.0));
        assert_eq!(global(&vm, "a"), Value::Bool(false));
        assert_eq!(global(&vm, "c").to_string(), "x");
        assert_eq!(global(&vm, "d"), Value::Number(2.0));
    }

    #[test]
    fn objects_arrays_and_methods() {
        let vm = run(
            "var o = {a: 1, 'b': [1, 2]}; o.c = o.b.length; o['d'] = 'x'.toUpperCase();
             var list = []; list.push(3); list.push(4); var top = list.pop(); list[3] = 1;
             var m = Math.max(1, 5, 3);",
        );
        assert_eq!(global(&vm, "o").to_json(), serde_json::json!({"a": 1, "b": [1, 2], "c": 2, "d": "X"}));
        assert_eq!(global(&vm, "top"), Value::Number(4.0));
        assert_eq!(global(&vm, "list").to_json(), serde_json::json!([3, null, null, 1]));
        assert_eq!(global(&vm, "m"), Value::Number(5.0));
    }

    #[test]
    fn typeof_and_conditional() {
        let vm = run("var t = typeof missing; var f = typeof Math.floor; var c = t == 'undefined' ? 'yes' : 'no';");
        assert_eq!(global(&vm, "t").to_string(), "undefined");
        assert_eq!(global(&vm, "f").to_string(), "function");
        assert_eq!(global(&vm, "c").to_string(), "yes");
    }

    #[test]
    fn undeclared_variable_is_reference_error() {
        assert_eq!(run_err("var a = nope + 1;"), VmError::NotDefined("nope".into()));
        assert_eq!(run_err("nope;").to_string(), "nope is not defined");
    }

    #[test]
    fn calling_non_function_is_type_error() {
        assert!(matches!(run_err("var x = 1; x();"), VmError::Type(m) if m.contains("not a function")));
        assert!(matches!(run_err("var o = {}; o.f();"), VmError::Type(m) if m == "object.f is not a function"));
    }

    #[test]
    fn property_of_undefined_is_type_error() {
        let err = run_err("var o; o.x;");
        assert_eq!(err.to_string(), "Cannot read properties of undefined (reading 'x')");
        assert!(matches!(run_err("var o = null; o.x = 1;"), VmError::Type(_)));
    }

    #[test]
    fn throw_uses_error_message() {
        assert_eq!(run_err("throw new Error('bad thing');"), VmError::Thrown("bad thing".into()));
        assert_eq!(run_err("throw 'plain';"), VmError::Thrown("plain".into()));
        assert_eq!(run_err("throw {code: 1};"), VmError::Thrown("[object Object]".into()));
    }

    #[test]
    fn huge_array_writes_are_rejected() {
        let too_long = VmError::Type("Invalid array length".into());
        assert_eq!(run_err("var a = []; a[4000000000000] = 1;"), too_long);
        assert_eq!(run_err("var a = []; a.length = 1e15;"), too_long);
        assert_eq!(run_err("var a = []; a.length = -1;"), too_long);

        let vm = run("var a = [1, 2, 3]; a.length = 1; var b = []; b[2] = 'x';");
        assert_eq!(global(&vm, "a").to_json(), serde_json::json!([1]));
        assert_eq!(global(&vm, "b").to_json(), serde_json::json!([null, null, "x"]));
    }

    #[test]
    fn cyclic_arrays_stringify_without_recursing() {
        let vm = run("var a = [1]; a.push(a); var s = '' + a; var j = a.join('-'); var n = +[[]];");
        assert_eq!(global(&vm, "s").to_string(), "1,");
        assert_eq!(global(&vm, "j").to_string(), "1-");
        assert_eq!(global(&vm, "n"), Value::Number(0.0));
    }

    #[test]
    fn deep_recursion_overflows() {
        assert_eq!(run_err("function f() { return f(); } f();"), VmError::StackOverflow);
    }

    #[test]
    fn errors_leave_the_machine_finished() {
        let mut vm = vm_for("nope;");
        let mut host = RecordingHost::default();
        assert!(run_with(&mut vm, &mut host).is_err());
        assert!(vm.is_finished());
        assert_eq!(vm.step(&mut host), Ok(false));
    }

    #[test]
    fn one_instruction_per_step() {
        let mut vm = vm_for("var a = 1;");
        let mut host = RecordingHost::default();
        // DeclareGlobal, Const, StoreGlobal, Pop, Undefined, Return
        for _ in 0..6 {
            assert_eq!(vm.step(&mut host), Ok(true));
        }
        assert_eq!(vm.step(&mut host), Ok(false));
        assert_eq!(vm.instructions(), 6);
    }

    #[test]
    fn natives_receive_arguments() {
        let mut vm = vm_for("var r = sense(1, 'two');");
        let mut host = RecordingHost { names: vec!["sense".into()], ..Default::default() };
        vm.define_native("sense");
        run_with(&mut vm, &mut host).unwrap();
        assert_eq!(host.calls, vec![("sense".to_string(), vec![Value::Number(1.0), Value::from("two")])]);
        assert_eq!(global(&vm, "r"), Value::Number(7.0));
    }

    #[test]
    fn suspended_native_waits_for_resume() {
        let mut vm = vm_for("var r = wait() + 1;");
        let mut host = RecordingHost { names: vec!["wait".into()], ..Default::default() };
        vm.define_native("wait");
        while !vm.is_paused() {
            assert_eq!(vm.step(&mut host), Ok(true));
        }
        let before = vm.instructions();
        assert_eq!(vm.step(&mut host), Ok(true));
        assert_eq!(vm.instructions(), before);

        vm.resume(Value::Number(41.0));
        assert!(!vm.is_paused());
        run_with(&mut vm, &mut host).unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(42.0));
    }

    #[test]
    fn host_errors_propagate() {
        let mut vm = vm_for("boom();");
        let mut host = RecordingHost { names: vec!["boom".into()], ..Default::default() };
        vm.define_native("boom");
        assert_eq!(run_with(&mut vm, &mut host), Err(VmError::Host("boom failed".into())));
    }

    #[test]
    fn var_declaration_keeps_injected_global() {
        let mut vm = vm_for("var loopTrap; var seen = loopTrap;");
        vm.set_global("loopTrap", Value::Number(1000.0));
        run_with(&mut vm, &mut RecordingHost::default()).unwrap();
        assert_eq!(global(&vm, "seen"), Value::Number(1000.0));
    }

    #[test]
    fn globals_json_hides_callables_and_builtins() {
        let vm = run("var n = 1; var s = 'a'; function f() {}");
        let globals = vm.globals_json();
        assert_eq!(globals.get("n"), Some(&serde_json::json!(1)));
        assert_eq!(globals.get("s"), Some(&serde_json::json!("a")));
        assert!(!globals.contains_key("f"));
        assert!(!globals.contains_key("Math"));
        assert!(!globals.contains_key("NaN"));
    }

    #[test]
    fn random_is_seeded() {
        let a = run("var r = Math.random();");
        let b = run("var r = Math.random();");
        assert_eq!(global(&a, "r"), global(&b, "r"));
    }
}
