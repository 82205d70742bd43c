//! The fetch-decode-execute loop: a growable value stack, a fixed-depth
//! call-frame stack, hash-table globals, and closure/upvalue machinery.

mod error;
mod natives;
mod stack;

pub use error::RuntimeError;

use stack::Stack;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use vmcore::diagnostics::{Report, Reporter};
use vmcore::object::{Closure, Native, Obj, Upvalue};
use vmcore::opcode::OpCode;
use vmcore::table::{Globals, Interner};
use vmcore::value::Value;

const MAX_FRAMES: usize = 64;

struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    /// Index into the value stack of this frame's slot 0 (the callee itself).
    slots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Owns every piece of mutable interpreter state named in the data model:
/// the frame stack, the value stack, globals, the intern table, and the
/// list of upvalues still open onto the value stack. `reporter` is where
/// every diagnostic — compile or runtime — ends up; `output` is where
/// `print` writes. Neither is hardwired to stdio: the CLI driver passes
/// real stdout and a `CliReporter`, tests pass an in-memory buffer and a
/// `VecReporter`.
pub struct Vm<'rep> {
    frames: Vec<CallFrame>,
    stack: Stack,
    globals: Globals,
    strings: Interner,
    /// Kept in descending stack-index order, matching the source's
    /// head-sorted linked list, so `capture_upvalue` and `close_upvalues`
    /// both do a short linear scan from the front.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    reporter: &'rep mut dyn Reporter,
    output: &'rep mut dyn Write,
}

impl<'rep> Vm<'rep> {
    pub fn new(reporter: &'rep mut dyn Reporter, output: &'rep mut dyn Write) -> Self {
        let mut vm = Self {
            frames: Vec::with_capacity(MAX_FRAMES),
            stack: Stack::new(),
            globals: Globals::new(),
            strings: Interner::new(),
            open_upvalues: Vec::new(),
            reporter,
            output,
        };
        vm.define_natives();
        vm
    }

    fn define_natives(&mut self) {
        for (name, arity, function) in natives::NATIVES {
            let name = self.strings.intern(name);
            let native = Native {
                name: Rc::clone(&name),
                arity: *arity,
                function: *function,
            };
            self.globals.insert(name, Value::Obj(Obj::Native(Rc::new(native))));
        }
    }

    /// Compiles and runs `source`, sharing this VM's intern table with the
    /// compiler so identifiers and string literals resolve to the same
    /// canonical allocations the running code will later compare by
    /// identity.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match compiler::compile(source, &mut self.strings, &mut *self.reporter) {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };

        let closure = Rc::new(Closure::new(Rc::new(function), Vec::new()));
        if self
            .stack
            .push(Value::Obj(Obj::Closure(Rc::clone(&closure))))
            .is_err()
        {
            unreachable!("the empty stack always has room for the first value");
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: 0,
        });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(error) => {
                let trace = self.build_trace();
                self.reporter.report(Report::Runtime { message: error.to_string(), trace });
                self.reset();
                InterpretResult::RuntimeError
            }
        }
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.stack.clear();
        self.open_upvalues.clear();
    }

    fn build_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let line = frame.closure.function.chunk.line(frame.ip.saturating_sub(1));
                match &frame.closure.function.name {
                    Some(name) => format!("[line {line}] in {name}()"),
                    None => format!("[line {line}] in script"),
                }
            })
            .collect()
    }

    // -- the fetch-decode-execute loop --------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            let closure = Rc::clone(&self.frames[frame_idx].closure);
            let ip = self.frames[frame_idx].ip;
            let chunk = &closure.function.chunk;

            #[cfg(feature = "debug-execution")]
            {
                print!("          ");
                for value in 0..self.stack.len() {
                    print!("[ {:?} ]", self.stack.get(value));
                }
                println!();
                vmcore::disassemble::disassemble_instruction(chunk, ip);
            }

            let op = OpCode::from(chunk.byte(ip));
            self.frames[frame_idx].ip += 1;

            match op {
                OpCode::Constant => {
                    let idx = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    self.push(chunk.constant(idx).clone())?;
                }
                OpCode::Nil => self.push(Value::Nil)?,
                OpCode::True => self.push(Value::Bool(true))?,
                OpCode::False => self.push(Value::Bool(false))?,
                OpCode::Pop => {
                    self.stack.pop();
                }
                OpCode::GetLocal => {
                    let slot = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    let value = self.stack.get(self.frames[frame_idx].slots + slot).clone();
                    self.push(value)?;
                }
                OpCode::SetLocal => {
                    let slot = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    let value = self.stack.peek(0).clone();
                    let abs = self.frames[frame_idx].slots + slot;
                    self.stack.set(abs, value);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant(chunk, frame_idx);
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value)?;
                        }
                        None => return Err(RuntimeError::UndefinedVariable(name)),
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant(chunk, frame_idx);
                    let value = self.stack.peek(0).clone();
                    if !self.globals.contains_key(&name) {
                        return Err(RuntimeError::UndefinedVariable(name));
                    }
                    self.globals.insert(name, value);
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant(chunk, frame_idx);
                    let value = self.stack.pop();
                    self.globals.insert(name, value);
                }
                OpCode::GetUpvalue => {
                    let idx = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    let upvalue = Rc::clone(&closure.upvalues[idx]);
                    let value = match &*upvalue.borrow() {
                        Upvalue::Closed(value) => value.clone(),
                        Upvalue::Open(slot) => self.stack.get(*slot).clone(),
                    };
                    self.push(value)?;
                }
                OpCode::SetUpvalue => {
                    let idx = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    let value = self.stack.peek(0).clone();
                    let upvalue = Rc::clone(&closure.upvalues[idx]);
                    let slot = upvalue.borrow().open_slot();
                    match slot {
                        Some(slot) => self.stack.set(slot, value),
                        None => *upvalue.borrow_mut() = Upvalue::Closed(value),
                    }
                }
                OpCode::Equal => {
                    let b = self.stack.pop();
                    let a = self.stack.pop();
                    self.push(Value::Bool(a == b))?;
                }
                OpCode::Greater => self.numeric_binary(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.numeric_binary(|a, b| Value::Bool(a < b))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.numeric_binary(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.numeric_binary(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.stack.pop();
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                OpCode::Negate => {
                    let value = self.stack.peek(0);
                    let number = value.as_number().ok_or(RuntimeError::OperandMustBeANumber)?;
                    self.stack.pop();
                    self.push(Value::Number(-number))?;
                }
                OpCode::Print => {
                    let value = self.stack.pop();
                    writeln!(self.output, "{value}").map_err(|e| RuntimeError::Io(e.to_string()))?;
                }
                OpCode::Jump => {
                    let offset = chunk.read_u16(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 2 + offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = chunk.read_u16(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 2;
                    if self.stack.peek(0).is_falsey() {
                        self.frames[frame_idx].ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = chunk.read_u16(self.frames[frame_idx].ip) as usize;
                    let ip = self.frames[frame_idx].ip;
                    self.frames[frame_idx].ip = ip + 2 - offset;
                }
                OpCode::Call => {
                    let argc = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    self.call_value(argc)?;
                }
                OpCode::Closure => {
                    let idx = chunk.byte(self.frames[frame_idx].ip) as usize;
                    self.frames[frame_idx].ip += 1;
                    let function = match chunk.constant(idx) {
                        Value::Obj(Obj::Function(function)) => Rc::clone(function),
                        _ => unreachable!("OP_CLOSURE constant is always a Function"),
                    };
                    let upvalue_count = function.upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = chunk.byte(self.frames[frame_idx].ip) != 0;
                        let index = chunk.byte(self.frames[frame_idx].ip + 1) as usize;
                        self.frames[frame_idx].ip += 2;
                        if is_local {
                            let slot = self.frames[frame_idx].slots + index;
                            upvalues.push(self.capture_upvalue(slot));
                        } else {
                            upvalues.push(Rc::clone(&closure.upvalues[index]));
                        }
                    }
                    let new_closure = Closure::new(function, upvalues);
                    self.push(Value::Obj(Obj::Closure(Rc::new(new_closure))))?;
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.stack.pop();
                }
                OpCode::Return => {
                    let result = self.stack.pop();
                    let slots = self.frames[frame_idx].slots;
                    self.close_upvalues(slots);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.stack.pop();
                        return Ok(());
                    }
                    self.stack.truncate(slots);
                    self.push(result)?;
                }
            }
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.stack.push(value)
    }

    fn read_string_constant(&mut self, chunk: &vmcore::chunk::Chunk, frame_idx: usize) -> Rc<str> {
        let idx = chunk.byte(self.frames[frame_idx].ip) as usize;
        self.frames[frame_idx].ip += 1;
        match chunk.constant(idx) {
            Value::Obj(Obj::Str(name)) => Rc::clone(name),
            _ => unreachable!("name-constant operands are always interned strings"),
        }
    }

    fn numeric_binary(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        let b = self.stack.peek(0).as_number();
        let a = self.stack.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.stack.pop();
                self.stack.pop();
                self.push(op(a, b))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbers),
        }
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.stack.peek(0).clone();
        let a = self.stack.peek(1).clone();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                let result = Value::Number(x + y);
                self.stack.pop();
                self.stack.pop();
                self.push(result)
            }
            (Value::Obj(Obj::Str(x)), Value::Obj(Obj::Str(y))) => {
                let mut concatenated = String::with_capacity(x.len() + y.len());
                concatenated.push_str(x);
                concatenated.push_str(y);
                let interned = self.strings.intern(&concatenated);
                self.stack.pop();
                self.stack.pop();
                self.push(Value::Obj(Obj::Str(interned)))
            }
            _ => Err(RuntimeError::OperandsMustBeNumbersOrStrings),
        }
    }

    fn call_value(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.stack.peek(argc).clone();
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, argc),
            Value::Obj(Obj::Native(native)) => self.call_native(native, argc),
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> Result<(), RuntimeError> {
        let arity = closure.function.arity as usize;
        if argc != arity {
            return Err(RuntimeError::WrongArity { expected: closure.function.arity, got: argc });
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, native: Rc<Native>, argc: usize) -> Result<(), RuntimeError> {
        if argc != native.arity as usize {
            return Err(RuntimeError::WrongArity { expected: native.arity, got: argc });
        }
        let start = self.stack.len() - argc;
        let args: Vec<Value> = (start..self.stack.len()).map(|i| self.stack.get(i).clone()).collect();
        let result = native.call(&args).map_err(RuntimeError::Native)?;
        self.stack.truncate(start - 1);
        // Re-intern any string a native hands back: `NativeFn` has no way to
        // reach the intern table itself, so this is where the identity
        // invariant (see `object::Obj::eq`) gets restored before the value
        // re-enters the stack.
        let result = match result {
            Value::Obj(Obj::Str(s)) => Value::Obj(Obj::Str(self.strings.intern(&s))),
            other => other,
        };
        self.push(result)
    }

    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        if let Some(existing) = self.open_upvalues.iter().find(|uv| uv.borrow().open_slot() == Some(slot)) {
            return Rc::clone(existing);
        }
        let upvalue = Rc::new(RefCell::new(Upvalue::Open(slot)));
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|uv| uv.borrow().open_slot().map(|s| s < slot).unwrap_or(false))
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, Rc::clone(&upvalue));
        upvalue
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let slot = self.open_upvalues[i].borrow().open_slot();
            match slot {
                Some(slot) if slot >= from_slot => {
                    let value = self.stack.get(slot).clone();
                    *self.open_upvalues[i].borrow_mut() = Upvalue::Closed(value);
                    self.open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmcore::diagnostics::VecReporter;

    fn run(source: &str) -> (InterpretResult, String) {
        let mut reporter = VecReporter::default();
        let mut output = Vec::new();
        let result = {
            let mut vm = Vm::new(&mut reporter, &mut output);
            vm.interpret(source)
        };
        (result, String::from_utf8(output).expect("output is valid utf-8"))
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, output) = run("print 1+2*3;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "7\n");
    }

    #[test]
    fn block_scoping_shadows_then_restores() {
        let (result, output) = run("var a=1; var b=2; { var a=3; print a+b; } print a;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "5\n1\n");
    }

    #[test]
    fn function_call_and_return() {
        let (result, output) = run("fun f(x){ return x*x; } print f(4);");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "16\n");
    }

    #[test]
    fn while_loop() {
        let (result, output) = run("var i=0; while (i<3) { print i; i = i+1; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "0\n1\n2\n");
    }

    #[test]
    fn closures_sharing_an_upvalue_across_calls() {
        let (result, output) = run(
            "fun make(){ var n=0; fun g(){ n = n+1; return n; } return g; } \
             var c = make(); print c(); print c(); print c();",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "1\n2\n3\n");
    }

    #[test]
    fn string_concatenation() {
        let (result, output) = run(r#"print "foo"+"bar";"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "foobar\n");
    }

    #[test]
    fn separate_make_invocations_do_not_share_state() {
        let (result, output) = run(
            "fun make(){ var i=0; fun inc(){ i=i+1; return i; } return inc; } \
             var c1 = make(); var c2 = make(); print c1(); print c1(); print c2();",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "1\n2\n1\n");
    }

    #[test]
    fn assignment_expression_yields_its_value() {
        let (result, output) = run("var a = 1; print a = 2; print a;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "2\n2\n");
    }

    #[test]
    fn short_circuit_and_skips_rhs() {
        let (result, output) = run(
            "fun boom(){ print \"boom\"; return true; } \
             if (false and boom()) { print \"yes\"; } print \"done\";",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "done\n");
    }

    #[test]
    fn short_circuit_or_skips_rhs() {
        let (result, output) = run(
            "fun boom(){ print \"boom\"; return true; } \
             if (true or boom()) { print \"yes\"; } print \"done\";",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "yes\ndone\n");
    }

    #[test]
    fn adding_number_and_string_is_a_runtime_error() {
        let (result, _) = run(r#"print 1 + "a";"#);
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn equality_is_false_across_types() {
        let (result, output) = run("print 1 == \"1\"; print nil == nil;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "false\ntrue\n");
    }

    #[test]
    fn strings_compare_equal_by_content() {
        let (result, output) = run(r#"var a = "ab"; var b = "a"+"b"; print a == b;"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "true\n");
    }

    #[test]
    fn wrong_arity_is_a_runtime_error() {
        let (result, _) = run("fun f(x){ return x; } f();");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn undefined_global_read_is_a_runtime_error() {
        let (result, _) = run("print undefined_name;");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn undefined_global_assignment_is_a_runtime_error() {
        let (result, _) = run("undefined_name = 1;");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn recursive_fibonacci() {
        let (result, output) = run(
            "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2); } print fib(10);",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "55\n");
    }

    #[test]
    fn upvalue_survives_enclosing_scope_end() {
        let (result, output) = run(
            "fun make(){ var i = 0; { fun inc(){ i = i + 1; return i; } return inc; } } \
             var c = make(); print c(); print c();",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn clock_native_returns_a_number() {
        let (result, _) = run("print clock() >= 0;");
        assert_eq!(result, InterpretResult::Ok);
    }

    #[test]
    fn type_of_native_results_compare_equal_by_identity() {
        let (result, output) = run(r#"print type_of(1) == type_of(2);"#);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(output, "true\n");
    }

    #[test]
    fn runtime_error_reports_a_trace() {
        let mut reporter = VecReporter::default();
        let mut output = Vec::new();
        let result = {
            let mut vm = Vm::new(&mut reporter, &mut output);
            vm.interpret("fun f(){ return 1 + \"a\"; } f();")
        };
        assert_eq!(result, InterpretResult::RuntimeError);
        assert!(reporter.had_error());
    }
}
