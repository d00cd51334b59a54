//! The virtual machine
//!
//! One [`Engine`] value owns everything: heap, value stack, call frames,
//! globals, the open-upvalue list and the interned `init` string. The
//! dispatch loop reads one byte at a time from the active frame's chunk;
//! every allocation point checks the collection trigger first, with the
//! operands of the in-flight operation still rooted on the stack.

use std::io::{self, Write};

use tracing::{debug, trace};

use ember_compiler::compile;
use ember_core::debug::disassemble_instruction;
use ember_core::object::NativeFn;
use ember_core::{FRAMES_MAX, Heap, Obj, ObjRef, OpCode, STACK_MAX, Table, UpvalueState, Value};

use crate::config::EngineConfig;
use crate::error::{InterpretError, RuntimeError};
use crate::natives;

#[derive(Clone, Copy)]
struct CallFrame {
    closure: ObjRef,
    /// The closure's function, cached to keep dispatch to one heap hop.
    function: ObjRef,
    /// Index of the next byte to execute in the function's chunk.
    ip: usize,
    /// Stack index of slot 0 for this frame (the callee itself).
    slots: usize,
}

/// An entry in the open-upvalue list, sorted by descending stack slot.
/// The slot is duplicated out of the upvalue object so the list can be
/// searched without touching the heap.
#[derive(Clone, Copy)]
struct OpenUpvalue {
    slot: usize,
    upvalue: ObjRef,
}

/// What a value turned out to be when called.
enum Callee {
    Closure(ObjRef),
    Native(NativeFn),
    Class(ObjRef),
    BoundMethod(Value, ObjRef),
    NotCallable,
}

pub struct Engine {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<OpenUpvalue>,
    globals: Table,
    /// Kept interned and rooted for initializer dispatch.
    init_string: ObjRef,
    config: EngineConfig,
    out: Box<dyn Write>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_output(config, Box::new(io::stdout()))
    }

    /// An engine that prints through the given sink instead of stdout.
    pub fn with_output(config: EngineConfig, out: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut engine = Engine {
            heap,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            init_string,
            config,
            out,
        };
        engine.define_native("clock", natives::clock);
        engine.define_native("append", natives::append);
        engine.define_native("delete", natives::delete);
        engine
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name = self.heap.intern(name);
        let native = self.heap.new_native(function);
        let hash = self.heap.string(name).hash;
        self.globals.set(name, hash, Value::object(native));
    }

    /// Compile and run one program. On failure the error has already been
    /// printed; the engine survives either way, so a REPL can keep calling
    /// this with the globals intact.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap).map_err(InterpretError::Compile)?;

        // Root the function across the closure allocation.
        self.push(Value::object(function));
        self.maybe_collect();
        let closure = self.heap.new_closure(function);
        self.pop();
        self.push(Value::object(closure));
        self.call_closure(closure, 0).map_err(InterpretError::Runtime)?;

        let result = self.run().map_err(InterpretError::Runtime);
        debug_assert!(result.is_err() || self.stack.is_empty(), "stack not conserved");
        result
    }

    /// Depth of the value stack; zero between statements of a program that
    /// has not errored.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // =========================================================================
    // Stack primitives
    // =========================================================================

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop on empty value stack")
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // =========================================================================
    // Frame and chunk reads
    // =========================================================================

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("dispatch with no active frame");
        let index = frame.ip;
        frame.ip += 1;
        let function = frame.function;
        self.heap.function(function).chunk.code[index]
    }

    #[inline]
    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    #[inline]
    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("dispatch with no active frame");
        let function = frame.function;
        self.heap.function(function).chunk.constants[index]
    }

    /// Read a name-constant operand, which the compiler guarantees is an
    /// interned string; returns the handle and its hash.
    #[inline]
    fn read_string(&mut self) -> (ObjRef, u32) {
        let name = self.read_constant().as_obj();
        let hash = self.heap.string(name).hash;
        (name, hash)
    }

    fn jump(&mut self, offset: i64) {
        let frame = self.frames.last_mut().expect("dispatch with no active frame");
        frame.ip = (frame.ip as i64 + offset) as usize;
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Print the message and an innermost-first backtrace, then reset the
    /// stacks so the engine stays usable.
    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        eprintln!("{message}");
        for frame in self.frames.iter().rev() {
            let function = self.heap.function(frame.function);
            let line = function.chunk.lines[frame.ip.saturating_sub(1)];
            match function.name {
                Some(name) => eprintln!("[line {line}] in {}()", self.heap.string_chars(name)),
                None => eprintln!("[line {line}] in script"),
            }
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeError { message }
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// Collect if the heap is past its threshold (or always, under
    /// stress). Call sites precede every allocation that grows the heap,
    /// while the operands are still stack-reachable.
    fn maybe_collect(&mut self) {
        if self.config.stress_gc || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    fn collect_garbage(&mut self) {
        debug!(bytes = self.heap.bytes_allocated(), "gc begin");
        for index in 0..self.stack.len() {
            let value = self.stack[index];
            self.heap.mark_value(value);
        }
        for index in 0..self.frames.len() {
            let closure = self.frames[index].closure;
            self.heap.mark_object(closure);
        }
        for index in 0..self.open_upvalues.len() {
            let upvalue = self.open_upvalues[index].upvalue;
            self.heap.mark_object(upvalue);
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark_object(key);
            self.heap.mark_value(value);
        }
        self.heap.mark_object(self.init_string);
        self.heap.trace_references();
        self.heap.collect_finish();
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), RuntimeError> {
        let kind = if callee.is_obj() {
            match self.heap.get(callee.as_obj()) {
                Obj::Closure(_) => Callee::Closure(callee.as_obj()),
                Obj::Native(native) => Callee::Native(native.function),
                Obj::Class(_) => Callee::Class(callee.as_obj()),
                Obj::BoundMethod(bound) => Callee::BoundMethod(bound.receiver, bound.method),
                _ => Callee::NotCallable,
            }
        } else {
            Callee::NotCallable
        };

        match kind {
            Callee::Closure(closure) => self.call_closure(closure, argc),
            Callee::Native(function) => self.call_native(function, argc),
            Callee::Class(class) => self.call_class(class, argc),
            Callee::BoundMethod(receiver, method) => {
                // The receiver takes slot 0 of the method's frame.
                let slot = self.stack.len() - argc - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, argc)
            }
            Callee::NotCallable => {
                Err(self.runtime_error("Can only call functions and classes."))
            }
        }
    }

    fn call_closure(&mut self, closure: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if argc != arity {
            let message = format!("Expected {arity} arguments but got {argc}.");
            return Err(self.runtime_error(message));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, function: NativeFn, argc: usize) -> Result<(), RuntimeError> {
        let start = self.stack.len() - argc;
        let result = function(&mut self.heap, &self.stack[start..]);
        match result {
            Ok(value) => {
                // Replace the callee and arguments with the result.
                self.stack.truncate(start - 1);
                self.push(value);
                Ok(())
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn call_class(&mut self, class: ObjRef, argc: usize) -> Result<(), RuntimeError> {
        self.maybe_collect();
        let instance = self.heap.new_instance(class);
        let slot = self.stack.len() - argc - 1;
        self.stack[slot] = Value::object(instance);

        let init_hash = self.heap.string(self.init_string).hash;
        let initializer = self.heap.class(class).methods.get(self.init_string, init_hash);
        match initializer {
            Some(initializer) => self.call_closure(initializer.as_obj(), argc),
            None if argc != 0 => {
                let message = format!("Expected 0 arguments but got {argc}.");
                Err(self.runtime_error(message))
            }
            None => Ok(()),
        }
    }

    fn invoke(&mut self, name: ObjRef, hash: u32, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc);
        if !receiver.is_obj() || !matches!(self.heap.get(receiver.as_obj()), Obj::Instance(_)) {
            return Err(self.runtime_error("Only instances have methods."));
        }
        let instance = receiver.as_obj();

        // A field holding a callable shadows any method of the same name.
        let field = self.heap.instance(instance).fields.get(name, hash);
        if let Some(field) = field {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }

        let class = self.heap.instance(instance).class;
        self.invoke_from_class(class, name, hash, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        hash: u32,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let method = self.heap.class(class).methods.get(name, hash);
        match method {
            Some(method) => self.call_closure(method.as_obj(), argc),
            None => {
                let message =
                    format!("Undefined property '{}'.", self.heap.string_chars(name));
                Err(self.runtime_error(message))
            }
        }
    }

    /// Look a method up on a class and leave a bound method in place of
    /// the receiver on the stack.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef, hash: u32) -> Result<(), RuntimeError> {
        let method = self.heap.class(class).methods.get(name, hash);
        let Some(method) = method else {
            let message = format!("Undefined property '{}'.", self.heap.string_chars(name));
            return Err(self.runtime_error(message));
        };
        self.maybe_collect();
        let bound = self.heap.new_bound_method(self.peek(0), method.as_obj());
        self.pop();
        self.push(Value::object(bound));
        Ok(())
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// One open upvalue per live stack slot: reuse the existing entry or
    /// splice a fresh one into the descending-sorted list.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (index, open) in self.open_upvalues.iter().enumerate() {
            if open.slot == slot {
                return open.upvalue;
            }
            if open.slot < slot {
                insert_at = index;
                break;
            }
        }
        self.maybe_collect();
        let upvalue = self.heap.new_upvalue(UpvalueState::Open(slot));
        self.open_upvalues.insert(insert_at, OpenUpvalue { slot, upvalue });
        upvalue
    }

    /// Close every open upvalue at or above `last`: copy the stack value
    /// into the upvalue and drop it from the open list.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&open) = self.open_upvalues.first() {
            if open.slot < last {
                break;
            }
            let value = self.stack[open.slot];
            self.heap.upvalue_mut(open.upvalue).state = UpvalueState::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.config.trace_execution {
                let frame = self.frames.last().expect("dispatch with no active frame");
                let chunk = &self.heap.function(frame.function).chunk;
                let (listing, _) = disassemble_instruction(&self.heap, chunk, frame.ip);
                trace!(target: "ember_vm", depth = self.stack.len(), "{listing}");
            }

            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::nil()),
                OpCode::True => self.push(Value::boolean(true)),
                OpCode::False => self.push(Value::boolean(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no frame").slots;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().expect("no frame").slots;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal => {
                    let (name, hash) = self.read_string();
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let message = format!(
                                "Undefined symbol '{}'.",
                                self.heap.string_chars(name)
                            );
                            return Err(self.runtime_error(message));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let (name, hash) = self.read_string();
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let (name, hash) = self.read_string();
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        // The write created the key: undo the probe and fail.
                        self.globals.delete(name, hash);
                        let message =
                            format!("Undefined variable '{}'.", self.heap.string_chars(name));
                        return Err(self.runtime_error(message));
                    }
                }

                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let frame = self.frames.last().expect("no frame");
                    let upvalue = self.heap.closure(frame.closure).upvalues[index];
                    let value = match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let frame = self.frames.last().expect("no frame");
                    let upvalue = self.heap.closure(frame.closure).upvalues[index];
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue).state {
                        UpvalueState::Open(slot) => self.stack[slot] = value,
                        UpvalueState::Closed(_) => {
                            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                OpCode::GetProperty => {
                    let (name, hash) = self.read_string();
                    let receiver = self.peek(0);
                    if !receiver.is_obj()
                        || !matches!(self.heap.get(receiver.as_obj()), Obj::Instance(_))
                    {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let instance = receiver.as_obj();
                    let field = self.heap.instance(instance).fields.get(name, hash);
                    match field {
                        Some(value) => {
                            self.pop();
                            self.push(value);
                        }
                        None => {
                            let class = self.heap.instance(instance).class;
                            self.bind_method(class, name, hash)?;
                        }
                    }
                }
                OpCode::SetProperty => {
                    let (name, hash) = self.read_string();
                    let receiver = self.peek(1);
                    if !receiver.is_obj()
                        || !matches!(self.heap.get(receiver.as_obj()), Obj::Instance(_))
                    {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let instance = receiver.as_obj();
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let (name, hash) = self.read_string();
                    let superclass = self.pop().as_obj();
                    self.bind_method(superclass, name, hash)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(a == b));
                }
                OpCode::Greater | OpCode::Less => self.binary_comparison(op)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract | OpCode::Multiply | OpCode::Divide => {
                    self.binary_arithmetic(op)?
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::boolean(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number"));
                    }
                    let value = self.pop().as_number();
                    self.push(Value::number(-value));
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.heap.value_to_string(value);
                    let _ = writeln!(self.out, "{text}");
                }

                OpCode::Jump => {
                    let offset = self.read_short() as i64;
                    self.jump(offset);
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as i64;
                    if self.peek(0).is_falsey() {
                        self.jump(offset);
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as i64;
                    self.jump(-offset);
                }

                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.peek(argc);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let (name, hash) = self.read_string();
                    let argc = self.read_byte() as usize;
                    self.invoke(name, hash, argc)?;
                }
                OpCode::SuperInvoke => {
                    let (name, hash) = self.read_string();
                    let argc = self.read_byte() as usize;
                    let superclass = self.pop().as_obj();
                    self.invoke_from_class(superclass, name, hash, argc)?;
                }

                OpCode::Closure => {
                    let function = self.read_constant().as_obj();
                    self.maybe_collect();
                    let closure = self.heap.new_closure(function);
                    self.push(Value::object(closure));
                    let upvalue_count = self.heap.function(function).upvalue_count;
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.frames.last().expect("no frame").slots;
                            self.capture_upvalue(base + index)
                        } else {
                            let frame = self.frames.last().expect("no frame");
                            self.heap.closure(frame.closure).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }

                OpCode::ListInit => {
                    let count = self.read_byte() as usize;
                    self.maybe_collect();
                    let list = self.heap.new_list(Vec::with_capacity(count));
                    // Keep the list reachable while items move into it.
                    self.push(Value::object(list));
                    let start = self.stack.len() - 1 - count;
                    for index in 0..count {
                        let item = self.stack[start + index];
                        self.heap.list_mut(list).items.push(item);
                    }
                    self.stack.truncate(start);
                    self.push(Value::object(list));
                }
                OpCode::ListGetIndex => {
                    let index = self.pop();
                    let list = self.pop();
                    let element = self.list_element(list, index)?;
                    self.push(element);
                }
                OpCode::ListSetIndex => {
                    let item = self.pop();
                    let index = self.pop();
                    let list = self.pop();
                    let slot = self.list_index(list, index)?;
                    self.heap.list_mut(list.as_obj()).items[slot] = item;
                    self.push(item);
                }

                OpCode::Class => {
                    let (name, _) = self.read_string();
                    self.maybe_collect();
                    let class = self.heap.new_class(name);
                    self.push(Value::object(class));
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    if !superclass.is_obj()
                        || !matches!(self.heap.get(superclass.as_obj()), Obj::Class(_))
                    {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let subclass = self.peek(0).as_obj();
                    // Copy-down inheritance: methods land on the subclass
                    // before its own METHOD ops can override them.
                    let methods = self.heap.class(superclass.as_obj()).methods.clone();
                    self.heap.class_mut(subclass).methods.extend_from(&methods);
                    self.pop();
                }
                OpCode::Method => {
                    let (name, hash) = self.read_string();
                    let method = self.peek(0);
                    let class = self.peek(1).as_obj();
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return with no active frame");
                    self.close_upvalues(frame.slots);
                    if self.frames.is_empty() {
                        // The script closure is all that is left.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result);
                }
            }
        }
    }

    // =========================================================================
    // Operator helpers
    // =========================================================================

    fn binary_comparison(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operand must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        let result = match op {
            OpCode::Greater => a > b,
            OpCode::Less => a < b,
            _ => unreachable!("binary_comparison only dispatches comparison opcodes"),
        };
        self.push(Value::boolean(result));
        Ok(())
    }

    fn binary_arithmetic(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operand must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        let result = match op {
            OpCode::Subtract => a - b,
            OpCode::Multiply => a * b,
            OpCode::Divide => a / b,
            _ => unreachable!("binary_arithmetic only dispatches arithmetic opcodes"),
        };
        self.push(Value::number(result));
        Ok(())
    }

    /// `+` concatenates two strings or adds two numbers.
    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        if self.heap.is_string(a) && self.heap.is_string(b) {
            let mut text =
                String::with_capacity(self.heap.string_chars(a.as_obj()).len()
                    + self.heap.string_chars(b.as_obj()).len());
            text.push_str(self.heap.string_chars(a.as_obj()));
            text.push_str(self.heap.string_chars(b.as_obj()));
            // Operands stay on the stack across the allocation.
            self.maybe_collect();
            let result = self.heap.intern(&text);
            self.pop();
            self.pop();
            self.push(Value::object(result));
            Ok(())
        } else if a.is_number() && b.is_number() {
            let b = self.pop().as_number();
            let a = self.pop().as_number();
            self.push(Value::number(a + b));
            Ok(())
        } else {
            Err(self.runtime_error("Operands must be two numbers or two strings."))
        }
    }

    /// Shared checks for the list index opcodes; returns the element slot.
    fn list_index(&mut self, list: Value, index: Value) -> Result<usize, RuntimeError> {
        if !self.heap.is_list(list) {
            return Err(self.runtime_error("Invalid type to index into."));
        }
        if !index.is_number() {
            return Err(self.runtime_error("List index is not a number."));
        }
        let slot = index.as_number() as i64;
        let len = self.heap.list(list.as_obj()).items.len() as i64;
        if slot < 0 || slot >= len {
            return Err(self.runtime_error("List index out of range"));
        }
        Ok(slot as usize)
    }

    fn list_element(&mut self, list: Value, index: Value) -> Result<Value, RuntimeError> {
        let slot = self.list_index(list, index)?;
        Ok(self.heap.list(list.as_obj()).items[slot])
    }
}
