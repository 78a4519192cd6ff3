//! Stack-based bytecode interpreter. One `Vm` owns the whole heap, the value
//! stack, the call-frame stack, globals, and the two string tables (the
//! content-addressed intern table and the globals table itself).

use crate::chunk::Chunk;
use crate::compiler::Compiler;
use crate::diagnostic::{Diagnostic, TraceFrame};
use crate::disasm::format_value;
use crate::gc;
use crate::heap::{Heap, NativeFn, Obj, ObjBoundMethod, ObjClosure, ObjId, ObjInstance, UpvalueState};
use crate::opcode::Opcode;
use crate::table::{fnv1a_hash, InternTable, Table};
use crate::value::Value;
use thiserror::Error;

const FRAMES_MAX: usize = 64;
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

pub(crate) struct CallFrame {
    pub(crate) closure: ObjId,
    pub(crate) ip: usize,
    pub(crate) slot_base: usize,
}

/// What went wrong, if anything, while interpreting a program. Compile errors
/// surface every diagnostic collected (panic-mode recovery may gather more
/// than one); a runtime error is always exactly one, with its stack trace.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{} compile error(s)", .0.len())]
    Compile(Vec<Diagnostic>),
    #[error("{0}")]
    Runtime(Diagnostic),
}

pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) globals: Table,
    pub(crate) heap: Heap,
    pub(crate) interns: InternTable,
    pub(crate) open_upvalues: Vec<ObjId>,
    pub(crate) init_string: ObjId,
    init_string_hash: u32,
    pub(crate) next_gc: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let mut interns = InternTable::new();
        let init_bytes = b"init";
        let init_string_hash = fnv1a_hash(init_bytes);
        let init_string = heap.alloc(Obj::String { bytes: init_bytes.to_vec(), hash: init_string_hash });
        interns.insert(init_bytes.to_vec(), init_string_hash, init_string);

        let mut vm = Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            heap,
            interns,
            open_upvalues: Vec::new(),
            init_string,
            init_string_hash,
            next_gc: INITIAL_GC_THRESHOLD,
        };
        crate::stdlib::register(&mut vm);
        vm
    }

    /// Compiles and runs one program to completion. Each call starts with a
    /// clean stack and frame list, but keeps the heap, globals, and interned
    /// strings from any prior call — the shape a REPL needs.
    pub fn interpret(&mut self, source: &str) -> Result<(), RunError> {
        let function_id = Compiler::compile(source, &mut self.heap, &mut self.interns).map_err(RunError::Compile)?;
        let closure_id = self.alloc(Obj::Closure(ObjClosure { function: function_id, upvalues: Vec::new() }));
        self.stack.push(Value::Obj(closure_id));
        self.frames.push(CallFrame { closure: closure_id, ip: 0, slot_base: 0 });
        self.run().map_err(RunError::Runtime)
    }

    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjId {
        if self.heap.bytes_allocated > self.next_gc {
            gc::collect(self);
        }
        let id = self.heap.alloc(obj);
        if self.heap.bytes_allocated > self.next_gc {
            self.next_gc = self.heap.bytes_allocated * 2;
        }
        id
    }

    pub(crate) fn define_native(&mut self, name: &str, native: NativeFn) {
        let bytes = name.as_bytes();
        let hash = fnv1a_hash(bytes);
        let name_id = if let Some(id) = self.interns.find(bytes, hash) {
            id
        } else {
            let id = self.heap.alloc(Obj::String { bytes: bytes.to_vec(), hash });
            self.interns.insert(bytes.to_vec(), hash, id);
            id
        };
        let native_id = self.heap.alloc(Obj::Native(native));
        self.globals.set(name_id, hash, Value::Obj(native_id));
    }

    // ---- frame/stack plumbing ----------------------------------------------

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("run() is only called with at least one frame pushed")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run() is only called with at least one frame pushed")
    }

    fn current_chunk(&self) -> &Chunk {
        let closure_id = self.frame().closure;
        let Obj::Closure(closure) = self.heap.get(closure_id) else { unreachable!("frame.closure always names a Closure") };
        let Obj::Function(function) = self.heap.get(closure.function) else { unreachable!("closure.function always names a Function") };
        &function.chunk
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow should be unreachable for compiler-emitted bytecode")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn read_u8(&mut self) -> u8 {
        let ip = self.frame().ip;
        let byte = self.current_chunk().code[ip];
        self.frame_mut().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_u8() as u16;
        let lo = self.read_u8() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_u8();
        self.current_chunk().constants[idx as usize]
    }

    fn read_constant_obj_id(&mut self) -> ObjId {
        match self.read_constant() {
            Value::Obj(id) => id,
            other => unreachable!("expected an object constant, found {other:?}"),
        }
    }

    fn hash_of(&self, id: ObjId) -> u32 {
        match self.heap.get(id) {
            Obj::String { hash, .. } => *hash,
            _ => unreachable!("hash_of is only ever called on string handles"),
        }
    }

    fn string_bytes(&self, id: ObjId) -> &[u8] {
        match self.heap.get(id) {
            Obj::String { bytes, .. } => bytes,
            _ => unreachable!("string_bytes is only ever called on string handles"),
        }
    }

    fn string_text(&self, id: ObjId) -> String {
        String::from_utf8_lossy(self.string_bytes(id)).into_owned()
    }

    fn is_string(&self, id: ObjId) -> bool {
        matches!(self.heap.get(id), Obj::String { .. })
    }

    // ---- the dispatch loop --------------------------------------------------

    fn run(&mut self) -> Result<(), Diagnostic> {
        loop {
            let instruction_start = self.frame().ip;
            let byte = self.read_u8();
            let Some(op) = Opcode::from_u8(byte) else {
                return Err(self.runtime_error(instruction_start, "Unknown opcode."));
            };

            match op {
                Opcode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                Opcode::Null => self.push(Value::Null),
                Opcode::True => self.push(Value::Bool(true)),
                Opcode::False => self.push(Value::Bool(false)),
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::GetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slot_base;
                    self.push(self.stack[base + slot]);
                }
                Opcode::SetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frame().slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                Opcode::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let up_id = self.upvalue_handle(idx);
                    self.push(self.read_upvalue(up_id));
                }
                Opcode::SetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let up_id = self.upvalue_handle(idx);
                    let value = self.peek(0);
                    self.write_upvalue(up_id, value);
                }
                Opcode::GetGlobal => {
                    let name_id = self.read_constant_obj_id();
                    let hash = self.hash_of(name_id);
                    match self.globals.get(name_id, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let name = self.string_text(name_id);
                            return Err(self.runtime_error(instruction_start, format!("Undefined variable '{name}'.")));
                        }
                    }
                }
                Opcode::DefineGlobal => {
                    let name_id = self.read_constant_obj_id();
                    let hash = self.hash_of(name_id);
                    let value = self.pop();
                    self.globals.set(name_id, hash, value);
                }
                Opcode::SetGlobal => {
                    let name_id = self.read_constant_obj_id();
                    let hash = self.hash_of(name_id);
                    let value = self.peek(0);
                    if self.globals.set(name_id, hash, value) {
                        self.globals.delete(name_id, hash);
                        let name = self.string_text(name_id);
                        return Err(self.runtime_error(instruction_start, format!("Undefined variable '{name}'.")));
                    }
                }
                Opcode::GetProperty => self.op_get_property(instruction_start)?,
                Opcode::SetProperty => self.op_set_property(instruction_start)?,
                Opcode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(a, b)));
                }
                Opcode::Greater => self.binary_compare(instruction_start, |a, b| a > b)?,
                Opcode::Less => self.binary_compare(instruction_start, |a, b| a < b)?,
                Opcode::Add => self.op_add(instruction_start)?,
                Opcode::Subtract => self.binary_number(instruction_start, |a, b| a - b)?,
                Opcode::Multiply => self.binary_number(instruction_start, |a, b| a * b)?,
                Opcode::Divide => self.binary_number(instruction_start, |a, b| a / b)?,
                Opcode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Opcode::Negate => match self.peek(0) {
                    Value::Number(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    _ => return Err(self.runtime_error(instruction_start, "Operand must be a number.")),
                },
                Opcode::Print => {
                    let value = self.pop();
                    println!("{}", format_value(&value, &self.heap));
                }
                Opcode::Jump => {
                    let dist = self.read_u16();
                    self.frame_mut().ip += dist as usize;
                }
                Opcode::JumpIfFalse => {
                    let dist = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += dist as usize;
                    }
                }
                Opcode::Loop => {
                    let dist = self.read_u16();
                    self.frame_mut().ip -= dist as usize;
                }
                Opcode::Call => {
                    let argc = self.read_u8();
                    let callee = self.peek(argc as usize);
                    self.call_value(instruction_start, callee, argc)?;
                }
                Opcode::Invoke => {
                    let name_id = self.read_constant_obj_id();
                    let argc = self.read_u8();
                    self.invoke(instruction_start, name_id, argc)?;
                }
                Opcode::SuperInvoke => {
                    let name_id = self.read_constant_obj_id();
                    let argc = self.read_u8();
                    let Value::Obj(super_id) = self.pop() else {
                        unreachable!("the compiler always pushes the superclass before SUPER_INVOKE")
                    };
                    self.invoke_from_class(instruction_start, super_id, name_id, argc)?;
                }
                Opcode::Closure => self.op_closure()?,
                Opcode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                Opcode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("the outermost script frame is never popped by anything but this");
                    self.close_upvalues(frame.slot_base);
                    self.stack.truncate(frame.slot_base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }
                Opcode::Class => {
                    let name_id = self.read_constant_obj_id();
                    let class_id = self.alloc(Obj::Class(crate::heap::ObjClass { name: name_id, methods: Table::new() }));
                    self.push(Value::Obj(class_id));
                }
                Opcode::Inherit => self.op_inherit(instruction_start)?,
                Opcode::Method => {
                    let name_id = self.read_constant_obj_id();
                    let method = self.pop();
                    let Value::Obj(class_id) = self.peek(0) else {
                        unreachable!("the compiler only emits METHOD with a class value on top")
                    };
                    let hash = self.hash_of(name_id);
                    if let Obj::Class(class) = self.heap.get_mut(class_id) {
                        class.methods.set(name_id, hash, method);
                    }
                }
                Opcode::GetSuper => {
                    let name_id = self.read_constant_obj_id();
                    let Value::Obj(super_id) = self.pop() else {
                        unreachable!("the compiler always pushes the superclass before GET_SUPER")
                    };
                    if !self.bind_method(super_id, name_id) {
                        let name = self.string_text(name_id);
                        return Err(self.runtime_error(instruction_start, format!("Undefined property '{name}'.")));
                    }
                }
            }
        }
    }

    // ---- opcode bodies too large to inline in the match --------------------

    fn op_add(&mut self, instruction_start: usize) -> Result<(), Diagnostic> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(_), Value::Number(_)) => self.binary_number(instruction_start, |a, b| a + b),
            (Value::Obj(a_id), Value::Obj(b_id)) if self.is_string(a_id) && self.is_string(b_id) => {
                self.pop();
                self.pop();
                let mut concat = self.string_bytes(a_id).to_vec();
                concat.extend_from_slice(self.string_bytes(b_id));
                let hash = fnv1a_hash(&concat);
                let id = if let Some(existing) = self.interns.find(&concat, hash) {
                    existing
                } else {
                    let id = self.alloc(Obj::String { bytes: concat.clone(), hash });
                    self.interns.insert(concat, hash, id);
                    id
                };
                self.push(Value::Obj(id));
                Ok(())
            }
            _ => Err(self.runtime_error(instruction_start, "Operands must be two numbers or two strings.")),
        }
    }

    fn binary_number(&mut self, instruction_start: usize, f: impl Fn(f64, f64) -> f64) -> Result<(), Diagnostic> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(f(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error(instruction_start, "Operands must be numbers.")),
        }
    }

    fn binary_compare(&mut self, instruction_start: usize, f: impl Fn(f64, f64) -> bool) -> Result<(), Diagnostic> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(f(a, b)));
                Ok(())
            }
            _ => Err(self.runtime_error(instruction_start, "Operands must be numbers.")),
        }
    }

    fn op_get_property(&mut self, instruction_start: usize) -> Result<(), Diagnostic> {
        let name_id = self.read_constant_obj_id();
        let Value::Obj(inst_id) = self.peek(0) else {
            return Err(self.runtime_error(instruction_start, "Only instances have properties."));
        };
        let (class_id, field) = match self.heap.get(inst_id) {
            Obj::Instance(instance) => {
                let hash = self.hash_of(name_id);
                (instance.class, instance.fields.get(name_id, hash))
            }
            _ => return Err(self.runtime_error(instruction_start, "Only instances have properties.")),
        };
        if let Some(value) = field {
            self.pop();
            self.push(value);
        } else if !self.bind_method(class_id, name_id) {
            let name = self.string_text(name_id);
            return Err(self.runtime_error(instruction_start, format!("Undefined property '{name}'.")));
        }
        Ok(())
    }

    fn op_set_property(&mut self, instruction_start: usize) -> Result<(), Diagnostic> {
        let name_id = self.read_constant_obj_id();
        let Value::Obj(inst_id) = self.peek(1) else {
            return Err(self.runtime_error(instruction_start, "Only instances have fields."));
        };
        if !matches!(self.heap.get(inst_id), Obj::Instance(_)) {
            return Err(self.runtime_error(instruction_start, "Only instances have fields."));
        }
        let hash = self.hash_of(name_id);
        let value = self.peek(0);
        if let Obj::Instance(instance) = self.heap.get_mut(inst_id) {
            instance.fields.set(name_id, hash, value);
        }
        let value = self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn bind_method(&mut self, class_id: ObjId, name_id: ObjId) -> bool {
        let hash = self.hash_of(name_id);
        let method = match self.heap.get(class_id) {
            Obj::Class(class) => class.methods.get(name_id, hash),
            _ => unreachable!("bind_method is only ever called with a class handle"),
        };
        match method {
            Some(Value::Obj(method_closure)) => {
                let receiver = self.peek(0);
                let bound_id = self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method: method_closure }));
                self.pop();
                self.push(Value::Obj(bound_id));
                true
            }
            _ => false,
        }
    }

    fn op_inherit(&mut self, instruction_start: usize) -> Result<(), Diagnostic> {
        let Value::Obj(super_id) = self.peek(1) else {
            return Err(self.runtime_error(instruction_start, "Superclass must be a class."));
        };
        if !matches!(self.heap.get(super_id), Obj::Class(_)) {
            return Err(self.runtime_error(instruction_start, "Superclass must be a class."));
        }
        let super_methods = match self.heap.get(super_id) {
            Obj::Class(c) => c.methods.clone(),
            _ => unreachable!(),
        };
        let Value::Obj(sub_id) = self.peek(0) else {
            unreachable!("the compiler only emits INHERIT with a class value on top")
        };
        if let Obj::Class(sub) = self.heap.get_mut(sub_id) {
            super_methods.add_all(&mut sub.methods);
        }
        self.pop(); // discard the subclass; the superclass stays as the 'super' local's slot
        Ok(())
    }

    fn op_closure(&mut self) -> Result<(), Diagnostic> {
        let function_id = self.read_constant_obj_id();
        let upvalue_count = match self.heap.get(function_id) {
            Obj::Function(f) => f.upvalue_count,
            _ => unreachable!("CLOSURE's constant always names a Function"),
        };
        let mut upvalues = Vec::with_capacity(upvalue_count as usize);
        for _ in 0..upvalue_count {
            let is_local = self.read_u8() == 1;
            let index = self.read_u8();
            if is_local {
                let stack_index = self.frame().slot_base + index as usize;
                upvalues.push(self.capture_upvalue(stack_index));
            } else {
                let enclosing = self.frame().closure;
                let Obj::Closure(c) = self.heap.get(enclosing) else { unreachable!() };
                upvalues.push(c.upvalues[index as usize]);
            }
        }
        let closure_id = self.alloc(Obj::Closure(ObjClosure { function: function_id, upvalues }));
        self.push(Value::Obj(closure_id));
        Ok(())
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> ObjId {
        for &id in &self.open_upvalues {
            if let Obj::Upvalue(UpvalueState::Open(idx)) = self.heap.get(id) {
                if *idx == stack_index {
                    return id;
                }
            }
        }
        let id = self.alloc(Obj::Upvalue(UpvalueState::Open(stack_index)));
        self.open_upvalues.push(id);
        let heap = &self.heap;
        self.open_upvalues.sort_by(|a, b| {
            let open_index = |id: &ObjId| match heap.get(*id) {
                Obj::Upvalue(UpvalueState::Open(i)) => *i,
                _ => 0,
            };
            open_index(b).cmp(&open_index(a))
        });
        id
    }

    fn close_upvalues(&mut self, from_index: usize) {
        let open = std::mem::take(&mut self.open_upvalues);
        let mut still_open = Vec::new();
        for id in open {
            let idx = match self.heap.get(id) {
                Obj::Upvalue(UpvalueState::Open(i)) => Some(*i),
                _ => None,
            };
            match idx {
                Some(i) if i >= from_index => {
                    let value = self.stack[i];
                    if let Obj::Upvalue(state) = self.heap.get_mut(id) {
                        *state = UpvalueState::Closed(value);
                    }
                }
                _ => still_open.push(id),
            }
        }
        self.open_upvalues = still_open;
    }

    fn upvalue_handle(&self, index: usize) -> ObjId {
        let closure_id = self.frame().closure;
        match self.heap.get(closure_id) {
            Obj::Closure(c) => c.upvalues[index],
            _ => unreachable!("frame.closure always names a Closure"),
        }
    }

    fn read_upvalue(&self, id: ObjId) -> Value {
        match self.heap.get(id) {
            Obj::Upvalue(UpvalueState::Open(idx)) => self.stack[*idx],
            Obj::Upvalue(UpvalueState::Closed(v)) => *v,
            _ => unreachable!("upvalue handles always name an Upvalue"),
        }
    }

    fn write_upvalue(&mut self, id: ObjId, value: Value) {
        let open_index = match self.heap.get(id) {
            Obj::Upvalue(UpvalueState::Open(idx)) => Some(*idx),
            _ => None,
        };
        if let Some(idx) = open_index {
            self.stack[idx] = value;
        } else if let Obj::Upvalue(state) = self.heap.get_mut(id) {
            *state = UpvalueState::Closed(value);
        }
    }

    fn call_value(&mut self, instruction_start: usize, callee: Value, argc: u8) -> Result<(), Diagnostic> {
        let Value::Obj(id) = callee else {
            return Err(self.runtime_error(instruction_start, "Can only call functions and classes."));
        };
        match self.heap.get(id) {
            Obj::Closure(_) => self.call_closure(instruction_start, id, argc),
            Obj::Native(native) => {
                let native = *native;
                let base = self.stack.len() - argc as usize;
                let args: Vec<Value> = self.stack[base..].to_vec();
                match native(&args) {
                    Ok(result) => {
                        self.stack.truncate(base - 1);
                        self.push(result);
                        Ok(())
                    }
                    Err(message) => Err(self.runtime_error(instruction_start, message)),
                }
            }
            Obj::Class(_) => {
                let instance_id = self.alloc(Obj::Instance(ObjInstance { class: id, fields: Table::new() }));
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = Value::Obj(instance_id);

                let init = match self.heap.get(id) {
                    Obj::Class(class) => class.methods.get(self.init_string, self.init_string_hash),
                    _ => unreachable!(),
                };
                match init {
                    Some(Value::Obj(init_closure)) => self.call_closure(instruction_start, init_closure, argc),
                    None => {
                        if argc != 0 {
                            return Err(self.runtime_error(instruction_start, format!("Expected 0 arguments but got {argc}.")));
                        }
                        Ok(())
                    }
                    Some(_) => unreachable!("a class's methods table only ever stores closures"),
                }
            }
            Obj::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                let base = self.stack.len() - argc as usize - 1;
                self.stack[base] = receiver;
                self.call_closure(instruction_start, method, argc)
            }
            _ => Err(self.runtime_error(instruction_start, "Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, instruction_start: usize, closure_id: ObjId, argc: u8) -> Result<(), Diagnostic> {
        let function_id = match self.heap.get(closure_id) {
            Obj::Closure(c) => c.function,
            _ => unreachable!("call_closure is only ever called with a closure handle"),
        };
        let arity = match self.heap.get(function_id) {
            Obj::Function(f) => f.arity,
            _ => unreachable!(),
        };
        if argc != arity {
            return Err(self.runtime_error(instruction_start, format!("Expected {arity} arguments but got {argc}.")));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error(instruction_start, "Stack overflow."));
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure: closure_id, ip: 0, slot_base });
        Ok(())
    }

    fn invoke(&mut self, instruction_start: usize, name_id: ObjId, argc: u8) -> Result<(), Diagnostic> {
        let Value::Obj(inst_id) = self.peek(argc as usize) else {
            return Err(self.runtime_error(instruction_start, "Only instances have methods."));
        };
        let (class_id, field) = match self.heap.get(inst_id) {
            Obj::Instance(instance) => {
                let hash = self.hash_of(name_id);
                (instance.class, instance.fields.get(name_id, hash))
            }
            _ => return Err(self.runtime_error(instruction_start, "Only instances have methods.")),
        };
        if let Some(value) = field {
            let idx = self.stack.len() - argc as usize - 1;
            self.stack[idx] = value;
            return self.call_value(instruction_start, value, argc);
        }
        self.invoke_from_class(instruction_start, class_id, name_id, argc)
    }

    fn invoke_from_class(&mut self, instruction_start: usize, class_id: ObjId, name_id: ObjId, argc: u8) -> Result<(), Diagnostic> {
        let hash = self.hash_of(name_id);
        let method = match self.heap.get(class_id) {
            Obj::Class(class) => class.methods.get(name_id, hash),
            _ => unreachable!("invoke_from_class is only ever called with a class handle"),
        };
        match method {
            Some(Value::Obj(closure_id)) => self.call_closure(instruction_start, closure_id, argc),
            _ => {
                let name = self.string_text(name_id);
                Err(self.runtime_error(instruction_start, format!("Undefined property '{name}'.")))
            }
        }
    }

    fn runtime_error(&mut self, instruction_start: usize, message: impl Into<String>) -> Diagnostic {
        let message = message.into();
        let top_index = self.frames.len().saturating_sub(1);
        let mut trace = Vec::new();
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let Obj::Closure(closure) = self.heap.get(frame.closure) else { unreachable!() };
            let Obj::Function(function) = self.heap.get(closure.function) else { unreachable!() };
            let offset = if i == top_index { instruction_start } else { frame.ip.saturating_sub(1) };
            let line = *function.chunk.lines.get(offset).unwrap_or(&0);
            let name = match function.name {
                Some(id) => self.string_text(id),
                None => String::new(),
            };
            trace.push(TraceFrame { function: name, line });
        }
        let top_line = trace.first().map(|f| f.line).unwrap_or(0);
        self.stack.clear();
        self.frames.clear();
        Diagnostic::runtime_error(top_line, message, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_globals_round_trip() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var a = 1 + 2 * 3; var b = a - 1;").is_ok());
    }

    #[test]
    fn closures_capture_by_reference_until_the_scope_closes() {
        let mut vm = Vm::new();
        let result = vm.interpret(
            r#"
            fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    return i;
                }
                return count;
            }
            var counter = makeCounter();
            counter();
            counter();
            "#,
        );
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn classes_support_inheritance_and_super_calls() {
        let mut vm = Vm::new();
        let result = vm.interpret(
            r#"
            class Animal {
                speak() { return "..."; }
            }
            class Dog(Animal) {
                speak() { return super.speak(); }
            }
            var d = Dog();
            d.speak();
            "#,
        );
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn undefined_variable_is_a_runtime_error_with_a_trace() {
        let mut vm = Vm::new();
        let err = vm.interpret("print nope;").unwrap_err();
        match err {
            RunError::Runtime(diag) => assert!(diag.message.contains("Undefined variable")),
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("var x = 1; x();").unwrap_err();
        match err {
            RunError::Runtime(diag) => assert!(diag.message.contains("Can only call")),
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn string_concatenation_interns_the_result() {
        let mut vm = Vm::new();
        assert!(vm.interpret(r#"var s = "foo" + "bar"; print s;"#).is_ok());
    }
}
