use std::fmt::Write as _;
use std::mem;

use crate::compiler::Compiler;
use crate::error::{InterpretResult, VmError};
use crate::heap::Heap;
use crate::object::{
    Gc, HeapSlot, NativeFn, ObjClass, ObjClosure, ObjFunction, ObjHeapValue, ObjInstance,
    ObjString, Object,
};
use crate::opcode::Op;
use crate::stdlib;
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

// ── Call frame ────────────────────────────────────────────────────────────

struct CallFrame {
    closure: Gc<ObjClosure>,
    /// Indice in chunk.code della prossima istruzione.
    ip: usize,
    /// Indice nello stack dello slot 0 (chiamato/ricevitore).
    base: usize,
}

// ── Output ────────────────────────────────────────────────────────────────

enum Output {
    Stdout,
    Capture(Vec<String>),
}

// ── VM ────────────────────────────────────────────────────────────────────

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Testa della lista intrusiva dei heap value aperti, ordinata per
    /// indice di stack strettamente decrescente.
    open_heap_values: Option<Gc<ObjHeapValue>>,
    heap: Heap,
    /// "konstrutor" internato una volta sola: la ricerca dell'inizializzatore
    /// è sul percorso caldo dell'istanziazione.
    init_string: Gc<ObjString>,
    output: Output,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_output(Output::Stdout)
    }

    /// VM che accumula l'output di `imprimi` invece di scriverlo su
    /// stdout: è la porta d'ingresso dei test.
    pub fn with_capture() -> Self {
        Self::with_output(Output::Capture(Vec::new()))
    }

    fn with_output(output: Output) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("konstrutor");
        let mut vm = Vm {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_heap_values: None,
            heap,
            init_string,
            output,
        };
        stdlib::register_natives(&mut vm);
        vm
    }

    pub fn take_output(&mut self) -> Vec<String> {
        match &mut self.output {
            Output::Capture(buffer) => mem::take(buffer),
            Output::Stdout => Vec::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // ── Interpretazione ───────────────────────────────────────────────────

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let (function, _ast) = Compiler::compile(source, &mut self.heap);
        let Some(function) = function else {
            return InterpretResult::CompileError;
        };

        self.stack.clear();
        self.frames.clear();
        self.open_heap_values = None;

        // La funzione radice resta sullo stack mentre la closure che la
        // avvolge viene allocata.
        if self.push(Value::Object(Object::Function(function))).is_err() {
            return InterpretResult::RuntimeError;
        }
        let closure = self.alloc_closure(function);
        self.stack.pop();
        if self.push(Value::Object(Object::Closure(closure))).is_err() {
            return InterpretResult::RuntimeError;
        }
        self.frames.push(CallFrame { closure, ip: 0, base: 0 });

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(e) => {
                self.report_runtime_error(&e);
                InterpretResult::RuntimeError
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    fn run(&mut self) -> Result<(), VmError> {
        loop {
            let byte = self.read_byte()?;
            let op = Op::from_u8(byte).ok_or(VmError::UnknownOpcode(byte))?;
            match op {
                Op::PushConstant => {
                    let index = self.read_byte()? as usize;
                    let value = self.constant(index)?;
                    self.push(value)?;
                }
                Op::PushConstantLong => {
                    let index = self.read_u24()?;
                    let value = self.constant(index)?;
                    self.push(value)?;
                }
                Op::PushNil => self.push(Value::Nil)?,
                Op::PushTrue => self.push(Value::Boolean(true))?,
                Op::PushFalse => self.push(Value::Boolean(false))?,
                Op::Pop => {
                    self.pop()?;
                }

                // ── Aritmetica / logica ───────────────────────────────────
                Op::Add => self.add()?,
                Op::Subtract => self.binary_number(|a, b| a - b)?,
                Op::Multiply => self.binary_number(|a, b| a * b)?,
                // Divisione per zero: inf/nan IEEE, nessun errore.
                Op::Divide => self.binary_number(|a, b| a / b)?,
                Op::Power => self.binary_number(f64::powf)?,
                Op::Negate => {
                    if !self.peek(0)?.is_number() {
                        return Err(VmError::OperandNotNumber);
                    }
                    let n = self.pop()?.as_number().unwrap_or(0.0);
                    self.push(Value::Number(-n))?;
                }
                Op::Not => {
                    let value = self.pop()?;
                    self.push(Value::Boolean(value.is_falsey()))?;
                }
                Op::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Boolean(a == b))?;
                }
                Op::Greater => self.binary_compare(|a, b| a > b)?,
                Op::Less => self.binary_compare(|a, b| a < b)?,

                // ── I/O ───────────────────────────────────────────────────
                Op::Print => {
                    let value = self.pop()?;
                    self.write_line(value.to_string());
                }
                Op::Interpolate => {
                    let count = self.read_byte()? as usize;
                    let start = self
                        .stack
                        .len()
                        .checked_sub(count)
                        .ok_or(VmError::StackUnderflow)?;
                    let mut text = String::new();
                    for value in &self.stack[start..] {
                        let _ = write!(text, "{}", value);
                    }
                    let string = self.intern(&text);
                    self.stack.truncate(start);
                    self.push(Value::Object(Object::String(string)))?;
                }

                // ── Variabili ─────────────────────────────────────────────
                Op::DefineGlobal => {
                    let name = self.read_string_constant()?;
                    let value = self.peek(0)?;
                    self.globals.set(name, value);
                    self.pop()?;
                }
                Op::ReadGlobal => {
                    let name = self.read_string_constant()?;
                    match self.globals.get(name) {
                        Some(value) => self.push(value)?,
                        None => return Err(VmError::UndefinedVariable(name.chars.to_string())),
                    }
                }
                Op::AssignGlobal => {
                    let name = self.read_string_constant()?;
                    let value = self.peek(0)?;
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        return Err(VmError::UndefinedVariable(name.chars.to_string()));
                    }
                }
                Op::LocalRead => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame().base;
                    let value = *self
                        .stack
                        .get(base + slot)
                        .ok_or(VmError::StackUnderflow)?;
                    self.push(value)?;
                }
                Op::LocalWrite => {
                    let slot = self.read_byte()? as usize;
                    let base = self.frame().base;
                    let value = self.peek(0)?;
                    *self
                        .stack
                        .get_mut(base + slot)
                        .ok_or(VmError::StackUnderflow)? = value;
                }
                Op::CapturedRead => {
                    let index = self.read_byte()? as usize;
                    let heap_value = self.captured(index)?;
                    let value = match heap_value.slot.get() {
                        HeapSlot::Open(slot) => {
                            *self.stack.get(slot).ok_or(VmError::StackUnderflow)?
                        }
                        HeapSlot::Closed(value) => value,
                    };
                    self.push(value)?;
                }
                Op::CapturedWrite => {
                    let index = self.read_byte()? as usize;
                    let heap_value = self.captured(index)?;
                    let value = self.peek(0)?;
                    match heap_value.slot.get() {
                        HeapSlot::Open(slot) => {
                            *self.stack.get_mut(slot).ok_or(VmError::StackUnderflow)? = value;
                        }
                        HeapSlot::Closed(_) => heap_value.slot.set(HeapSlot::Closed(value)),
                    }
                }

                // ── Salti ─────────────────────────────────────────────────
                Op::Jump => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut().ip += offset;
                }
                Op::JumpIfFalse => {
                    let offset = self.read_u16()? as usize;
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += offset;
                    }
                }
                Op::Loop => {
                    let offset = self.read_u16()? as usize;
                    self.frame_mut().ip -= offset;
                }

                // ── Chiamate / closure ────────────────────────────────────
                Op::Call => {
                    let argc = self.read_byte()?;
                    let callee = self.peek(argc as usize)?;
                    self.call_value(callee, argc)?;
                }
                Op::CallClass => {
                    let argc = self.read_byte()?;
                    let callee = self.peek(argc as usize)?;
                    match callee {
                        Value::Object(Object::Class(class)) => self.instantiate(class, argc)?,
                        _ => return Err(VmError::NotAClass),
                    }
                }
                Op::MakeClosure => {
                    let index = self.read_byte()? as usize;
                    let Value::Object(Object::Function(function)) = self.constant(index)? else {
                        return Err(VmError::CorruptBytecode);
                    };
                    let closure = self.alloc_closure(function);
                    // Subito sullo stack: le catture possono allocare.
                    self.push(Value::Object(Object::Closure(closure)))?;
                    for _ in 0..function.heap_value_count {
                        let from_parent_stack = self.read_byte()? == 1;
                        let index = self.read_byte()? as usize;
                        let heap_value = if from_parent_stack {
                            let slot = self.frame().base + index;
                            self.capture_heap_value(slot)
                        } else {
                            self.captured(index)?
                        };
                        closure.heap_values.borrow_mut().push(heap_value);
                    }
                }
                Op::CloseHeapValue => {
                    let top = self.stack.len().saturating_sub(1);
                    self.close_heap_values(top);
                    self.pop()?;
                }
                Op::Return => {
                    let result = self.pop()?;
                    let frame = self.frames.pop().ok_or(VmError::StackUnderflow)?;
                    self.close_heap_values(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result)?;
                }

                // ── Classi ────────────────────────────────────────────────
                Op::Class => {
                    let name = self.read_string_constant()?;
                    let class = self.alloc_class(name);
                    self.push(Value::Object(Object::Class(class)))?;
                }
                Op::Inherit => {
                    let Value::Object(Object::Class(parent)) = self.peek(0)? else {
                        return Err(VmError::SuperclassNotAClass);
                    };
                    let Value::Object(Object::Class(child)) = self.peek(1)? else {
                        return Err(VmError::CorruptBytecode);
                    };
                    {
                        let parent_methods = parent.methods.borrow();
                        let mut child_methods = child.methods.borrow_mut();
                        for (name, method) in parent_methods.iter() {
                            child_methods.insert(*name, *method);
                        }
                    }
                    self.pop()?;
                }
                Op::Method => {
                    let name = self.read_string_constant()?;
                    let method = self.peek(0)?;
                    let Value::Object(Object::Class(class)) = self.peek(1)? else {
                        return Err(VmError::CorruptBytecode);
                    };
                    class.methods.borrow_mut().insert(name, method);
                    self.pop()?;
                }
                Op::GetProperty => {
                    let name = self.read_string_constant()?;
                    let Value::Object(Object::Instance(instance)) = self.peek(0)? else {
                        return Err(VmError::PropertyOnNonInstance);
                    };
                    let field = instance.fields.borrow().get(&name).copied();
                    match field {
                        Some(value) => {
                            self.pop()?;
                            self.push(value)?;
                        }
                        None => self.bind_method(instance.class, name)?,
                    }
                }
                Op::SetProperty => {
                    let name = self.read_string_constant()?;
                    let Value::Object(Object::Instance(instance)) = self.peek(1)? else {
                        return Err(VmError::FieldOnNonInstance);
                    };
                    let value = self.pop()?;
                    instance.fields.borrow_mut().insert(name, value);
                    self.pop()?;
                    self.push(value)?;
                }
                Op::Invoke => {
                    let name = self.read_string_constant()?;
                    let argc = self.read_byte()?;
                    self.invoke(name, argc)?;
                }
                Op::GetSuper => {
                    let name = self.read_string_constant()?;
                    let Value::Object(Object::Class(superclass)) = self.pop()? else {
                        return Err(VmError::CorruptBytecode);
                    };
                    self.bind_method(superclass, name)?;
                }
                Op::InvokeSuper => {
                    let name = self.read_string_constant()?;
                    let argc = self.read_byte()?;
                    let Value::Object(Object::Class(superclass)) = self.pop()? else {
                        return Err(VmError::CorruptBytecode);
                    };
                    self.invoke_from_class(superclass, name, argc)?;
                }

                // Punto di aggancio del debugger interattivo.
                Op::DebuggerBreak => {}
            }
        }
    }

    // ── Lettura del frame corrente ────────────────────────────────────────

    fn frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn read_byte(&mut self) -> Result<u8, VmError> {
        let frame = self.frames.last_mut().ok_or(VmError::StackUnderflow)?;
        let closure = frame.closure;
        let byte = *closure
            .function
            .chunk
            .code
            .get(frame.ip)
            .ok_or(VmError::CorruptBytecode)?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, VmError> {
        let high = self.read_byte()? as u16;
        let low = self.read_byte()? as u16;
        Ok((high << 8) | low)
    }

    fn read_u24(&mut self) -> Result<usize, VmError> {
        let high = self.read_byte()? as usize;
        let mid = self.read_byte()? as usize;
        let low = self.read_byte()? as usize;
        Ok((high << 16) | (mid << 8) | low)
    }

    fn constant(&self, index: usize) -> Result<Value, VmError> {
        self.frame()
            .closure
            .function
            .chunk
            .constants
            .get(index)
            .copied()
            .ok_or(VmError::CorruptBytecode)
    }

    fn read_string_constant(&mut self) -> Result<Gc<ObjString>, VmError> {
        let index = self.read_byte()? as usize;
        self.constant(index)?
            .as_string()
            .ok_or(VmError::CorruptBytecode)
    }

    fn captured(&self, index: usize) -> Result<Gc<ObjHeapValue>, VmError> {
        self.frame()
            .closure
            .heap_values
            .borrow()
            .get(index)
            .copied()
            .ok_or(VmError::CorruptBytecode)
    }

    // ── Stack ─────────────────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= STACK_MAX {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn peek(&self, depth: usize) -> Result<Value, VmError> {
        let len = self.stack.len();
        self.stack
            .get(len.checked_sub(depth + 1).ok_or(VmError::StackUnderflow)?)
            .copied()
            .ok_or(VmError::StackUnderflow)
    }

    // ── Operazioni numeriche ──────────────────────────────────────────────

    fn binary_number(&mut self, f: fn(f64, f64) -> f64) -> Result<(), VmError> {
        if !self.peek(0)?.is_number() || !self.peek(1)?.is_number() {
            return Err(VmError::OperandsNotNumbers);
        }
        let b = self.pop()?.as_number().unwrap_or(0.0);
        let a = self.pop()?.as_number().unwrap_or(0.0);
        self.push(Value::Number(f(a, b)))
    }

    fn binary_compare(&mut self, f: fn(f64, f64) -> bool) -> Result<(), VmError> {
        if !self.peek(0)?.is_number() || !self.peek(1)?.is_number() {
            return Err(VmError::OperandsNotNumbers);
        }
        let b = self.pop()?.as_number().unwrap_or(0.0);
        let a = self.pop()?.as_number().unwrap_or(0.0);
        self.push(Value::Boolean(f(a, b)))
    }

    /// Somma numerica o concatenazione di stringhe. Gli operandi restano
    /// sullo stack finché il risultato non è allocato.
    fn add(&mut self) -> Result<(), VmError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        match (a.as_string(), b.as_string()) {
            (Some(left), Some(right)) => {
                let mut text = String::with_capacity(left.chars.len() + right.chars.len());
                text.push_str(&left.chars);
                text.push_str(&right.chars);
                let string = self.intern(&text);
                self.pop()?;
                self.pop()?;
                self.push(Value::Object(Object::String(string)))
            }
            _ if a.is_number() && b.is_number() => {
                let b = self.pop()?.as_number().unwrap_or(0.0);
                let a = self.pop()?.as_number().unwrap_or(0.0);
                self.push(Value::Number(a + b))
            }
            _ => Err(VmError::AddTypeMismatch),
        }
    }

    // ── Chiamate ──────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), VmError> {
        match callee {
            Value::Object(Object::Closure(closure)) => self.call_closure(closure, argc),
            Value::Object(Object::BoundMethod(bound)) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = bound.receiver;
                self.call_closure(bound.method, argc)
            }
            Value::Object(Object::Class(class)) => self.instantiate(class, argc),
            Value::Object(Object::Native(native)) => {
                if argc != native.arity {
                    return Err(VmError::ArityMismatch { expected: native.arity, got: argc });
                }
                let start = self.stack.len() - argc as usize;
                let result = (native.function)(&self.stack[start..]).map_err(VmError::Native)?;
                self.stack.truncate(start - 1);
                self.push(result)
            }
            _ => Err(VmError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Gc<ObjClosure>, argc: u8) -> Result<(), VmError> {
        if argc != closure.function.arity {
            return Err(VmError::ArityMismatch { expected: closure.function.arity, got: argc });
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(VmError::StackOverflow);
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    fn instantiate(&mut self, class: Gc<ObjClass>, argc: u8) -> Result<(), VmError> {
        let instance = self.alloc_instance(class);
        let slot = self.stack.len() - argc as usize - 1;
        self.stack[slot] = Value::Object(Object::Instance(instance));

        let initializer = class.methods.borrow().get(&self.init_string).copied();
        match initializer {
            Some(Value::Object(Object::Closure(closure))) => self.call_closure(closure, argc),
            Some(_) => Err(VmError::CorruptBytecode),
            None if argc != 0 => Err(VmError::ArityMismatch { expected: 0, got: argc }),
            None => Ok(()),
        }
    }

    fn invoke(&mut self, name: Gc<ObjString>, argc: u8) -> Result<(), VmError> {
        let Value::Object(Object::Instance(instance)) = self.peek(argc as usize)? else {
            return Err(VmError::MethodOnNonInstance);
        };
        // Un campo può ombrare un metodo e contenere qualunque callable.
        let field = instance.fields.borrow().get(&name).copied();
        if let Some(field) = field {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }
        self.invoke_from_class(instance.class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: Gc<ObjClass>,
        name: Gc<ObjString>,
        argc: u8,
    ) -> Result<(), VmError> {
        let Some(method) = class.methods.borrow().get(&name).copied() else {
            return Err(VmError::UndefinedProperty(name.chars.to_string()));
        };
        let Value::Object(Object::Closure(closure)) = method else {
            return Err(VmError::CorruptBytecode);
        };
        self.call_closure(closure, argc)
    }

    fn bind_method(&mut self, class: Gc<ObjClass>, name: Gc<ObjString>) -> Result<(), VmError> {
        let Some(method) = class.methods.borrow().get(&name).copied() else {
            return Err(VmError::UndefinedProperty(name.chars.to_string()));
        };
        let Value::Object(Object::Closure(closure)) = method else {
            return Err(VmError::CorruptBytecode);
        };
        let receiver = self.peek(0)?;
        let bound = self.alloc_bound_method(receiver, closure);
        self.pop()?;
        self.push(Value::Object(Object::BoundMethod(bound)))
    }

    // ── Heap value aperti ─────────────────────────────────────────────────

    /// Cattura lo slot: riusa il heap value aperto che già lo punta, o ne
    /// inserisce uno nuovo mantenendo l'ordinamento decrescente.
    fn capture_heap_value(&mut self, slot: usize) -> Gc<ObjHeapValue> {
        let mut prev: Option<Gc<ObjHeapValue>> = None;
        let mut current = self.open_heap_values;
        while let Some(heap_value) = current {
            match heap_value.slot.get() {
                HeapSlot::Open(open_slot) if open_slot > slot => {
                    prev = Some(heap_value);
                    current = heap_value.next_open.get();
                }
                HeapSlot::Open(open_slot) if open_slot == slot => return heap_value,
                _ => break,
            }
        }

        let created = self.alloc_heap_value(HeapSlot::Open(slot));
        created.next_open.set(current);
        match prev {
            Some(prev) => prev.next_open.set(Some(created)),
            None => self.open_heap_values = Some(created),
        }
        created
    }

    /// Chiude ogni heap value aperto con slot ≥ `from`: copia il valore
    /// vivo dentro la cella e lo toglie dalla lista aperta.
    fn close_heap_values(&mut self, from: usize) {
        while let Some(heap_value) = self.open_heap_values {
            let HeapSlot::Open(slot) = heap_value.slot.get() else {
                break;
            };
            if slot < from {
                break;
            }
            let value = self.stack.get(slot).copied().unwrap_or(Value::Nil);
            heap_value.slot.set(HeapSlot::Closed(value));
            self.open_heap_values = heap_value.next_open.get();
            heap_value.next_open.set(None);
        }
    }

    // ── Allocazione con radici della VM ───────────────────────────────────

    fn maybe_collect(&mut self) {
        if self.heap.wants_collection() {
            self.collect_garbage();
        }
    }

    /// Collezione forzata con le radici correnti della VM.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Object> = Vec::new();
        for value in &self.stack {
            if let Value::Object(object) = value {
                roots.push(*object);
            }
        }
        for frame in &self.frames {
            roots.push(Object::Closure(frame.closure));
        }
        let mut open = self.open_heap_values;
        while let Some(heap_value) = open {
            roots.push(Object::HeapValue(heap_value));
            open = heap_value.next_open.get();
        }
        for (key, value) in self.globals.iter() {
            roots.push(Object::String(key));
            if let Value::Object(object) = value {
                roots.push(object);
            }
        }
        roots.push(Object::String(self.init_string));
        self.heap.collect(&roots);
    }

    fn intern(&mut self, s: &str) -> Gc<ObjString> {
        self.maybe_collect();
        self.heap.intern(s)
    }

    fn alloc_closure(&mut self, function: Gc<ObjFunction>) -> Gc<ObjClosure> {
        self.maybe_collect();
        self.heap.alloc_closure(function)
    }

    fn alloc_heap_value(&mut self, slot: HeapSlot) -> Gc<ObjHeapValue> {
        self.maybe_collect();
        self.heap.alloc_heap_value(slot)
    }

    fn alloc_class(&mut self, name: Gc<ObjString>) -> Gc<ObjClass> {
        self.maybe_collect();
        self.heap.alloc_class(name)
    }

    fn alloc_instance(&mut self, class: Gc<ObjClass>) -> Gc<ObjInstance> {
        self.maybe_collect();
        self.heap.alloc_instance(class)
    }

    fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: Gc<ObjClosure>,
    ) -> Gc<crate::object::ObjBoundMethod> {
        self.maybe_collect();
        self.heap.alloc_bound_method(receiver, method)
    }

    pub(crate) fn define_native(&mut self, name: &'static str, arity: u8, function: NativeFn) {
        let name_string = self.intern(name);
        self.heap.push_temp_root(Object::String(name_string));
        self.maybe_collect();
        let native = self.heap.alloc_native(name, arity, function);
        self.globals.set(name_string, Value::Object(Object::Native(native)));
        self.heap.pop_temp_root();
    }

    // ── Output / errori ───────────────────────────────────────────────────

    fn write_line(&mut self, line: String) {
        match &mut self.output {
            Output::Stdout => println!("{}", line),
            Output::Capture(buffer) => buffer.push(line),
        }
    }

    fn report_runtime_error(&mut self, error: &VmError) {
        eprintln!("{}", error);
        for frame in self.frames.iter().rev() {
            let function = frame.closure.function;
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            match function.name {
                Some(name) => eprintln!("[line {}] in {}()", line, name.chars),
                None => eprintln!("[line {}] in script", line),
            }
        }
        self.stack.clear();
        self.frames.clear();
        self.open_heap_values = None;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
