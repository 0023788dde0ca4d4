use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ptr::NonNull;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::chunk::Chunk;
use crate::value::Value;

/// Mappa a ordine di inserimento con chiavi internate: l'hash è quello
/// precalcolato della stringa, l'iterazione è deterministica.
pub type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

// ── Gc handle ─────────────────────────────────────────────────────────────

/// Handle stabile verso un oggetto heap. Non possiede l'oggetto: la
/// proprietà è del grafo gestito da `Heap` (alloca, marca, libera).
pub struct Gc<T> {
    ptr: NonNull<T>,
}

impl<T> Gc<T> {
    pub(crate) fn new(ptr: NonNull<T>) -> Self {
        Gc { ptr }
    }

    pub(crate) fn as_ptr(self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub fn ptr_eq(a: Gc<T>, b: Gc<T>) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self { *self }
}
impl<T> Copy for Gc<T> {}

impl<T> Deref for Gc<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: gli oggetti sono liberati solo dallo sweep, e lo sweep
        // libera solo oggetti non raggiungibili da alcuna radice.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<T> Eq for Gc<T> {}

impl Hash for Gc<ObjString> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

// ── Header ────────────────────────────────────────────────────────────────

/// Testata comune a ogni oggetto heap: bit di marcatura del GC e anello
/// della lista di allocazione. Il discriminatore è l'enum `Object`.
pub struct Header {
    pub(crate) marked: Cell<bool>,
    pub(crate) next: Cell<Option<Object>>,
}

impl Header {
    pub(crate) fn new() -> Self {
        Header { marked: Cell::new(false), next: Cell::new(None) }
    }
}

pub(crate) trait HeapObject {
    fn header(&self) -> &Header;
}

macro_rules! impl_heap_object {
    ($($ty:ty),+) => {
        $(impl HeapObject for $ty {
            fn header(&self) -> &Header { &self.header }
        })+
    };
}

// ── Tipi oggetto ──────────────────────────────────────────────────────────

/// Stringa internata: byte, lunghezza e hash FNV-1a precalcolato.
pub struct ObjString {
    pub(crate) header: Header,
    pub hash: u32,
    pub chars: Box<str>,
}

/// Funzione compilata: prodotta dal compilatore, immutabile a runtime.
pub struct ObjFunction {
    pub(crate) header: Header,
    pub arity: u8,
    /// Numero di variabili catturate dichiarate; la sequenza di
    /// descrittori di `MakeClosure` ha esattamente questa lunghezza.
    pub heap_value_count: usize,
    pub chunk: Chunk,
    pub name: Option<Gc<ObjString>>,
}

pub struct ObjClosure {
    pub(crate) header: Header,
    pub function: Gc<ObjFunction>,
    pub heap_values: RefCell<Vec<Gc<ObjHeapValue>>>,
}

pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub(crate) header: Header,
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

/// Cella di una variabile catturata: aperta finché lo slot di stack vive,
/// chiusa (valore copiato dentro) quando il frame si svolge.
#[derive(Debug, Clone, Copy)]
pub enum HeapSlot {
    Open(usize),
    Closed(Value),
}

pub struct ObjHeapValue {
    pub(crate) header: Header,
    pub slot: Cell<HeapSlot>,
    /// Anello della lista dei valori aperti della VM, ordinata per indice
    /// di stack strettamente decrescente.
    pub next_open: Cell<Option<Gc<ObjHeapValue>>>,
}

pub struct ObjClass {
    pub(crate) header: Header,
    pub name: Gc<ObjString>,
    pub methods: RefCell<FxIndexMap<Gc<ObjString>, Value>>,
}

pub struct ObjInstance {
    pub(crate) header: Header,
    pub class: Gc<ObjClass>,
    pub fields: RefCell<FxIndexMap<Gc<ObjString>, Value>>,
}

pub struct ObjBoundMethod {
    pub(crate) header: Header,
    pub receiver: Value,
    pub method: Gc<ObjClosure>,
}

impl_heap_object!(
    ObjString, ObjFunction, ObjClosure, ObjNative,
    ObjHeapValue, ObjClass, ObjInstance, ObjBoundMethod
);

// ── Object: handle discriminato ───────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
pub enum Object {
    String(Gc<ObjString>),
    Function(Gc<ObjFunction>),
    Closure(Gc<ObjClosure>),
    Native(Gc<ObjNative>),
    HeapValue(Gc<ObjHeapValue>),
    Class(Gc<ObjClass>),
    Instance(Gc<ObjInstance>),
    BoundMethod(Gc<ObjBoundMethod>),
}

impl Object {
    pub(crate) fn header(&self) -> &Header {
        match self {
            Object::String(o)      => o.header(),
            Object::Function(o)    => o.header(),
            Object::Closure(o)     => o.header(),
            Object::Native(o)      => o.header(),
            Object::HeapValue(o)   => o.header(),
            Object::Class(o)       => o.header(),
            Object::Instance(o)    => o.header(),
            Object::BoundMethod(o) => o.header(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_)      => "string",
            Object::Function(_)    => "function",
            Object::Closure(_)     => "function",
            Object::Native(_)      => "native function",
            Object::HeapValue(_)   => "heap value",
            Object::Class(_)       => "class",
            Object::Instance(_)    => "instance",
            Object::BoundMethod(_) => "bound method",
        }
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, function: &ObjFunction) -> fmt::Result {
    match function.name {
        Some(name) => write!(f, "<fn {}>", name.chars),
        None => write!(f, "<script>"),
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::String(s)      => write!(f, "{}", s.chars),
            Object::Function(o)    => write_function(f, o),
            Object::Closure(c)     => write_function(f, &c.function),
            Object::Native(n)      => write!(f, "<native fn {}>", n.name),
            Object::HeapValue(_)   => write!(f, "<heap value>"),
            Object::Class(c)       => write!(f, "{}", c.name.chars),
            Object::Instance(i)    => write!(f, "{} instance", i.class.name.chars),
            Object::BoundMethod(b) => write_function(f, &b.method.function),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}
