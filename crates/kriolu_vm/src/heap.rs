use std::mem;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::object::{
    Gc, HeapObject, HeapSlot, Header, NativeFn, ObjBoundMethod, ObjClass, ObjClosure,
    ObjFunction, ObjHeapValue, ObjInstance, ObjNative, ObjString, Object,
};
use crate::table::{hash_string, Table};
use crate::value::Value;

const GC_FIRST_THRESHOLD: usize = 2 * 1024 * 1024;
const GC_GROW_FACTOR: usize = 2;

/// Facciata di allocazione: ogni oggetto passa di qui, aggiorna il
/// contatore di byte e finisce nella lista di allocazione intrusiva.
/// Gli oggetti sono liberati solo dallo sweep (o dal Drop dell'heap).
pub struct Heap {
    head: Option<Object>,
    /// Interner delle stringhe: riferimenti deboli, ripulito prima dello sweep.
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<Object>,
    /// Radici temporanee per valori non ancora raggiungibili da un
    /// contenitore: push prima dell'inserimento, pop dopo.
    temp_roots: Vec<Object>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            head: None,
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: GC_FIRST_THRESHOLD,
            gray: Vec::new(),
            temp_roots: Vec::new(),
        }
    }

    /// `true` quando la prossima allocazione deve essere preceduta da una
    /// collezione. Con `gc-stress` è sempre vero.
    pub fn wants_collection(&self) -> bool {
        cfg!(feature = "gc-stress") || self.bytes_allocated > self.next_gc
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    pub fn push_temp_root(&mut self, object: Object) {
        self.temp_roots.push(object);
    }

    pub fn pop_temp_root(&mut self) {
        self.temp_roots.pop();
    }

    // ── Allocazione ───────────────────────────────────────────────────────

    fn allocate<T: HeapObject>(&mut self, obj: T, wrap: fn(Gc<T>) -> Object) -> Gc<T> {
        let gc = Gc::new(NonNull::from(Box::leak(Box::new(obj))));
        let object = wrap(gc);
        self.bytes_allocated += object_size(object);
        object.header().next.set(self.head);
        self.head = Some(object);
        #[cfg(feature = "gc-trace")]
        eprintln!("-- {:p} allocate {}", gc.as_ptr(), object.type_name());
        gc
    }

    /// Internamento: due sequenze di byte uguali condividono lo stesso
    /// oggetto stringa canonico.
    pub fn intern(&mut self, s: &str) -> Gc<ObjString> {
        let hash = hash_string(s);
        if let Some(existing) = self.strings.find_string(s, hash) {
            return existing;
        }
        let string = self.allocate(
            ObjString { header: Header::new(), hash, chars: s.into() },
            Object::String,
        );
        self.strings.set(string, Value::Nil);
        string
    }

    pub fn alloc_function(
        &mut self,
        arity: u8,
        heap_value_count: usize,
        chunk: Chunk,
        name: Option<Gc<ObjString>>,
    ) -> Gc<ObjFunction> {
        self.allocate(
            ObjFunction { header: Header::new(), arity, heap_value_count, chunk, name },
            Object::Function,
        )
    }

    pub fn alloc_closure(&mut self, function: Gc<ObjFunction>) -> Gc<ObjClosure> {
        let capacity = function.heap_value_count;
        self.allocate(
            ObjClosure {
                header: Header::new(),
                function,
                heap_values: std::cell::RefCell::new(Vec::with_capacity(capacity)),
            },
            Object::Closure,
        )
    }

    pub fn alloc_native(&mut self, name: &'static str, arity: u8, function: NativeFn) -> Gc<ObjNative> {
        self.allocate(
            ObjNative { header: Header::new(), name, arity, function },
            Object::Native,
        )
    }

    pub fn alloc_heap_value(&mut self, slot: HeapSlot) -> Gc<ObjHeapValue> {
        self.allocate(
            ObjHeapValue {
                header: Header::new(),
                slot: std::cell::Cell::new(slot),
                next_open: std::cell::Cell::new(None),
            },
            Object::HeapValue,
        )
    }

    pub fn alloc_class(&mut self, name: Gc<ObjString>) -> Gc<ObjClass> {
        self.allocate(
            ObjClass {
                header: Header::new(),
                name,
                methods: std::cell::RefCell::new(Default::default()),
            },
            Object::Class,
        )
    }

    pub fn alloc_instance(&mut self, class: Gc<ObjClass>) -> Gc<ObjInstance> {
        self.allocate(
            ObjInstance {
                header: Header::new(),
                class,
                fields: std::cell::RefCell::new(Default::default()),
            },
            Object::Instance,
        )
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: Gc<ObjClosure>) -> Gc<ObjBoundMethod> {
        self.allocate(
            ObjBoundMethod { header: Header::new(), receiver, method },
            Object::BoundMethod,
        )
    }

    // ── Collezione: mark / blacken / sweep ────────────────────────────────

    /// Ciclo completo. Le radici esterne (stack, frame, globali, lista dei
    /// valori aperti, funzioni in compilazione) le raccoglie il chiamante;
    /// le radici temporanee dell'heap si aggiungono da sole.
    pub fn collect(&mut self, roots: &[Object]) {
        #[cfg(feature = "gc-trace")]
        let before = self.bytes_allocated;
        #[cfg(feature = "gc-trace")]
        eprintln!("-- gc begin");

        for i in 0..self.temp_roots.len() {
            let object = self.temp_roots[i];
            self.mark_object(object);
        }
        for &root in roots {
            self.mark_object(root);
        }
        self.trace_references();
        self.strings.remove_unmarked();
        self.sweep();
        self.next_gc = (self.bytes_allocated * GC_GROW_FACTOR).max(GC_FIRST_THRESHOLD);

        #[cfg(feature = "gc-trace")]
        eprintln!(
            "-- gc end: {} → {} bytes (next at {})",
            before, self.bytes_allocated, self.next_gc
        );
    }

    /// Grigio: marcato e in attesa nella worklist. Un oggetto già marcato
    /// è grigio o nero, in entrambi i casi non va rivisitato.
    pub fn mark_object(&mut self, object: Object) {
        let header = object.header();
        if header.marked.get() {
            return;
        }
        header.marked.set(true);
        self.gray.push(object);
        #[cfg(feature = "gc-trace")]
        eprintln!("-- mark {:?}", object);
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Object(object) = value {
            self.mark_object(object);
        }
    }

    /// Svuota la worklist: un oggetto estratto e con i figli marcati è
    /// nero per definizione.
    fn trace_references(&mut self) {
        while let Some(object) = self.gray.pop() {
            self.blacken(object);
        }
    }

    fn blacken(&mut self, object: Object) {
        match object {
            Object::String(_) | Object::Native(_) => {}
            Object::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_object(Object::String(name));
                }
                for i in 0..f.chunk.constants.len() {
                    self.mark_value(f.chunk.constants[i]);
                }
            }
            Object::Closure(c) => {
                self.mark_object(Object::Function(c.function));
                let heap_values: Vec<_> = c.heap_values.borrow().clone();
                for hv in heap_values {
                    self.mark_object(Object::HeapValue(hv));
                }
            }
            Object::HeapValue(hv) => {
                // Aperto: lo slot di stack puntato è già una radice.
                if let HeapSlot::Closed(value) = hv.slot.get() {
                    self.mark_value(value);
                }
            }
            Object::Class(c) => {
                self.mark_object(Object::String(c.name));
                let methods: Vec<_> = c.methods.borrow().iter().map(|(k, v)| (*k, *v)).collect();
                for (name, method) in methods {
                    self.mark_object(Object::String(name));
                    self.mark_value(method);
                }
            }
            Object::Instance(i) => {
                self.mark_object(Object::Class(i.class));
                let fields: Vec<_> = i.fields.borrow().iter().map(|(k, v)| (*k, *v)).collect();
                for (name, value) in fields {
                    self.mark_object(Object::String(name));
                    self.mark_value(value);
                }
            }
            Object::BoundMethod(b) => {
                self.mark_value(b.receiver);
                self.mark_object(Object::Closure(b.method));
            }
        }
    }

    /// Scollega e libera ogni oggetto rimasto bianco; azzera il flag dei
    /// sopravvissuti.
    fn sweep(&mut self) {
        let mut prev: Option<Object> = None;
        let mut current = self.head;
        while let Some(object) = current {
            let header = object.header();
            let next = header.next.get();
            if header.marked.get() {
                header.marked.set(false);
                prev = Some(object);
            } else {
                match prev {
                    Some(p) => p.header().next.set(next),
                    None => self.head = next,
                }
                self.free(object);
            }
            current = next;
        }
    }

    fn free(&mut self, object: Object) {
        #[cfg(feature = "gc-trace")]
        eprintln!("-- free {:?}", object);
        self.bytes_allocated = self.bytes_allocated.saturating_sub(object_size(object));
        // SAFETY: l'oggetto è appena stato scollegato dalla lista di
        // allocazione ed è irraggiungibile da ogni radice.
        unsafe {
            match object {
                Object::String(o)      => drop(Box::from_raw(o.as_ptr())),
                Object::Function(o)    => drop(Box::from_raw(o.as_ptr())),
                Object::Closure(o)     => drop(Box::from_raw(o.as_ptr())),
                Object::Native(o)      => drop(Box::from_raw(o.as_ptr())),
                Object::HeapValue(o)   => drop(Box::from_raw(o.as_ptr())),
                Object::Class(o)       => drop(Box::from_raw(o.as_ptr())),
                Object::Instance(o)    => drop(Box::from_raw(o.as_ptr())),
                Object::BoundMethod(o) => drop(Box::from_raw(o.as_ptr())),
            }
        }
    }

    // ── Introspezione per i test ──────────────────────────────────────────

    /// Conta gli oggetti ancora collegati alla lista di allocazione.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while let Some(object) = current {
            count += 1;
            current = object.header().next.get();
        }
        count
    }

    pub fn find_interned(&self, s: &str) -> Option<Gc<ObjString>> {
        self.strings.find_string(s, hash_string(s))
    }
}

impl Default for Heap {
    fn default() -> Self { Self::new() }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head.take();
        while let Some(object) = current {
            current = object.header().next.get();
            self.free(object);
        }
    }
}

/// Stima simmetrica (alloc e free) del peso di un oggetto: dimensione
/// della struct più il payload posseduto che non cambia dopo la nascita.
fn object_size(object: Object) -> usize {
    match object {
        Object::String(s)      => mem::size_of::<ObjString>() + s.chars.len(),
        Object::Function(f)    => {
            mem::size_of::<ObjFunction>()
                + f.chunk.code.len()
                + f.chunk.lines.len() * mem::size_of::<u32>()
                + f.chunk.constants.len() * mem::size_of::<Value>()
        }
        Object::Closure(_)     => mem::size_of::<ObjClosure>(),
        Object::Native(_)      => mem::size_of::<ObjNative>(),
        Object::HeapValue(_)   => mem::size_of::<ObjHeapValue>(),
        Object::Class(_)       => mem::size_of::<ObjClass>(),
        Object::Instance(_)    => mem::size_of::<ObjInstance>(),
        Object::BoundMethod(_) => mem::size_of::<ObjBoundMethod>(),
    }
}
