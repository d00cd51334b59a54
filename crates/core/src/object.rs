//! Heap object model
//!
//! Every garbage-collected object lives in one slot arena owned by the
//! [`Heap`]. Handles ([`ObjRef`]) are plain indices: the collector only
//! frees slots that are unreachable from the roots, so a handle held by
//! live code can never observe a freed slot. Freed slots are recycled
//! through a free list.
//!
//! The heap also owns the interned-string set. Interning makes string
//! equality collapse to handle identity, which is what lets the hash
//! tables probe by identity alone.

use std::fmt::Write as _;

use crate::chunk::Chunk;
use crate::table::{Table, hash_bytes};
use crate::value::Value;

/// Handle to a heap object: an index into the heap's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Placeholder for unreachable extractor arms; never a live slot.
    pub const DANGLING: ObjRef = ObjRef(u32::MAX);

    #[inline]
    pub fn new(index: u32) -> Self {
        ObjRef(index)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// An interned immutable string plus its FNV-1a hash.
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

/// What a function compiles for; decides slot 0 and the implicit return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A compiled function: its bytecode plus the call contract.
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// Interned name; `None` for the top-level script.
    pub name: Option<ObjRef>,
}

impl ObjFunction {
    pub fn new(name: Option<ObjRef>) -> Self {
        ObjFunction { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name }
    }
}

/// Host function: receives the heap (lists mutate through it) and the
/// argument window; an `Err` becomes a runtime error in the caller.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

pub struct ObjNative {
    pub function: NativeFn,
}

/// A function together with its captured upvalues.
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// An upvalue is open while its variable still lives on the VM stack, and
/// owns the value after the stack slot is gone. Never both.
#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: UpvalueState,
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method plucked off an instance: carries its receiver with it.
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

pub struct ObjList {
    pub items: Vec<Value>,
}

pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    List(ObjList),
}

enum Slot {
    Free,
    Used { marked: bool, obj: Obj },
}

/// Initial collection threshold: 1 MiB of tracked allocation.
const FIRST_GC_AT: usize = 1024 * 1024;

/// After a collection the threshold doubles over what survived.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// The managed heap: slot arena, free list, interned strings, and the
/// allocation accounting that drives collection.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    strings: Table,
    bytes_allocated: usize,
    next_gc: usize,
    /// Gray worklist, kept allocated between collections.
    pub(crate) gray: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_AT,
            gray: Vec::new(),
        }
    }

    /// Tracked allocation since the last sweep.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// True when the next growing allocation should collect first.
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    pub(crate) fn set_next_gc(&mut self, next: usize) {
        self.next_gc = next;
    }

    /// Number of live objects; sweep-phase bookkeeping and tests.
    pub fn live_objects(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Used { .. }))
            .count()
    }

    fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += Self::obj_size(&obj);
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Slot::Used { marked: false, obj };
                ObjRef(index)
            }
            None => {
                self.slots.push(Slot::Used { marked: false, obj });
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Rough per-object footprint used for the collection trigger.
    fn obj_size(obj: &Obj) -> usize {
        let payload = match obj {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.len() + f.chunk.lines.len() * 4 + f.chunk.constants.len() * 16
            }
            Obj::Closure(c) => c.upvalues.len() * 4,
            Obj::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
            Obj::Native(_)
            | Obj::Upvalue(_)
            | Obj::Class(_)
            | Obj::Instance(_)
            | Obj::BoundMethod(_) => 0,
        };
        std::mem::size_of::<Obj>() + payload
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Intern a string: return the existing representative or allocate one.
    pub fn intern(&mut self, text: &str) -> ObjRef {
        let hash = hash_bytes(text.as_bytes());
        let Heap { slots, strings, .. } = self;
        let found = strings.find_string(hash, |key| {
            match &slots[key.index() as usize] {
                Slot::Used { obj: Obj::String(s), .. } => {
                    s.hash == hash && s.chars.as_ref() == text
                }
                _ => false,
            }
        });
        if let Some(existing) = found {
            return existing;
        }
        let obj = self.alloc(Obj::String(ObjString { chars: text.into(), hash }));
        self.strings.set(obj, hash, Value::nil());
        obj
    }

    pub fn new_function(&mut self, function: ObjFunction) -> ObjRef {
        self.alloc(Obj::Function(function))
    }

    pub fn new_native(&mut self, function: NativeFn) -> ObjRef {
        self.alloc(Obj::Native(ObjNative { function }))
    }

    pub fn new_closure(&mut self, function: ObjRef) -> ObjRef {
        let upvalue_count = self.function(function).upvalue_count;
        self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }))
    }

    pub fn new_upvalue(&mut self, state: UpvalueState) -> ObjRef {
        self.alloc(Obj::Upvalue(ObjUpvalue { state }))
    }

    pub fn new_class(&mut self, name: ObjRef) -> ObjRef {
        self.alloc(Obj::Class(ObjClass { name, methods: Table::new() }))
    }

    pub fn new_instance(&mut self, class: ObjRef) -> ObjRef {
        self.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }))
    }

    pub fn new_bound_method(&mut self, receiver: Value, method: ObjRef) -> ObjRef {
        self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method }))
    }

    pub fn new_list(&mut self, items: Vec<Value>) -> ObjRef {
        self.alloc(Obj::List(ObjList { items }))
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn get(&self, obj: ObjRef) -> &Obj {
        match &self.slots[obj.index() as usize] {
            Slot::Used { obj, .. } => obj,
            Slot::Free => panic!("dereference of freed object slot {}", obj.index()),
        }
    }

    pub fn get_mut(&mut self, obj: ObjRef) -> &mut Obj {
        match &mut self.slots[obj.index() as usize] {
            Slot::Used { obj, .. } => obj,
            Slot::Free => panic!("dereference of freed object slot {}", obj.index()),
        }
    }

    pub fn string(&self, obj: ObjRef) -> &ObjString {
        match self.get(obj) {
            Obj::String(s) => s,
            _ => panic!("object {} is not a string", obj.index()),
        }
    }

    pub fn string_chars(&self, obj: ObjRef) -> &str {
        &self.string(obj).chars
    }

    pub fn function(&self, obj: ObjRef) -> &ObjFunction {
        match self.get(obj) {
            Obj::Function(f) => f,
            _ => panic!("object {} is not a function", obj.index()),
        }
    }

    pub fn function_mut(&mut self, obj: ObjRef) -> &mut ObjFunction {
        match self.get_mut(obj) {
            Obj::Function(f) => f,
            _ => panic!("object {} is not a function", obj.index()),
        }
    }

    pub fn closure(&self, obj: ObjRef) -> &ObjClosure {
        match self.get(obj) {
            Obj::Closure(c) => c,
            _ => panic!("object {} is not a closure", obj.index()),
        }
    }

    pub fn closure_mut(&mut self, obj: ObjRef) -> &mut ObjClosure {
        match self.get_mut(obj) {
            Obj::Closure(c) => c,
            _ => panic!("object {} is not a closure", obj.index()),
        }
    }

    pub fn upvalue(&self, obj: ObjRef) -> &ObjUpvalue {
        match self.get(obj) {
            Obj::Upvalue(u) => u,
            _ => panic!("object {} is not an upvalue", obj.index()),
        }
    }

    pub fn upvalue_mut(&mut self, obj: ObjRef) -> &mut ObjUpvalue {
        match self.get_mut(obj) {
            Obj::Upvalue(u) => u,
            _ => panic!("object {} is not an upvalue", obj.index()),
        }
    }

    pub fn class(&self, obj: ObjRef) -> &ObjClass {
        match self.get(obj) {
            Obj::Class(c) => c,
            _ => panic!("object {} is not a class", obj.index()),
        }
    }

    pub fn class_mut(&mut self, obj: ObjRef) -> &mut ObjClass {
        match self.get_mut(obj) {
            Obj::Class(c) => c,
            _ => panic!("object {} is not a class", obj.index()),
        }
    }

    pub fn instance(&self, obj: ObjRef) -> &ObjInstance {
        match self.get(obj) {
            Obj::Instance(i) => i,
            _ => panic!("object {} is not an instance", obj.index()),
        }
    }

    pub fn instance_mut(&mut self, obj: ObjRef) -> &mut ObjInstance {
        match self.get_mut(obj) {
            Obj::Instance(i) => i,
            _ => panic!("object {} is not an instance", obj.index()),
        }
    }

    pub fn list(&self, obj: ObjRef) -> &ObjList {
        match self.get(obj) {
            Obj::List(l) => l,
            _ => panic!("object {} is not a list", obj.index()),
        }
    }

    pub fn list_mut(&mut self, obj: ObjRef) -> &mut ObjList {
        match self.get_mut(obj) {
            Obj::List(l) => l,
            _ => panic!("object {} is not a list", obj.index()),
        }
    }

    pub fn is_string(&self, value: Value) -> bool {
        value.is_obj() && matches!(self.get(value.as_obj()), Obj::String(_))
    }

    pub fn is_list(&self, value: Value) -> bool {
        value.is_obj() && matches!(self.get(value.as_obj()), Obj::List(_))
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Render a value the way `print` shows it.
    pub fn value_to_string(&self, value: Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value);
        out
    }

    fn write_value(&self, out: &mut String, value: Value) {
        if value.is_nil() {
            out.push_str("nil");
        } else if value.is_bool() {
            let _ = write!(out, "{}", value.as_bool());
        } else if value.is_number() {
            let _ = write!(out, "{}", format_number(value.as_number()));
        } else {
            self.write_object(out, value.as_obj());
        }
    }

    fn write_object(&self, out: &mut String, obj: ObjRef) {
        match self.get(obj) {
            Obj::String(s) => out.push_str(&s.chars),
            Obj::Function(f) => self.write_function(out, f),
            Obj::Native(_) => out.push_str("<native fn>"),
            Obj::Closure(c) => {
                let f = self.function(c.function);
                self.write_function(out, f);
            }
            Obj::Upvalue(_) => out.push_str("upvalue"),
            Obj::Class(c) => out.push_str(self.string_chars(c.name)),
            Obj::Instance(i) => {
                out.push_str(self.string_chars(self.class(i.class).name));
                out.push_str(" instance");
            }
            Obj::BoundMethod(b) => {
                let f = self.function(self.closure(b.method).function);
                self.write_function(out, f);
            }
            Obj::List(l) => {
                out.push('[');
                for (i, &item) in l.items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(out, item);
                }
                out.push(']');
            }
        }
    }

    fn write_function(&self, out: &mut String, f: &ObjFunction) {
        match f.name {
            Some(name) => {
                let _ = write!(out, "<fn {}>", self.string_chars(name));
            }
            None => out.push_str("<script>"),
        }
    }

    // =========================================================================
    // Collector plumbing (phases live in gc.rs)
    // =========================================================================

    pub(crate) fn is_marked(&self, obj: ObjRef) -> bool {
        match &self.slots[obj.index() as usize] {
            Slot::Used { marked, .. } => *marked,
            Slot::Free => false,
        }
    }

    pub(crate) fn set_marked(&mut self, obj: ObjRef, value: bool) {
        if let Slot::Used { marked, .. } = &mut self.slots[obj.index() as usize] {
            *marked = value;
        }
    }

    /// Drop every interned string that was not marked. Must run before the
    /// sweep so the weak intern set never holds a freed key.
    pub(crate) fn remove_unmarked_strings(&mut self) {
        let Heap { slots, strings, .. } = self;
        strings.retain_keys(|key| match &slots[key.index() as usize] {
            Slot::Used { marked, .. } => *marked,
            Slot::Free => false,
        });
    }

    /// Free every unmarked slot and clear marks on survivors. Returns the
    /// number of objects freed.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if let Slot::Used { marked, obj } = slot {
                if *marked {
                    *marked = false;
                } else {
                    let size = Self::obj_size(obj);
                    *slot = Slot::Free;
                    self.bytes_allocated -= size;
                    self.free.push(index as u32);
                    freed += 1;
                }
            }
        }
        freed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

/// Whole numbers print without a fractional part, everything else with
/// Rust's shortest-roundtrip formatting.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_identity() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn test_interned_equality_is_value_equality() {
        let mut heap = Heap::new();
        let a = Value::object(heap.intern("foo"));
        let b = Value::object(heap.intern("foo"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_slot_reuse_after_free() {
        let mut heap = Heap::new();
        let a = heap.new_list(Vec::new());
        // Nothing marked: a full sweep frees the list.
        heap.remove_unmarked_strings();
        assert_eq!(heap.sweep(), 1);
        let b = heap.new_list(Vec::new());
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn test_bytes_accounting_shrinks_on_sweep() {
        let mut heap = Heap::new();
        heap.intern("some text that occupies bytes");
        let before = heap.bytes_allocated();
        assert!(before > 0);
        heap.remove_unmarked_strings();
        heap.sweep();
        assert!(heap.bytes_allocated() < before);
    }

    #[test]
    fn test_value_display() {
        let mut heap = Heap::new();
        assert_eq!(heap.value_to_string(Value::nil()), "nil");
        assert_eq!(heap.value_to_string(Value::boolean(true)), "true");
        assert_eq!(heap.value_to_string(Value::number(55.0)), "55");
        assert_eq!(heap.value_to_string(Value::number(2.5)), "2.5");
        let s = heap.intern("text");
        assert_eq!(heap.value_to_string(Value::object(s)), "text");
        let items = vec![Value::number(9.0), Value::number(2.0)];
        let list = heap.new_list(items);
        assert_eq!(heap.value_to_string(Value::object(list)), "[9, 2]");
    }

    #[test]
    fn test_function_display() {
        let mut heap = Heap::new();
        let name = heap.intern("inc");
        let named = heap.new_function(ObjFunction::new(Some(name)));
        let script = heap.new_function(ObjFunction::new(None));
        assert_eq!(heap.value_to_string(Value::object(named)), "<fn inc>");
        assert_eq!(heap.value_to_string(Value::object(script)), "<script>");
    }
}
