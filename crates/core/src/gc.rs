//! Tri-color mark-sweep phases
//!
//! The heap owns the mechanics; the runtime owns the policy. A collection
//! is: mark the roots (the runtime calls [`Heap::mark_value`] /
//! [`Heap::mark_object`] for everything it can reach), then
//! [`Heap::trace_references`] drains the gray worklist, then
//! [`Heap::collect_finish`] removes dead intern-table keys, sweeps, and
//! resizes the trigger threshold.
//!
//! White = unmarked, gray = marked but sitting on the worklist, black =
//! marked and traced. Only allocation points start a collection, so every
//! reachable object is either rooted or referenced by a rooted one.

use tracing::debug;

use crate::object::{GC_HEAP_GROW_FACTOR, Heap, Obj, ObjRef, UpvalueState};
use crate::value::Value;

impl Heap {
    pub fn mark_value(&mut self, value: Value) {
        if value.is_obj() {
            self.mark_object(value.as_obj());
        }
    }

    /// Turn a white object gray.
    pub fn mark_object(&mut self, obj: ObjRef) {
        if self.is_marked(obj) {
            return;
        }
        self.set_marked(obj, true);
        self.gray.push(obj);
    }

    /// Drain the gray worklist, blackening as it goes.
    pub fn trace_references(&mut self) {
        while let Some(obj) = self.gray.pop() {
            self.blacken(obj);
        }
    }

    /// Mark everything the object references. The outgoing edges are
    /// copied out first so the borrow of the object ends before marking
    /// mutates the arena.
    fn blacken(&mut self, obj: ObjRef) {
        let mut objects: Vec<ObjRef> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        match self.get(obj) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Upvalue(upvalue) => match upvalue.state {
                UpvalueState::Closed(value) => values.push(value),
                // An open upvalue's variable is still on the stack, which
                // is a root of its own.
                UpvalueState::Open(_) => {}
            },
            Obj::Function(function) => {
                objects.extend(function.name);
                values.extend_from_slice(&function.chunk.constants);
            }
            Obj::Closure(closure) => {
                objects.push(closure.function);
                objects.extend_from_slice(&closure.upvalues);
            }
            Obj::Class(class) => {
                objects.push(class.name);
                for (key, value) in class.methods.iter() {
                    objects.push(key);
                    values.push(value);
                }
            }
            Obj::Instance(instance) => {
                objects.push(instance.class);
                for (key, value) in instance.fields.iter() {
                    objects.push(key);
                    values.push(value);
                }
            }
            Obj::BoundMethod(bound) => {
                values.push(bound.receiver);
                objects.push(bound.method);
            }
            Obj::List(list) => {
                values.extend_from_slice(&list.items);
            }
        }
        for object in objects {
            self.mark_object(object);
        }
        for value in values {
            self.mark_value(value);
        }
    }

    /// Weak-intern removal, sweep, and threshold growth. Call after the
    /// roots are marked and the worklist is drained.
    pub fn collect_finish(&mut self) {
        let before = self.bytes_allocated();
        self.remove_unmarked_strings();
        let freed = self.sweep();
        self.set_next_gc(self.bytes_allocated() * GC_HEAP_GROW_FACTOR);
        debug!(
            freed,
            bytes_before = before,
            bytes_after = self.bytes_allocated(),
            "gc cycle complete"
        );
    }
}
