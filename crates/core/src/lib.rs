//! Ember core primitives
//!
//! The pieces shared by the compiler and the virtual machine: the dynamic
//! [`Value`] representation, the managed [`Heap`] with its object model and
//! mark-sweep collector, the interning [`Table`], and bytecode [`Chunk`]s.
//!
//! The heap is a slot arena addressed by [`ObjRef`] handles. Nothing in this
//! crate holds raw pointers into the stack or the heap; the collector frees
//! only slots that are unreachable from the roots the runtime supplies.

pub mod chunk;
pub mod debug;
pub mod gc;
pub mod object;
pub mod table;

#[cfg(not(feature = "nanbox"))]
pub mod value;

#[cfg(feature = "nanbox")]
#[path = "nanbox.rs"]
pub mod value;

pub use chunk::{Chunk, OpCode};
pub use object::{
    FunctionKind, Heap, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance,
    ObjList, ObjNative, ObjRef, ObjString, ObjUpvalue, UpvalueState,
};
pub use table::Table;
pub use value::Value;

/// Maximum call-frame depth.
pub const FRAMES_MAX: usize = 64;

/// Value-stack capacity: one full window per frame.
pub const STACK_MAX: usize = FRAMES_MAX * 256;
