//! Ember runtime
//!
//! The stack virtual machine. An [`Engine`] owns the heap, the value and
//! frame stacks, the global bindings and the open-upvalue list; it
//! compiles source through `ember-compiler` and executes the resulting
//! bytecode, collecting garbage at allocation points.

pub mod config;
pub mod error;
pub mod natives;
pub mod vm;

pub use config::EngineConfig;
pub use error::{InterpretError, RuntimeError};
pub use vm::Engine;
