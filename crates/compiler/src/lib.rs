//! Ember compiler
//!
//! Source text goes in, a compiled top-level function comes out. There is
//! no AST: the single-pass Pratt parser emits bytecode as it consumes
//! tokens, tracking scopes, local slots and upvalue capture across nested
//! function compilations.

pub mod compiler;
pub mod scanner;

pub use compiler::{CompileError, compile};
pub use scanner::{Scanner, Token, TokenKind};
