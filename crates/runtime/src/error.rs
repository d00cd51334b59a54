//! Interpreter error taxonomy
//!
//! Two disjoint failure modes: the compiler rejected the source, or
//! execution raised a runtime error. Both have already been printed to
//! stderr by the time the caller sees them; the values exist so callers
//! (the CLI, tests) can branch on the outcome and map exit codes.

use ember_compiler::CompileError;

/// A runtime failure. The message and backtrace were printed when the
/// error was raised; the engine's stacks have been reset and the engine
/// remains usable.
#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Outcome of [`crate::Engine::interpret`] when the program did not run
/// to completion.
#[derive(Debug)]
pub enum InterpretError {
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(e) => write!(f, "{e}"),
            InterpretError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InterpretError {}
