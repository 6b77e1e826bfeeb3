use thiserror::Error;

use crate::value::TypeError;

/// All failures the core can report.
///
/// Compile-time variants come out of the code generator while it is being
/// driven by the parser; runtime variants come out of the interpreter and
/// the structures it touches. Arithmetic never fails — mixed operands
/// coerce silently — so there is no division or overflow variant here.
#[derive(Debug, Error)]
pub enum Error {
    // --- Compile-time ---
    #[error("undefined symbol '{name}' at line {line}")]
    UndefinedSymbol { name: String, line: u32 },

    #[error("duplicate parameter name '{name}' at line {line}")]
    DuplicateParameter { name: String, line: u32 },

    #[error(
        "invalid attribution to '{name}' at line {line}: only allowed inside a function body"
    )]
    AttributionOutsideFunction { name: String, line: u32 },

    #[error("jump references label {0} which was never placed")]
    UnresolvedLabel(u32),

    // --- Runtime ---
    #[error("null pointer exception: no object with handle 0x{0:X}")]
    NullHandle(u32),

    #[error("null pointer exception: heap cell 0x{0:X} is empty")]
    EmptyHeapCell(u32),

    #[error("heap pointer 0x{0:X} is out of bounds")]
    HeapOutOfBounds(u32),

    #[error("pop on an empty stack")]
    StackUnderflow,

    #[error("environment pop without a matching push")]
    NoEnvironment,

    #[error("stack offset {0} is outside the current frame")]
    BadStackOffset(i32),

    #[error("object '{object}' has no function named '{function}'")]
    UnknownProgram { object: String, function: String },

    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    ArityMismatch {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

pub type Result<T> = std::result::Result<T, Error>;
