//! Skit — execution core for a lightweight game-scripting language
//!
//! Skit is the runtime half of a small dynamically-typed scripting
//! language aimed at games and interactive applications: programs are
//! objects with named functions and per-object state, compiled by an
//! external parser into a register-and-stack bytecode that this crate
//! defines, emits and executes.
//!
//! # What's inside
//!
//! - **Values**: null, 32-bit numbers, booleans, strings, object handles
//! - **Per-object heaps**: cell-addressed, growable, reusable slots
//! - **One shared stack**: lexically scoped frames for arguments and locals
//! - **Bytecode**: four scratch registers, a comparison flag, label-based
//!   jumps resolved at finalize time
//! - **Object manager**: a rooted object tree with stable handles and an
//!   incremental mark-and-sweep garbage collector over tree, stack and
//!   heap references
//! - **Code generator**: a parser-driven emitter with nesting symbol
//!   tables — the crate compiles semantic events, not source text
//!
//! # Quick start
//!
//! ```
//! use skit::{Emitter, ROOT_HANDLE, Runtime, Value};
//!
//! let mut rt = Runtime::new("Application");
//!
//! // add(a, b) = a + b, emitted the way a parser would drive it
//! let mut em = Emitter::new("Application");
//! em.begin_function();
//! em.declare_argument("a", 1, 0, 2).unwrap();
//! em.declare_argument("b", 1, 1, 2).unwrap();
//! em.read_identifier("a", 2).unwrap();
//! em.additive_begin();
//! em.read_identifier("b", 2).unwrap();
//! em.additive_end('+');
//! em.ret();
//! let program = em.end_function().unwrap();
//! rt.pool_mut().put("Application", "add", program);
//!
//! let sum = rt
//!     .call(ROOT_HANDLE, "add", &[Value::Number(2.0), Value::Number(3.0)])
//!     .unwrap();
//! assert_eq!(sum, Value::Number(5.0));
//! ```
//!
//! # Scheduling model
//!
//! Everything is single-threaded and cooperative. The host drives object
//! lifecycles (init, update, render, release) and calls
//! [`Runtime::collect_garbage`] between updates; every bytecode
//! instruction is atomic with respect to other scripts, and a program
//! yields only by returning.
//!
//! # Not in this crate
//!
//! The lexer and parser, the standard library of built-in objects, event
//! dispatch and update time-slicing, and any command-line front-end are
//! external collaborators with their own homes.

mod bytecode;
mod codegen;
mod error;
mod heap;
mod log;
mod manager;
mod object;
mod pool;
mod stack;
mod symtable;
mod value;
mod vm;

pub use bytecode::{Instruction, Label, Opcode, Operand, Program};
pub use codegen::Emitter;
pub use error::{Error, Result};
pub use heap::{Heap, HeapPtr};
pub use log::{set_fatal_handler, set_log_handler};
pub use manager::{NULL_HANDLE, ObjectManager, ROOT_HANDLE};
pub use object::{INITIAL_STATE, Object};
pub use pool::ProgramPool;
pub use stack::Stack;
pub use symtable::{Storage, SymTable};
pub use value::{TypeError, Value};
pub use vm::{
    CONSTRUCTOR_PROGRAM, DESTRUCTOR_PROGRAM, INIT_PROGRAM, RENDER_PROGRAM, Runtime, STATE_PREFIX,
    run,
};
