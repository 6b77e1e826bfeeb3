//! Symbol tables for the code generator.
//!
//! A symbol table maps identifiers to storage descriptors: object fields
//! live at heap addresses, parameters and locals at frame-relative stack
//! offsets. Tables nest — a function's table delegates lookups to the
//! object's table but declares into itself, so writes never escape
//! upward and `count` only sees local entries.

use crate::bytecode::{Opcode, Operand, Program};
use crate::heap::HeapPtr;

/// Where a named symbol lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// A cell of the owning object's heap.
    Heap(HeapPtr),
    /// A frame-relative stack offset (negative for parameters).
    Stack(i32),
}

/// One scope's identifier bindings, chained to its parent scope.
#[derive(Debug, Default)]
pub struct SymTable {
    symbols: Vec<(String, Storage)>,
    parent: Option<Box<SymTable>>,
}

impl SymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a child scope over `parent`.
    pub fn nest(parent: SymTable) -> Self {
        Self {
            symbols: Vec::new(),
            parent: Some(Box::new(parent)),
        }
    }

    /// Close this scope, returning the parent it was nested over.
    pub fn unnest(self) -> Option<SymTable> {
        self.parent.map(|boxed| *boxed)
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Is `name` bound in this scope or any enclosing one?
    pub fn has_symbol(&self, name: &str) -> bool {
        self.storage(name).is_some()
    }

    /// Is `name` bound in this scope itself?
    pub fn has_local_symbol(&self, name: &str) -> bool {
        self.symbols.iter().any(|(n, _)| n == name)
    }

    /// Bind `name` to a heap cell. Declarations always go into this
    /// scope, shadowing any enclosing binding.
    pub fn put_heap_symbol(&mut self, name: &str, address: HeapPtr) {
        self.symbols.push((name.to_string(), Storage::Heap(address)));
    }

    /// Bind `name` to a stack offset.
    pub fn put_stack_symbol(&mut self, name: &str, offset: i32) {
        self.symbols.push((name.to_string(), Storage::Stack(offset)));
    }

    /// Number of symbols declared in this scope (not the chain).
    pub fn count(&self) -> usize {
        self.symbols.len()
    }

    /// Resolve `name` through the scope chain.
    pub fn storage(&self, name: &str) -> Option<Storage> {
        self.symbols
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, storage)| *storage)
            .or_else(|| self.parent.as_ref().and_then(|p| p.storage(name)))
    }

    /// Emit the instruction that reads `name` into register `reg`.
    /// The symbol must resolve; callers check first.
    pub fn emit_read(&self, name: &str, program: &mut Program, reg: u32) {
        match self.storage(name) {
            Some(Storage::Heap(address)) => {
                program.emit(Opcode::LoadHeap, Operand::U(reg), Operand::U(address));
            }
            Some(Storage::Stack(offset)) => {
                program.emit(Opcode::LoadStack, Operand::U(reg), Operand::I(offset));
            }
            None => unreachable!("emit_read on an unresolved symbol"),
        }
    }

    /// Emit the instruction that writes register `reg` into `name`.
    pub fn emit_write(&self, name: &str, program: &mut Program, reg: u32) {
        match self.storage(name) {
            Some(Storage::Heap(address)) => {
                program.emit(Opcode::StoreHeap, Operand::U(reg), Operand::U(address));
            }
            Some(Storage::Stack(offset)) => {
                program.emit(Opcode::StoreStack, Operand::U(reg), Operand::I(offset));
            }
            None => unreachable!("emit_write on an unresolved symbol"),
        }
    }
}
