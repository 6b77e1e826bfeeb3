//! Per-object heap.
//!
//! Every scripted object owns one heap: a growable array of value cells
//! addressed by a [`HeapPtr`]. Cell indices are stable for the heap's
//! lifetime, so the code generator can bake them into instructions.

use crate::error::{Error, Result};
use crate::log;
use crate::value::Value;

/// Index of a cell inside an object's heap.
pub type HeapPtr = u32;

const INITIAL_SIZE: usize = 16;

/// A growable array of value cells with reusable slots.
///
/// Allocation scans forward from a cursor for the first empty cell and
/// doubles the capacity when none is left. Freed cells become holes that
/// later allocations may fill; reading a hole is an error that flags a
/// bug in the emitted code rather than in the script.
#[derive(Debug)]
pub struct Heap {
    cells: Vec<Option<Value>>,
    ptr: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            cells: vec![None; INITIAL_SIZE],
            ptr: 0,
        }
    }

    /// Allocate a cell, initialized to `Value::Null`, and return its index.
    pub fn alloc(&mut self) -> HeapPtr {
        loop {
            for index in self.ptr..self.cells.len() {
                if self.cells[index].is_none() {
                    self.cells[index] = Some(Value::Null);
                    self.ptr = index;
                    return index as HeapPtr;
                }
            }

            let grown = self.cells.len() * 2;
            log::log(&format!("heap: resizing to {grown} cells"));
            self.ptr = self.cells.len();
            self.cells.resize(grown, None);
        }
    }

    /// Empty the cell at `ptr`. Out-of-range pointers are ignored.
    pub fn free(&mut self, ptr: HeapPtr) {
        if let Some(cell) = self.cells.get_mut(ptr as usize) {
            *cell = None;
        }
    }

    /// Read the cell at `ptr`.
    pub fn at(&self, ptr: HeapPtr) -> Result<&Value> {
        match self.cells.get(ptr as usize) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(Error::EmptyHeapCell(ptr)),
            None => Err(Error::HeapOutOfBounds(ptr)),
        }
    }

    /// Mutable view of the cell at `ptr`.
    pub fn at_mut(&mut self, ptr: HeapPtr) -> Result<&mut Value> {
        match self.cells.get_mut(ptr as usize) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(Error::EmptyHeapCell(ptr)),
            None => Err(Error::HeapOutOfBounds(ptr)),
        }
    }

    /// Overwrite the cell at `ptr`.
    pub fn set(&mut self, ptr: HeapPtr, value: Value) -> Result<()> {
        *self.at_mut(ptr)? = value;
        Ok(())
    }

    /// Invoke `visitor` with every object handle stored in a live cell.
    pub fn scan_handles<F>(&self, mut visitor: F)
    where
        F: FnMut(u32),
    {
        for cell in self.cells.iter().flatten() {
            if let Value::ObjectHandle(handle) = cell {
                visitor(*handle);
            }
        }
    }

    /// Current capacity in cells.
    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Number of live (allocated) cells.
    pub fn cells_in_use(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
