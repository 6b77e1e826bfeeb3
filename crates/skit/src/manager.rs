//! The object manager.
//!
//! Owner of every live object. Handles are slot indices into a dense
//! table; slot 0 is permanently empty and stands for the null object,
//! slot 1 is the root. Vacated slots are reused for later spawns — a
//! handle therefore identifies "the object currently in this slot", and
//! `exists` transitions cleanly from false back to true on reuse.
//!
//! The manager also runs the garbage collector: an incremental
//! mark-and-sweep over the reachability graph spanned by the object tree,
//! the shared stack, and object handles stored in heap cells. Each call
//! to [`ObjectManager::collect_garbage`] performs a slice of work; a full
//! cycle is root marking, tracing until the work queue drains, and a
//! sweep that disposes everything left unmarked.

use std::any::Any;

use crate::error::{Error, Result};
use crate::log;
use crate::object::Object;
use crate::stack::Stack;

/// Handle of the null object. Never identifies a live object.
pub const NULL_HANDLE: u32 = 0;

/// Handle of the root object.
pub const ROOT_HANDLE: u32 = 1;

/// Minimum number of unreachable objects required before a sweep disposes
/// anything.
const MIN_OBJECTS_FOR_DISPOSAL: usize = 1;

/// Owner of the object table and driver of the garbage collector.
#[derive(Debug)]
pub struct ObjectManager {
    /// Object table indexed by handle; `data[0]` is always `None`.
    data: Vec<Option<Object>>,
    /// Live objects currently in the table.
    count: usize,
    /// Allocation hint: the scan for a free slot starts here.
    handle_ptr: u32,
    /// Work queue of marked objects whose edges still need scanning.
    objects_to_be_scanned: Vec<u32>,
    /// Queue position up to which edges have been scanned already.
    first_object_to_be_scanned: usize,
    /// Objects marked reachable in the current cycle.
    reachables_count: usize,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            data: vec![None],
            count: 0,
            handle_ptr: 1,
            objects_to_be_scanned: Vec::new(),
            first_object_to_be_scanned: 0,
            reachables_count: 0,
        }
    }

    /// Spawn a new object under `parent` and return its handle.
    ///
    /// The first spawn ever creates the root (handle 1); its `parent`
    /// argument is ignored. This allocates and links only — running the
    /// constructor programs is the runtime's job.
    pub fn spawn_object(
        &mut self,
        parent: u32,
        name: &str,
        user_data: Option<Box<dyn Any>>,
    ) -> Result<u32> {
        let handle = self.new_handle();
        let is_root = handle == ROOT_HANDLE;
        let object = Object::new(name, handle, if is_root { NULL_HANDLE } else { parent }, user_data);

        self.count += 1;
        if handle as usize >= self.data.len() {
            self.data.push(Some(object));
            if self.data.len().is_power_of_two() {
                self.handle_ptr = (self.handle_ptr / 2).max(2);
            }
        } else {
            self.data[handle as usize] = Some(object);
        }

        if !is_root {
            self.get_mut(parent)?.add_child(handle);
        }

        Ok(handle)
    }

    /// Does `handle` identify a live object?
    pub fn exists(&self, handle: u32) -> bool {
        matches!(self.data.get(handle as usize), Some(Some(_)))
    }

    pub fn get(&self, handle: u32) -> Result<&Object> {
        match self.data.get(handle as usize) {
            Some(Some(object)) => Ok(object),
            _ => Err(Error::NullHandle(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: u32) -> Result<&mut Object> {
        match self.data.get_mut(handle as usize) {
            Some(Some(object)) => Ok(object),
            _ => Err(Error::NullHandle(handle)),
        }
    }

    /// Destroy the object at `handle`, unlinking it from its parent.
    /// Returns `false` when the handle does not identify a live object.
    pub fn delete(&mut self, handle: u32) -> bool {
        let parent = match self.data.get(handle as usize) {
            Some(Some(object)) => object.parent(),
            _ => return false,
        };
        if let Ok(parent_object) = self.get_mut(parent) {
            parent_object.remove_child(handle);
        }
        self.data[handle as usize] = None;
        self.count -= 1;
        true
    }

    /// Number of live objects.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn null_handle(&self) -> u32 {
        NULL_HANDLE
    }

    pub fn root(&self) -> u32 {
        ROOT_HANDLE
    }

    /// Find a direct child of `parent` by type name.
    pub fn find_child(&self, parent: u32, name: &str) -> Option<u32> {
        let parent_object = self.get(parent).ok()?;
        parent_object
            .children()
            .iter()
            .copied()
            .find(|&child| self.get(child).map(|o| o.name() == name).unwrap_or(false))
    }

    /// Handle of the string utilities object (a root child).
    pub fn string_object(&self) -> Option<u32> {
        self.find_child(ROOT_HANDLE, "String")
    }

    /// Handle of the number utilities object (a root child).
    pub fn number_object(&self) -> Option<u32> {
        self.find_child(ROOT_HANDLE, "Number")
    }

    /// Handle of the boolean utilities object (a root child).
    pub fn boolean_object(&self) -> Option<u32> {
        self.find_child(ROOT_HANDLE, "Boolean")
    }

    /// Run one slice of the incremental mark-and-sweep collector.
    ///
    /// When the work queue is drained this finishes the previous cycle
    /// (sweeping if enough garbage accumulated, clearing marks otherwise)
    /// and starts a new one from the root and the stack; in between, each
    /// call scans the edges of the objects queued since the last call.
    pub fn collect_garbage(&mut self, stack: &Stack) {
        if self.objects_to_be_scanned.len() == self.first_object_to_be_scanned {
            if self.exists(ROOT_HANDLE) {
                if !self.objects_to_be_scanned.is_empty() {
                    let unreachables = self.count - self.reachables_count;
                    if unreachables >= MIN_OBJECTS_FOR_DISPOSAL {
                        log::log(&format!(
                            "garbage collector: disposing {} of {} object{}",
                            unreachables,
                            self.count,
                            if unreachables > 1 { "s" } else { "" }
                        ));
                        self.sweep_unreachables();
                    } else {
                        self.clear_marks();
                    }
                }

                // Start a new cycle from the roots.
                self.objects_to_be_scanned.clear();
                self.first_object_to_be_scanned = 0;
                self.reachables_count = 0;
                self.mark_as_reachable(ROOT_HANDLE);
                stack.scan_handles(|handle| self.mark_as_reachable(handle));
            }
        }

        // Scan the edges of every object queued since the last call.
        // Marking appends to the queue; the suffix waits for later calls.
        let end = self.objects_to_be_scanned.len();
        for i in self.first_object_to_be_scanned..end {
            let handle = self.objects_to_be_scanned[i];
            let mut edges = Vec::new();
            if let Some(Some(object)) = self.data.get(handle as usize) {
                object.heap().scan_handles(|h| edges.push(h));
                edges.extend_from_slice(object.children());
            }
            for edge in edges {
                self.mark_as_reachable(edge);
            }
        }
        self.first_object_to_be_scanned = end;
    }

    fn mark_as_reachable(&mut self, handle: u32) {
        if let Some(Some(object)) = self.data.get_mut(handle as usize)
            && !object.is_reachable()
        {
            object.set_reachable(true);
            self.objects_to_be_scanned.push(handle);
            self.reachables_count += 1;
        }
    }

    /// Dispose every live object the cycle left unmarked and clear the
    /// marks of the survivors. Covers the whole table, so objects that
    /// were unlinked from the tree are collected too.
    fn sweep_unreachables(&mut self) {
        for handle in 1..self.data.len() as u32 {
            let reachable = match &self.data[handle as usize] {
                Some(object) => object.is_reachable(),
                None => continue,
            };
            if reachable {
                if let Some(object) = self.data[handle as usize].as_mut() {
                    object.set_reachable(false);
                }
            } else {
                if let Some(object) = self.data[handle as usize].as_mut() {
                    object.kill();
                }
                self.delete(handle);
            }
        }
    }

    fn clear_marks(&mut self) {
        for i in 0..self.objects_to_be_scanned.len() {
            let handle = self.objects_to_be_scanned[i];
            if let Some(Some(object)) = self.data.get_mut(handle as usize) {
                object.set_reachable(false);
            }
        }
    }

    /// Find a free slot, scanning forward from the allocation hint.
    fn new_handle(&mut self) -> u32 {
        while (self.handle_ptr as usize) < self.data.len()
            && self.data[self.handle_ptr as usize].is_some()
        {
            self.handle_ptr += 1;
        }
        self.handle_ptr
    }
}
