//! Scripted objects.
//!
//! An object is an identity (a stable handle), one owned heap, a place in
//! the object tree (parent handle plus an ordered child list), a state
//! machine cursor, and some bookkeeping bits the object manager and the
//! garbage collector maintain. The programs that give it behavior live in
//! the program pool, keyed by the object's type name.

use std::any::Any;

use crate::heap::Heap;
use crate::manager::NULL_HANDLE;

/// Name of the state every object starts in.
pub const INITIAL_STATE: &str = "main";

/// A live scripted object.
pub struct Object {
    handle: u32,
    name: String,
    state: String,
    heap: Heap,
    parent: u32,
    children: Vec<u32>,
    reachable: bool,
    killed: bool,
    user_data: Option<Box<dyn Any>>,
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("killed", &self.killed)
            .finish_non_exhaustive()
    }
}

impl Object {
    pub(crate) fn new(name: &str, handle: u32, parent: u32, user_data: Option<Box<dyn Any>>) -> Self {
        Self {
            handle,
            name: name.to_string(),
            state: INITIAL_STATE.to_string(),
            heap: Heap::new(),
            parent,
            children: Vec::new(),
            reachable: false,
            killed: false,
            user_data,
        }
    }

    /// The stable handle this object was spawned with.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// The object's type name, as used to key the program pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn parent(&self) -> u32 {
        self.parent
    }

    /// Child handles, in spawn order.
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: u32) {
        self.children.push(child);
    }

    /// Unlink `child`; returns whether it was present.
    pub fn remove_child(&mut self, child: u32) -> bool {
        match self.children.iter().position(|&c| c == child) {
            Some(index) => {
                self.children.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent == NULL_HANDLE
    }

    /// Schedule this object for removal.
    pub fn kill(&mut self) {
        self.killed = true;
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub(crate) fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    /// Host-attached data the runtime never interprets.
    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    pub fn user_data_mut(&mut self) -> Option<&mut dyn Any> {
        self.user_data.as_deref_mut()
    }

    pub fn set_user_data(&mut self, data: Option<Box<dyn Any>>) {
        self.user_data = data;
    }
}
