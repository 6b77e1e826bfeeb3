//! The program pool.
//!
//! Compiled programs are keyed by `(object-type-name, function-name)`,
//! both case-sensitive ASCII identifiers. The interpreter resolves every
//! `Call` through here; a missing key at call time is fatal to the
//! calling script.

use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::Program;

/// Two-level map from object type to function name to compiled program.
#[derive(Debug, Default)]
pub struct ProgramPool {
    programs: HashMap<String, HashMap<String, Rc<Program>>>,
}

impl ProgramPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `program` under `(object_name, fn_name)`, replacing any
    /// previous entry silently.
    pub fn put(&mut self, object_name: &str, fn_name: &str, program: Program) {
        self.programs
            .entry(object_name.to_string())
            .or_default()
            .insert(fn_name.to_string(), Rc::new(program));
    }

    /// Exact-match lookup.
    pub fn get(&self, object_name: &str, fn_name: &str) -> Option<Rc<Program>> {
        self.programs
            .get(object_name)
            .and_then(|fns| fns.get(fn_name))
            .cloned()
    }

    pub fn has(&self, object_name: &str, fn_name: &str) -> bool {
        self.programs
            .get(object_name)
            .is_some_and(|fns| fns.contains_key(fn_name))
    }

    /// Names of the functions registered for an object type.
    pub fn functions_of(&self, object_name: &str) -> Vec<&str> {
        self.programs
            .get(object_name)
            .map(|fns| fns.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
