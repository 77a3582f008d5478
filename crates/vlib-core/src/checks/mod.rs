//! Compiled check implementations, keyed by the stable id rule descriptors
//! name in their `implementation` field.

pub mod loan;

use crate::rule::CheckFn;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: BTreeMap<String, CheckFn>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in check registered.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        loan::register(&mut reg);
        reg
    }

    /// Later registrations under the same id replace earlier ones.
    pub fn register(&mut self, id: &str, check: CheckFn) -> &mut Self {
        self.checks.insert(id.to_string(), check);
        self
    }

    pub fn get(&self, id: &str) -> Option<CheckFn> {
        self.checks.get(id).copied()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.checks.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.ids())
            .finish()
    }
}
