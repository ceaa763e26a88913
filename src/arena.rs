// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;

/// Interned identifier string. Cheap to clone; equality is by content.
pub type IdString = Arc<str>;

/// Interning pool for identifiers (column names, table names, hint names).
///
/// The analyzer output owns one pool; rewriter sub-analyses must allocate
/// identifiers from the same pool so that names synthesized during
/// rewriting stay alive as long as the output does.
#[derive(Debug, Default)]
pub struct IdStringPool {
    interned: DashMap<String, IdString>,
}

impl IdStringPool {
    pub fn new() -> Self {
        Self {
            interned: DashMap::new(),
        }
    }

    /// Returns the interned handle for `s`, creating it on first use.
    pub fn intern(&self, s: &str) -> IdString {
        if let Some(existing) = self.interned.get(s) {
            return existing.clone();
        }
        self.interned
            .entry(s.to_string())
            .or_insert_with(|| Arc::from(s))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.interned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }
}

/// Storage for literal strings materialized during rewriting.
///
/// Plays the role the node arena plays in the original analyzer: values
/// produced while rewriting are backed by storage owned by the analyzer
/// output rather than by the rewriter that created them. Node storage
/// itself needs no arena here since the tree owns its children.
#[derive(Debug, Default)]
pub struct ValueArena {
    strings: DashMap<String, Arc<str>>,
}

impl ValueArena {
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
        }
    }

    /// Allocates (or reuses) arena-owned storage for `s`.
    pub fn alloc_str(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        self.strings
            .entry(s.to_string())
            .or_insert_with(|| Arc::from(s))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_shares_storage() {
        let pool = IdStringPool::new();
        let a = pool.intern("col");
        let b = pool.intern("col");
        assert!(Arc::ptr_eq(&a, &b), "same identifier must intern once");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn arena_reuses_identical_strings() {
        let arena = ValueArena::new();
        let a = arena.alloc_str("INT64");
        let b = arena.alloc_str("INT64");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
