// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;

/// A function known to the catalog. Only the pieces the rewrite pipeline
/// consults are modeled: the name, whether it is a language built-in, and
/// the accepted argument count range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    name: Arc<str>,
    is_builtin: bool,
    min_args: usize,
    max_args: usize,
}

/// Shared handle to a catalog function.
pub type FunctionRef = Arc<Function>;

impl Function {
    pub fn new(name: &str, is_builtin: bool, min_args: usize, max_args: usize) -> Self {
        Self {
            name: Arc::from(name),
            is_builtin,
            min_args,
            max_args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_builtin(&self) -> bool {
        self.is_builtin
    }

    /// True if this is the built-in function with the given lower-case name.
    pub fn is_builtin_named(&self, name: &str) -> bool {
        self.is_builtin && self.name.as_ref() == name
    }

    pub fn accepts_arg_count(&self, n: usize) -> bool {
        n >= self.min_args && n <= self.max_args
    }
}

/// Read-only lookup of functions available during rewriting. The catalog is
/// passed by reference to every rewriter; it is never mutated by the
/// rewrite pipeline.
#[derive(Debug, Default)]
pub struct Catalog {
    functions: DashMap<String, FunctionRef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// Catalog preloaded with the built-ins the rewrite rules reference.
    pub fn builtin() -> Self {
        let catalog = Self::new();
        for function in [
            Function::new("nulliferror", true, 1, 1),
            Function::new("iferror", true, 2, 2),
            Function::new("typeof", true, 1, 1),
            Function::new("count", true, 0, 1),
        ] {
            catalog.add_function(function);
        }
        catalog
    }

    pub fn add_function(&self, function: Function) {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionRef> {
        self.functions.get(name).map(|entry| entry.value().clone())
    }
}
