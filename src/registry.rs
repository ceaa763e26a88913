// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_debug_implementations)] // rewriter objects are not debug logged

use crate::ast::ResolvedNode;
use crate::catalog::Catalog;
use crate::options::AnalyzerOptions;
use crate::output::AnalyzerOutputProperties;
use crate::types::TypeFactory;

use core::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Identifier of a built-in rewrite rule. The set is closed at build time;
/// the registry imposes a total registration order over these tags which
/// the driver uses as the within-sweep application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResolvedAstRewrite {
    Anonymization,
    WithExpr,
    NullIfErrorFunction,
    TypeofFunction,
}

impl ResolvedAstRewrite {
    pub fn name(self) -> &'static str {
        match self {
            ResolvedAstRewrite::Anonymization => "REWRITE_ANONYMIZATION",
            ResolvedAstRewrite::WithExpr => "REWRITE_WITH_EXPR",
            ResolvedAstRewrite::NullIfErrorFunction => "REWRITE_NULLIFERROR_FUNCTION",
            ResolvedAstRewrite::TypeofFunction => "REWRITE_TYPEOF_FUNCTION",
        }
    }
}

impl fmt::Display for ResolvedAstRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One semantic-preserving tree transformation.
///
/// Contract: `rewrite` consumes the input root and must produce a new
/// root; it may mutate the output properties; any column it synthesizes
/// must draw its id from the options' column-id sequence; it must not
/// retain references to any argument past return.
pub trait Rewriter: Send + Sync {
    /// Human-readable rule name, used in logs and error messages.
    fn name(&self) -> &str;

    fn rewrite(
        &self,
        options: &AnalyzerOptions,
        input: ResolvedNode,
        catalog: &Catalog,
        type_factory: &TypeFactory,
        output_properties: &mut AnalyzerOutputProperties,
    ) -> anyhow::Result<ResolvedNode>;
}

/// Errors that can occur when interacting with the rewrite registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyRegistered { rewrite: ResolvedAstRewrite },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered { rewrite } => {
                write!(
                    f,
                    "rewriter registration failed: a rewriter for '{rewrite}' is already registered"
                )
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Ordered table mapping rule identifiers to rewriter objects.
///
/// The process-wide instance is built once at first use and immutable
/// afterwards; separate instances can be built for tests or embedders
/// that curate their own rule set.
#[derive(Default)]
pub struct RewriteRegistry {
    rewriters: DashMap<ResolvedAstRewrite, Arc<dyn Rewriter>>,
    registration_order: Vec<ResolvedAstRewrite>,
}

impl RewriteRegistry {
    pub fn new() -> Self {
        Self {
            rewriters: DashMap::new(),
            registration_order: Vec::new(),
        }
    }

    /// The shared instance holding the built-in rewriters.
    pub fn global_instance() -> &'static RewriteRegistry {
        &REWRITE_REGISTRY
    }

    /// Registers a rewriter for `rewrite`. Returns an error if the rule id
    /// is already taken.
    pub fn register(
        &mut self,
        rewrite: ResolvedAstRewrite,
        rewriter: Arc<dyn Rewriter>,
    ) -> Result<(), RegistryError> {
        if self.rewriters.contains_key(&rewrite) {
            return Err(RegistryError::AlreadyRegistered { rewrite });
        }
        self.rewriters.insert(rewrite, rewriter);
        self.registration_order.push(rewrite);
        Ok(())
    }

    /// Looks up the rewriter for `rewrite`, if one is registered.
    pub fn get(&self, rewrite: ResolvedAstRewrite) -> Option<Arc<dyn Rewriter>> {
        self.rewriters.get(&rewrite).map(|entry| entry.value().clone())
    }

    /// Stable iteration order: the order in which rules were registered.
    pub fn registration_order(&self) -> &[ResolvedAstRewrite] {
        &self.registration_order
    }

    pub fn len(&self) -> usize {
        self.registration_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registration_order.is_empty()
    }
}

lazy_static::lazy_static! {
    /// Global singleton instance of the rewrite registry.
    static ref REWRITE_REGISTRY: RewriteRegistry = {
        let mut registry = RewriteRegistry::new();
        if let Err(err) = crate::rewriters::register_builtins(&mut registry) {
            // The built-in list registers each rule id exactly once, so a
            // collision here means the list itself is broken.
            log::error!("builtin rewriter registration failed: {err}");
        }
        registry
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedNoop(&'static str);

    impl Rewriter for NamedNoop {
        fn name(&self) -> &str {
            self.0
        }

        fn rewrite(
            &self,
            _options: &AnalyzerOptions,
            input: ResolvedNode,
            _catalog: &Catalog,
            _type_factory: &TypeFactory,
            _output_properties: &mut AnalyzerOutputProperties,
        ) -> anyhow::Result<ResolvedNode> {
            Ok(input)
        }
    }

    #[test]
    fn registration_order_is_stable() -> anyhow::Result<()> {
        let mut registry = RewriteRegistry::new();
        registry.register(ResolvedAstRewrite::TypeofFunction, Arc::new(NamedNoop("a")))?;
        registry.register(ResolvedAstRewrite::Anonymization, Arc::new(NamedNoop("b")))?;
        assert_eq!(
            registry.registration_order(),
            &[
                ResolvedAstRewrite::TypeofFunction,
                ResolvedAstRewrite::Anonymization
            ],
            "order must reflect registration, not rule id ordering"
        );
        Ok(())
    }

    #[test]
    fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
        let mut registry = RewriteRegistry::new();
        registry.register(ResolvedAstRewrite::WithExpr, Arc::new(NamedNoop("a")))?;
        let result = registry.register(ResolvedAstRewrite::WithExpr, Arc::new(NamedNoop("b")));
        assert_eq!(
            result,
            Err(RegistryError::AlreadyRegistered {
                rewrite: ResolvedAstRewrite::WithExpr
            })
        );
        Ok(())
    }

    #[test]
    fn global_instance_registers_every_builtin() {
        let registry = RewriteRegistry::global_instance();
        for rewrite in registry.registration_order() {
            assert!(
                registry.get(*rewrite).is_some(),
                "registered rule {rewrite} must resolve to a rewriter"
            );
        }
        assert_eq!(registry.len(), 4);
    }
}
