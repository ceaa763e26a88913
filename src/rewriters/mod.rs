// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Built-in rewrite rules. Registration order here is the within-sweep
//! application order the driver uses.

mod anonymization;
mod nulliferror;
mod typeof_fn;
mod with_expr;

pub use anonymization::AnonymizationRewriter;
pub use nulliferror::NullIfErrorFunctionRewriter;
pub use typeof_fn::TypeofFunctionRewriter;
pub use with_expr::WithExprRewriter;

use crate::arena::{IdStringPool, ValueArena};
use crate::options::AnalyzerOptions;
use crate::registry::{RegistryError, ResolvedAstRewrite, RewriteRegistry};
use crate::utils::sequence::ColumnIdSequence;

use std::sync::Arc;

use anyhow::{anyhow, Result};

/// Registers every built-in rewriter. WithExpr deliberately precedes the
/// rules that synthesize WITH expressions, so their output is picked up by
/// the next sweep rather than the current one.
pub fn register_builtins(registry: &mut RewriteRegistry) -> Result<(), RegistryError> {
    registry.register(
        ResolvedAstRewrite::Anonymization,
        Arc::new(AnonymizationRewriter),
    )?;
    registry.register(ResolvedAstRewrite::WithExpr, Arc::new(WithExprRewriter))?;
    registry.register(
        ResolvedAstRewrite::NullIfErrorFunction,
        Arc::new(NullIfErrorFunctionRewriter),
    )?;
    registry.register(
        ResolvedAstRewrite::TypeofFunction,
        Arc::new(TypeofFunctionRewriter),
    )?;
    Ok(())
}

/// Shared services a rewriter draws on. The driver's per-rewrite options
/// always carry these; their absence means the rewriter was invoked with
/// options that did not come from the driver.
pub(crate) struct RewriteServices<'a> {
    pub sequence: &'a ColumnIdSequence,
    pub id_string_pool: &'a IdStringPool,
    pub arena: &'a ValueArena,
}

pub(crate) fn rewrite_services(options: &AnalyzerOptions) -> Result<RewriteServices<'_>> {
    let sequence = options
        .column_id_sequence_number
        .as_deref()
        .ok_or_else(|| anyhow!("internal error: rewrite options are missing a column id sequence"))?;
    let id_string_pool = options
        .id_string_pool
        .as_deref()
        .ok_or_else(|| anyhow!("internal error: rewrite options are missing an id string pool"))?;
    let arena = options
        .arena
        .as_deref()
        .ok_or_else(|| anyhow!("internal error: rewrite options are missing a value arena"))?;
    Ok(RewriteServices {
        sequence,
        id_string_pool,
        arena,
    })
}
