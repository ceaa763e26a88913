// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::arena::{IdStringPool, ValueArena};
use crate::ast::{ResolvedExpr, ResolvedNode, ResolvedNodeKind, ResolvedStatement};
use crate::registry::ResolvedAstRewrite;
use crate::utils::timing::TimedValue;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::Serialize;

/// Mutable bag of facts about the analysis, written by the resolver and by
/// rewriters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalyzerOutputProperties {
    /// Rewrites the resolver detected while producing the tree. The driver
    /// cross-checks this against the post-hoc scanner in debug builds.
    pub relevant_rewrites: BTreeSet<ResolvedAstRewrite>,
    /// Set by the anonymization rewriter once the k-threshold aggregate has
    /// been injected.
    pub anonymization_rewrite_applied: bool,
}

/// Per-rule accounting: how often a rewriter ran and for how long.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewriterDetails {
    pub count: u64,
    pub timed_value: TimedValue,
}

/// Aggregate timings recorded by the driver.
#[derive(Debug, Default, Serialize)]
pub struct AnalyzerRuntimeInfo {
    pub rewriters_timed_value: TimedValue,
    rewriters_details: BTreeMap<ResolvedAstRewrite, RewriterDetails>,
    pub validator_timed_value: TimedValue,
}

impl AnalyzerRuntimeInfo {
    /// Mutable accounting slot for `rewrite`, created on first use.
    pub fn rewriters_details(&mut self, rewrite: ResolvedAstRewrite) -> &mut RewriterDetails {
        self.rewriters_details.entry(rewrite).or_default()
    }

    pub fn rewriter_details(&self, rewrite: ResolvedAstRewrite) -> Option<&RewriterDetails> {
        self.rewriters_details.get(&rewrite)
    }

    /// Total rewriter invocations across all rules.
    pub fn total_rewriter_invocations(&self) -> u64 {
        self.rewriters_details.values().map(|d| d.count).sum()
    }
}

/// Result of analyzing one statement or standalone expression. Owns the
/// resolved tree (exactly one of statement/expression is present), the
/// id-string pool and value arena backing it, and the bookkeeping bags.
#[derive(Debug)]
pub struct AnalyzerOutput {
    statement: Option<ResolvedStatement>,
    expr: Option<ResolvedExpr>,
    id_string_pool: Arc<IdStringPool>,
    arena: Arc<ValueArena>,
    max_column_id: i64,
    output_properties: AnalyzerOutputProperties,
    runtime_info: AnalyzerRuntimeInfo,
    fields_accessed: BTreeMap<ResolvedNodeKind, u64>,
}

impl AnalyzerOutput {
    pub fn from_statement(statement: ResolvedStatement, max_column_id: i64) -> Self {
        Self {
            statement: Some(statement),
            expr: None,
            id_string_pool: Arc::new(IdStringPool::new()),
            arena: Arc::new(ValueArena::new()),
            max_column_id,
            output_properties: AnalyzerOutputProperties::default(),
            runtime_info: AnalyzerRuntimeInfo::default(),
            fields_accessed: BTreeMap::new(),
        }
    }

    pub fn from_expr(expr: ResolvedExpr, max_column_id: i64) -> Self {
        Self {
            statement: None,
            expr: Some(expr),
            id_string_pool: Arc::new(IdStringPool::new()),
            arena: Arc::new(ValueArena::new()),
            max_column_id,
            output_properties: AnalyzerOutputProperties::default(),
            runtime_info: AnalyzerRuntimeInfo::default(),
            fields_accessed: BTreeMap::new(),
        }
    }

    pub fn resolved_statement(&self) -> Option<&ResolvedStatement> {
        self.statement.as_ref()
    }

    pub fn resolved_expr(&self) -> Option<&ResolvedExpr> {
        self.expr.as_ref()
    }

    pub fn id_string_pool(&self) -> Arc<IdStringPool> {
        self.id_string_pool.clone()
    }

    pub fn arena(&self) -> Arc<ValueArena> {
        self.arena.clone()
    }

    pub fn max_column_id(&self) -> i64 {
        self.max_column_id
    }

    pub fn output_properties(&self) -> &AnalyzerOutputProperties {
        &self.output_properties
    }

    pub fn mutable_output_properties(&mut self) -> &mut AnalyzerOutputProperties {
        &mut self.output_properties
    }

    pub fn runtime_info(&self) -> &AnalyzerRuntimeInfo {
        &self.runtime_info
    }

    /// Per-kind node counts recorded by the legacy fields-accessed sweep;
    /// empty unless that sweep ran.
    pub fn fields_accessed(&self) -> &BTreeMap<ResolvedNodeKind, u64> {
        &self.fields_accessed
    }
}

/// The only component allowed to mutate the analyzer output during
/// rewriting: it releases the root into the pipeline and atomically swaps
/// in the final tree together with the advanced column-id watermark.
#[derive(Debug)]
pub struct AnalyzerOutputMutator<'a> {
    output: &'a mut AnalyzerOutput,
}

impl<'a> AnalyzerOutputMutator<'a> {
    pub fn new(output: &'a mut AnalyzerOutput) -> Self {
        Self { output }
    }

    pub fn output(&self) -> &AnalyzerOutput {
        self.output
    }

    pub fn mutable_runtime_info(&mut self) -> &mut AnalyzerRuntimeInfo {
        &mut self.output.runtime_info
    }

    pub fn mutable_output_properties(&mut self) -> &mut AnalyzerOutputProperties {
        &mut self.output.output_properties
    }

    /// Transfers ownership of the root out of the output.
    pub fn release_output_node(&mut self) -> Result<ResolvedNode> {
        if let Some(statement) = self.output.statement.take() {
            return Ok(ResolvedNode::Statement(statement));
        }
        if let Some(expr) = self.output.expr.take() {
            return Ok(ResolvedNode::Expr(expr));
        }
        bail!("internal error: analyzer output has no resolved node to release");
    }

    /// Re-installs `node` and records the new column-id watermark.
    pub fn update(&mut self, node: ResolvedNode, new_max_column_id: i64) -> Result<()> {
        self.install(node);
        self.output.max_column_id = new_max_column_id;
        Ok(())
    }

    /// Puts a released root back without touching the watermark. Used on
    /// error paths so the output never ends up rootless.
    pub fn restore(&mut self, node: ResolvedNode) {
        self.install(node);
    }

    fn install(&mut self, node: ResolvedNode) {
        match node {
            ResolvedNode::Statement(statement) => {
                self.output.statement = Some(statement);
                self.output.expr = None;
            }
            ResolvedNode::Expr(expr) => {
                self.output.expr = Some(expr);
                self.output.statement = None;
            }
        }
    }

    /// Walks the installed root and records per-kind access counts. Legacy
    /// debug accounting; runs after validation because it mutates
    /// bookkeeping on the output.
    pub fn mark_fields_accessed(&mut self) {
        let mut counts: BTreeMap<ResolvedNodeKind, u64> = BTreeMap::new();
        {
            let mut record = |kind: ResolvedNodeKind| {
                *counts.entry(kind).or_insert(0) += 1;
            };
            if let Some(statement) = &self.output.statement {
                statement.visit_kinds(&mut record);
            } else if let Some(expr) = &self.output.expr {
                expr.visit_kinds(&mut record);
            }
        }
        self.output.fields_accessed = counts;
    }
}
