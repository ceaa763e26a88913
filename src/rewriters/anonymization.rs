// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{
    rewrite_all, ResolvedAnonymizedAggregateScan, ResolvedAstRewriteVisitor, ResolvedColumn,
    ResolvedColumnRef, ResolvedComputedColumn, ResolvedExpr, ResolvedFunctionCall, ResolvedNode,
    ResolvedScan,
};
use crate::catalog::Catalog;
use crate::options::AnalyzerOptions;
use crate::output::AnalyzerOutputProperties;
use crate::registry::Rewriter;
use crate::types::TypeFactory;

use anyhow::{anyhow, Result};

/// Injects the group-threshold COUNT aggregate into anonymized aggregate
/// scans that do not carry one yet.
///
/// The scan node itself survives the rewrite, so the relevance scanner
/// cannot tell rewritten output from unrewritten input; the driver strips
/// this rule from the apply set after every sweep to keep the convergence
/// loop finite.
struct AnonymizationRewriteVisitor<'a> {
    options: &'a AnalyzerOptions,
    catalog: &'a Catalog,
    type_factory: &'a TypeFactory,
    applied: bool,
}

impl ResolvedAstRewriteVisitor for AnonymizationRewriteVisitor<'_> {
    fn post_visit_anonymized_aggregate_scan(
        &mut self,
        mut node: ResolvedAnonymizedAggregateScan,
    ) -> Result<ResolvedScan> {
        if node.k_threshold_expr.is_some() {
            return Ok(ResolvedScan::AnonymizedAggregateScan(node));
        }
        let services = super::rewrite_services(self.options)?;
        let count = self
            .catalog
            .find_function("count")
            .ok_or_else(|| anyhow!("internal error: catalog is missing the COUNT function"))?;
        let column = ResolvedColumn {
            column_id: services.sequence.next(),
            name: services.id_string_pool.intern("$k_threshold_col"),
            ty: self.type_factory.int64(),
        };
        node.aggregate_list.push(ResolvedComputedColumn {
            column: column.clone(),
            expr: ResolvedExpr::FunctionCall(ResolvedFunctionCall {
                ty: self.type_factory.int64(),
                function: count,
                argument_list: vec![],
                hint_list: vec![],
            }),
        });
        node.k_threshold_expr = Some(Box::new(ResolvedExpr::ColumnRef(ResolvedColumnRef {
            ty: self.type_factory.int64(),
            column,
        })));
        self.applied = true;
        Ok(ResolvedScan::AnonymizedAggregateScan(node))
    }
}

#[derive(Debug)]
pub struct AnonymizationRewriter;

impl Rewriter for AnonymizationRewriter {
    fn name(&self) -> &str {
        "AnonymizationRewriter"
    }

    fn rewrite(
        &self,
        options: &AnalyzerOptions,
        input: ResolvedNode,
        catalog: &Catalog,
        type_factory: &TypeFactory,
        output_properties: &mut AnalyzerOutputProperties,
    ) -> Result<ResolvedNode> {
        super::rewrite_services(options)?;
        let mut visitor = AnonymizationRewriteVisitor {
            options,
            catalog,
            type_factory,
            applied: false,
        };
        let result = rewrite_all(input, &mut visitor)?;
        if visitor.applied {
            output_properties.anonymization_rewrite_applied = true;
        }
        Ok(result)
    }
}
