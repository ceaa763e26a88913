// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Post-hoc detection of applicable rewrites. Walks a resolved tree once
//! and reports every rule whose trigger pattern occurs anywhere in it.
//!
//! Must stay consistent with the resolver's own detection: the resolver's
//! set seeds the first rewrite pass, this scanner drives every subsequent
//! pass, and debug builds assert the two agree.

use crate::ast::{
    ResolvedExpr, ResolvedNode, ResolvedScan, ResolvedStatement,
};
use crate::registry::ResolvedAstRewrite;

use std::collections::BTreeSet;

use anyhow::Result;

/// Returns the set of rule ids whose trigger patterns are present in the
/// tree. O(n) in tree size; never mutates nodes.
pub fn find_relevant_rewrites(node: &ResolvedNode) -> Result<BTreeSet<ResolvedAstRewrite>> {
    match node {
        ResolvedNode::Statement(statement) => find_relevant_rewrites_for_statement(statement),
        ResolvedNode::Expr(expr) => find_relevant_rewrites_for_expr(expr),
    }
}

pub fn find_relevant_rewrites_for_statement(
    statement: &ResolvedStatement,
) -> Result<BTreeSet<ResolvedAstRewrite>> {
    let mut rewrites = BTreeSet::new();
    scan_statement(statement, &mut rewrites);
    Ok(rewrites)
}

pub fn find_relevant_rewrites_for_expr(
    expr: &ResolvedExpr,
) -> Result<BTreeSet<ResolvedAstRewrite>> {
    let mut rewrites = BTreeSet::new();
    scan_expr(expr, &mut rewrites);
    Ok(rewrites)
}

fn scan_statement(statement: &ResolvedStatement, rewrites: &mut BTreeSet<ResolvedAstRewrite>) {
    match statement {
        ResolvedStatement::QueryStmt(n) => scan_scan(&n.query, rewrites),
    }
}

fn scan_scan(scan: &ResolvedScan, rewrites: &mut BTreeSet<ResolvedAstRewrite>) {
    match scan {
        ResolvedScan::TableScan(_) => {}
        ResolvedScan::ProjectScan(n) => {
            for computed in &n.expr_list {
                scan_expr(&computed.expr, rewrites);
            }
            if let Some(input) = &n.input_scan {
                scan_scan(input, rewrites);
            }
        }
        ResolvedScan::FilterScan(n) => {
            scan_expr(&n.filter_expr, rewrites);
            scan_scan(&n.input_scan, rewrites);
        }
        ResolvedScan::AggregateScan(n) => {
            for computed in n.group_by_list.iter().chain(&n.aggregate_list) {
                scan_expr(&computed.expr, rewrites);
            }
            scan_scan(&n.input_scan, rewrites);
        }
        ResolvedScan::AnonymizedAggregateScan(n) => {
            // The scanner cannot tell a rewritten anonymized scan from an
            // unrewritten one; the driver strips this rule after each
            // sweep to keep the loop convergent.
            rewrites.insert(ResolvedAstRewrite::Anonymization);
            for computed in &n.aggregate_list {
                scan_expr(&computed.expr, rewrites);
            }
            if let Some(k) = &n.k_threshold_expr {
                scan_expr(k, rewrites);
            }
            scan_scan(&n.input_scan, rewrites);
        }
    }
}

fn scan_expr(expr: &ResolvedExpr, rewrites: &mut BTreeSet<ResolvedAstRewrite>) {
    match expr {
        ResolvedExpr::Literal(_) | ResolvedExpr::ColumnRef(_) => {}
        ResolvedExpr::FunctionCall(n) => {
            if n.function.is_builtin_named("nulliferror") {
                rewrites.insert(ResolvedAstRewrite::NullIfErrorFunction);
            } else if n.function.is_builtin_named("typeof") {
                rewrites.insert(ResolvedAstRewrite::TypeofFunction);
            }
            for arg in &n.argument_list {
                scan_expr(arg, rewrites);
            }
        }
        ResolvedExpr::Cast(n) => scan_expr(&n.expr, rewrites),
        ResolvedExpr::WithExpr(n) => {
            rewrites.insert(ResolvedAstRewrite::WithExpr);
            for assignment in &n.assignment_list {
                scan_expr(&assignment.expr, rewrites);
            }
            scan_expr(&n.expr, rewrites);
        }
    }
}
