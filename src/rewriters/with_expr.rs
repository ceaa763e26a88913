// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{
    rewrite_all, ResolvedAstRewriteVisitor, ResolvedCast, ResolvedComputedColumn, ResolvedExpr,
    ResolvedFunctionCall, ResolvedNode, ResolvedWithExpr,
};
use crate::catalog::Catalog;
use crate::options::AnalyzerOptions;
use crate::output::AnalyzerOutputProperties;
use crate::registry::Rewriter;
use crate::types::TypeFactory;

use std::collections::BTreeMap;

use anyhow::Result;

/// Inlines WITH expressions: each assignment expression is substituted for
/// references to its column, in order, so later assignments and the body
/// may reference earlier assignments. Assumes rewrite fragments are pure;
/// single-evaluation semantics are not preserved.
struct WithExprRewriteVisitor;

impl ResolvedAstRewriteVisitor for WithExprRewriteVisitor {
    fn post_visit_with_expr(&mut self, node: ResolvedWithExpr) -> Result<ResolvedExpr> {
        let ResolvedWithExpr {
            assignment_list,
            expr,
            ..
        } = node;
        let mut substitutions: BTreeMap<i64, ResolvedExpr> = BTreeMap::new();
        for ResolvedComputedColumn { column, expr } in assignment_list {
            let inlined = substitute_column_refs(expr, &substitutions);
            substitutions.insert(column.column_id, inlined);
        }
        Ok(substitute_column_refs(*expr, &substitutions))
    }
}

fn substitute_column_refs(
    expr: ResolvedExpr,
    substitutions: &BTreeMap<i64, ResolvedExpr>,
) -> ResolvedExpr {
    match expr {
        ResolvedExpr::Literal(_) => expr,
        ResolvedExpr::ColumnRef(ref column_ref) => {
            match substitutions.get(&column_ref.column.column_id) {
                Some(replacement) => replacement.clone(),
                None => expr,
            }
        }
        ResolvedExpr::FunctionCall(call) => {
            let ResolvedFunctionCall {
                ty,
                function,
                argument_list,
                hint_list,
            } = call;
            let argument_list = argument_list
                .into_iter()
                .map(|arg| substitute_column_refs(arg, substitutions))
                .collect();
            ResolvedExpr::FunctionCall(ResolvedFunctionCall {
                ty,
                function,
                argument_list,
                hint_list,
            })
        }
        ResolvedExpr::Cast(cast) => {
            let ResolvedCast { ty, expr } = cast;
            ResolvedExpr::Cast(ResolvedCast {
                ty,
                expr: Box::new(substitute_column_refs(*expr, substitutions)),
            })
        }
        ResolvedExpr::WithExpr(with_expr) => {
            // Nested WITH expressions were already inlined by the
            // post-order walk; an assignment column shadowing an outer one
            // would be a resolver bug, so plain recursion is safe.
            let ResolvedWithExpr {
                ty,
                assignment_list,
                expr,
            } = with_expr;
            let assignment_list = assignment_list
                .into_iter()
                .map(|assignment| ResolvedComputedColumn {
                    column: assignment.column,
                    expr: substitute_column_refs(assignment.expr, substitutions),
                })
                .collect();
            ResolvedExpr::WithExpr(ResolvedWithExpr {
                ty,
                assignment_list,
                expr: Box::new(substitute_column_refs(*expr, substitutions)),
            })
        }
    }
}

#[derive(Debug)]
pub struct WithExprRewriter;

impl Rewriter for WithExprRewriter {
    fn name(&self) -> &str {
        "WithExprRewriter"
    }

    fn rewrite(
        &self,
        options: &AnalyzerOptions,
        input: ResolvedNode,
        _catalog: &Catalog,
        _type_factory: &TypeFactory,
        _output_properties: &mut AnalyzerOutputProperties,
    ) -> Result<ResolvedNode> {
        super::rewrite_services(options)?;
        rewrite_all(input, &mut WithExprRewriteVisitor)
    }
}
