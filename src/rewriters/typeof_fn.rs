// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{
    rewrite_all, ResolvedAstRewriteVisitor, ResolvedColumn, ResolvedComputedColumn, ResolvedExpr,
    ResolvedFunctionCall, ResolvedLiteral, ResolvedNode, ResolvedWithExpr,
};
use crate::catalog::Catalog;
use crate::options::AnalyzerOptions;
use crate::output::AnalyzerOutputProperties;
use crate::registry::Rewriter;
use crate::types::TypeFactory;
use crate::value::Value;

use anyhow::{bail, Result};

/// Rewrites `TYPEOF(expr)` to `WITH(t AS expr, '<TYPE NAME>')`. The type is
/// known statically; the WITH assignment keeps `expr` in the tree so its
/// evaluation semantics (including errors) are preserved. The synthesized
/// column draws a fresh id from the rewrite options' sequence.
struct TypeofRewriteVisitor<'a> {
    options: &'a AnalyzerOptions,
    type_factory: &'a TypeFactory,
}

impl ResolvedAstRewriteVisitor for TypeofRewriteVisitor<'_> {
    fn post_visit_function_call(&mut self, node: ResolvedFunctionCall) -> Result<ResolvedExpr> {
        if !node.function.is_builtin_named("typeof") {
            return Ok(ResolvedExpr::FunctionCall(node));
        }
        let services = super::rewrite_services(self.options)?;
        if node.argument_list.len() != 1 {
            bail!(
                "internal error: TYPEOF should have 1 expression argument, got {}",
                node.argument_list.len()
            );
        }
        let mut arguments = node.argument_list.into_iter();
        let Some(arg) = arguments.next() else {
            bail!("internal error: TYPEOF argument list is empty");
        };
        let type_name = services.arena.alloc_str(arg.ty().name());
        let column = ResolvedColumn {
            column_id: services.sequence.next(),
            name: services.id_string_pool.intern("$typeof_arg"),
            ty: arg.ty(),
        };
        let string_type = self.type_factory.string();
        Ok(ResolvedExpr::WithExpr(ResolvedWithExpr {
            ty: string_type.clone(),
            assignment_list: vec![ResolvedComputedColumn { column, expr: arg }],
            expr: Box::new(ResolvedExpr::Literal(ResolvedLiteral {
                ty: string_type,
                value: Value::String(type_name),
                has_explicit_type: true,
            })),
        }))
    }
}

#[derive(Debug)]
pub struct TypeofFunctionRewriter;

impl Rewriter for TypeofFunctionRewriter {
    fn name(&self) -> &str {
        "TypeofFunctionRewriter"
    }

    fn rewrite(
        &self,
        options: &AnalyzerOptions,
        input: ResolvedNode,
        _catalog: &Catalog,
        type_factory: &TypeFactory,
        _output_properties: &mut AnalyzerOutputProperties,
    ) -> Result<ResolvedNode> {
        super::rewrite_services(options)?;
        rewrite_all(
            input,
            &mut TypeofRewriteVisitor {
                options,
                type_factory,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{IdStringPool, ValueArena};
    use crate::utils::sequence::ColumnIdSequence;
    use std::sync::Arc;

    #[test]
    fn typeof_becomes_with_expr_over_fresh_column() -> Result<()> {
        let catalog = Catalog::builtin();
        let factory = TypeFactory::new();
        let mut properties = AnalyzerOutputProperties::default();

        let sequence = Arc::new(ColumnIdSequence::new());
        sequence.advance_past(10);
        let mut options = AnalyzerOptions::new();
        options.column_id_sequence_number = Some(sequence);
        options.id_string_pool = Some(Arc::new(IdStringPool::new()));
        options.arena = Some(Arc::new(ValueArena::new()));

        let typeof_fn = catalog
            .find_function("typeof")
            .ok_or_else(|| anyhow::anyhow!("missing typeof"))?;
        let input = ResolvedNode::Expr(ResolvedExpr::FunctionCall(ResolvedFunctionCall {
            ty: factory.string(),
            function: typeof_fn,
            argument_list: vec![ResolvedExpr::Literal(ResolvedLiteral {
                ty: factory.int64(),
                value: Value::Int64(3),
                has_explicit_type: false,
            })],
            hint_list: vec![],
        }));

        let result =
            TypeofFunctionRewriter.rewrite(&options, input, &catalog, &factory, &mut properties)?;
        let ResolvedNode::Expr(ResolvedExpr::WithExpr(with_expr)) = result else {
            bail!("TYPEOF must rewrite to a WITH expression");
        };
        assert_eq!(with_expr.assignment_list.len(), 1);
        let assignment = &with_expr.assignment_list[0];
        assert!(
            assignment.column.column_id > 10,
            "synthesized column must clear the sequence watermark"
        );
        let ResolvedExpr::Literal(name_literal) = with_expr.expr.as_ref() else {
            bail!("WITH body must be the type-name literal");
        };
        assert_eq!(name_literal.value, Value::from("INT64"));
        Ok(())
    }
}
