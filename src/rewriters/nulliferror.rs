// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{
    rewrite_all, ResolvedAstRewriteVisitor, ResolvedExpr, ResolvedFunctionCall, ResolvedLiteral,
    ResolvedNode,
};
use crate::catalog::Catalog;
use crate::options::AnalyzerOptions;
use crate::output::AnalyzerOutputProperties;
use crate::registry::Rewriter;
use crate::types::TypeFactory;
use crate::value::Value;

use anyhow::{anyhow, bail, Result};

/// Rewrites `NULLIFERROR(expr)` to `IFERROR(expr, NULL)`, with the NULL
/// literal explicitly typed as the argument's type.
struct NullIfErrorRewriteVisitor<'a> {
    catalog: &'a Catalog,
}

impl NullIfErrorRewriteVisitor<'_> {
    fn rewrite_nulliferror(&self, node: ResolvedFunctionCall) -> Result<ResolvedExpr> {
        let ResolvedFunctionCall {
            ty, argument_list, ..
        } = node;
        if argument_list.len() != 1 {
            bail!(
                "internal error: NULLIFERROR should have 1 expression argument, got {}",
                argument_list.len()
            );
        }
        let mut arguments = argument_list.into_iter();
        let Some(try_expr) = arguments.next() else {
            bail!("internal error: NULLIFERROR argument list is empty");
        };
        let null_literal = ResolvedExpr::Literal(ResolvedLiteral {
            ty: try_expr.ty(),
            value: Value::Null,
            has_explicit_type: true,
        });
        let iferror = self
            .catalog
            .find_function("iferror")
            .ok_or_else(|| anyhow!("internal error: catalog is missing the IFERROR function"))?;
        Ok(ResolvedExpr::FunctionCall(ResolvedFunctionCall {
            ty,
            function: iferror,
            argument_list: vec![try_expr, null_literal],
            hint_list: vec![],
        }))
    }
}

impl ResolvedAstRewriteVisitor for NullIfErrorRewriteVisitor<'_> {
    fn post_visit_function_call(&mut self, node: ResolvedFunctionCall) -> Result<ResolvedExpr> {
        if !node.function.is_builtin_named("nulliferror") {
            return Ok(ResolvedExpr::FunctionCall(node));
        }
        if !node.hint_list.is_empty() {
            bail!("unimplemented: the NULLIFERROR() operator does not support hints");
        }
        self.rewrite_nulliferror(node)
    }
}

#[derive(Debug)]
pub struct NullIfErrorFunctionRewriter;

impl Rewriter for NullIfErrorFunctionRewriter {
    fn name(&self) -> &str {
        "NullIfErrorFunctionRewriter"
    }

    fn rewrite(
        &self,
        options: &AnalyzerOptions,
        input: ResolvedNode,
        catalog: &Catalog,
        _type_factory: &TypeFactory,
        _output_properties: &mut AnalyzerOutputProperties,
    ) -> Result<ResolvedNode> {
        super::rewrite_services(options)?;
        rewrite_all(input, &mut NullIfErrorRewriteVisitor { catalog })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{IdStringPool, ValueArena};
    use crate::ast::ResolvedHint;
    use crate::utils::sequence::ColumnIdSequence;
    use std::sync::Arc;

    fn rewrite_options() -> AnalyzerOptions {
        let mut options = AnalyzerOptions::new();
        options.column_id_sequence_number = Some(Arc::new(ColumnIdSequence::new()));
        options.id_string_pool = Some(Arc::new(IdStringPool::new()));
        options.arena = Some(Arc::new(ValueArena::new()));
        options
    }

    fn nulliferror_call(catalog: &Catalog, factory: &TypeFactory) -> Result<ResolvedExpr> {
        let nulliferror = catalog
            .find_function("nulliferror")
            .ok_or_else(|| anyhow!("missing nulliferror"))?;
        Ok(ResolvedExpr::FunctionCall(ResolvedFunctionCall {
            ty: factory.int64(),
            function: nulliferror,
            argument_list: vec![ResolvedExpr::Literal(ResolvedLiteral {
                ty: factory.int64(),
                value: Value::Int64(7),
                has_explicit_type: false,
            })],
            hint_list: vec![],
        }))
    }

    #[test]
    fn rewrites_to_iferror_with_typed_null() -> Result<()> {
        let catalog = Catalog::builtin();
        let factory = TypeFactory::new();
        let mut properties = AnalyzerOutputProperties::default();
        let input = ResolvedNode::Expr(nulliferror_call(&catalog, &factory)?);
        let result = NullIfErrorFunctionRewriter.rewrite(
            &rewrite_options(),
            input,
            &catalog,
            &factory,
            &mut properties,
        )?;
        let ResolvedNode::Expr(ResolvedExpr::FunctionCall(call)) = result else {
            bail!("rewrite must produce a function call");
        };
        assert!(call.function.is_builtin_named("iferror"));
        assert_eq!(call.argument_list.len(), 2);
        let ResolvedExpr::Literal(null_literal) = &call.argument_list[1] else {
            bail!("second IFERROR argument must be the substituted NULL");
        };
        assert!(null_literal.value.is_null());
        assert!(null_literal.has_explicit_type);
        assert!(null_literal.ty.is_int64(), "NULL must take the argument type");
        Ok(())
    }

    #[test]
    fn hints_are_rejected() -> Result<()> {
        let catalog = Catalog::builtin();
        let factory = TypeFactory::new();
        let mut properties = AnalyzerOutputProperties::default();
        let ResolvedExpr::FunctionCall(mut call) = nulliferror_call(&catalog, &factory)? else {
            bail!("helper must build a function call");
        };
        call.hint_list.push(ResolvedHint {
            qualifier: None,
            name: Arc::from("force_order"),
            value: Value::Bool(true),
        });
        let result = NullIfErrorFunctionRewriter.rewrite(
            &rewrite_options(),
            ResolvedNode::Expr(ResolvedExpr::FunctionCall(call)),
            &catalog,
            &factory,
            &mut properties,
        );
        let err = match result {
            Err(err) => err,
            Ok(_) => bail!("hinted NULLIFERROR must be rejected"),
        };
        assert!(err.to_string().contains("does not support hints"));
        Ok(())
    }
}
