// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structural validation of resolved trees. Run after rewriting to catch
//! rewriters that produced dangling column references, duplicate column
//! definitions, arity mismatches, or feature-gated nodes the language
//! profile does not permit.

use crate::ast::{
    ResolvedComputedColumn, ResolvedExpr, ResolvedHint, ResolvedScan, ResolvedStatement,
};
use crate::options::{AllowedHintsAndOptions, LanguageFeature, LanguageOptions};
use crate::types::TypeKind;
use crate::value::Value;

use std::collections::BTreeSet;

use anyhow::{bail, Result};

#[derive(Debug, Clone, Default)]
pub struct ValidatorOptions {
    pub allowed_hints_and_options: AllowedHintsAndOptions,
}

#[derive(Debug)]
pub struct Validator<'a> {
    language: &'a LanguageOptions,
    options: ValidatorOptions,
}

/// Column ids defined so far; detects definition sites that share an id.
#[derive(Debug, Default)]
struct ValidationContext {
    defined_ids: BTreeSet<i64>,
}

impl ValidationContext {
    fn define(&mut self, column_id: i64) -> Result<()> {
        if !self.defined_ids.insert(column_id) {
            bail!("validation failed: column id {column_id} is defined more than once");
        }
        Ok(())
    }
}

fn check_column_list(column_ids: impl Iterator<Item = i64>, visible: &BTreeSet<i64>) -> Result<()> {
    for column_id in column_ids {
        if !visible.contains(&column_id) {
            bail!(
                "validation failed: column id {column_id} in a scan's column list is not visible from its inputs"
            );
        }
    }
    Ok(())
}

impl<'a> Validator<'a> {
    pub fn new(language: &'a LanguageOptions, options: ValidatorOptions) -> Self {
        Self { language, options }
    }

    pub fn validate_resolved_statement(&self, statement: &ResolvedStatement) -> Result<()> {
        let mut context = ValidationContext::default();
        match statement {
            ResolvedStatement::QueryStmt(n) => {
                self.validate_hints(&n.hint_list)?;
                let visible = self.validate_scan(&n.query, &mut context)?;
                if n.output_column_list.is_empty() {
                    bail!("validation failed: query statement has no output columns");
                }
                for output in &n.output_column_list {
                    if !visible.contains(&output.column.column_id) {
                        bail!(
                            "validation failed: output column '{}' (id {}) is not produced by the query",
                            output.name,
                            output.column.column_id
                        );
                    }
                }
                Ok(())
            }
        }
    }

    pub fn validate_standalone_resolved_expr(&self, expr: &ResolvedExpr) -> Result<()> {
        let mut context = ValidationContext::default();
        self.validate_expr(expr, &BTreeSet::new(), &mut context)
    }

    fn validate_scan(
        &self,
        scan: &ResolvedScan,
        context: &mut ValidationContext,
    ) -> Result<BTreeSet<i64>> {
        match scan {
            ResolvedScan::TableScan(n) => {
                if n.table_name.is_empty() {
                    bail!("validation failed: table scan is missing its table name");
                }
                let mut visible = BTreeSet::new();
                for column in &n.column_list {
                    context.define(column.column_id)?;
                    visible.insert(column.column_id);
                }
                Ok(visible)
            }
            ResolvedScan::ProjectScan(n) => {
                let input_visible = match &n.input_scan {
                    Some(input) => self.validate_scan(input, context)?,
                    None => BTreeSet::new(),
                };
                let mut visible = input_visible.clone();
                for computed in &n.expr_list {
                    self.validate_expr(&computed.expr, &input_visible, context)?;
                    context.define(computed.column.column_id)?;
                    visible.insert(computed.column.column_id);
                }
                check_column_list(n.column_list.iter().map(|c| c.column_id), &visible)?;
                Ok(n.column_list.iter().map(|c| c.column_id).collect())
            }
            ResolvedScan::FilterScan(n) => {
                let input_visible = self.validate_scan(&n.input_scan, context)?;
                self.validate_expr(&n.filter_expr, &input_visible, context)?;
                if n.filter_expr.ty().kind() != TypeKind::Bool {
                    bail!(
                        "validation failed: filter expression has type {}, expected BOOL",
                        n.filter_expr.ty()
                    );
                }
                check_column_list(n.column_list.iter().map(|c| c.column_id), &input_visible)?;
                Ok(n.column_list.iter().map(|c| c.column_id).collect())
            }
            ResolvedScan::AggregateScan(n) => {
                let input_visible = self.validate_scan(&n.input_scan, context)?;
                let defined = self.validate_computed_columns(
                    n.group_by_list.iter().chain(&n.aggregate_list),
                    &input_visible,
                    context,
                )?;
                check_column_list(n.column_list.iter().map(|c| c.column_id), &defined)?;
                Ok(n.column_list.iter().map(|c| c.column_id).collect())
            }
            ResolvedScan::AnonymizedAggregateScan(n) => {
                if !self.language.feature_enabled(LanguageFeature::Anonymization) {
                    bail!(
                        "validation failed: anonymized aggregation requires the ANONYMIZATION language feature"
                    );
                }
                let input_visible = self.validate_scan(&n.input_scan, context)?;
                let defined = self.validate_computed_columns(
                    n.aggregate_list.iter(),
                    &input_visible,
                    context,
                )?;
                if let Some(k) = &n.k_threshold_expr {
                    // The threshold references a count aggregate defined by
                    // this scan.
                    self.validate_expr(k, &defined, context)?;
                }
                check_column_list(n.column_list.iter().map(|c| c.column_id), &defined)?;
                Ok(n.column_list.iter().map(|c| c.column_id).collect())
            }
        }
    }

    fn validate_computed_columns<'b>(
        &self,
        columns: impl Iterator<Item = &'b ResolvedComputedColumn>,
        visible: &BTreeSet<i64>,
        context: &mut ValidationContext,
    ) -> Result<BTreeSet<i64>> {
        let mut defined = BTreeSet::new();
        for computed in columns {
            self.validate_expr(&computed.expr, visible, context)?;
            context.define(computed.column.column_id)?;
            defined.insert(computed.column.column_id);
        }
        Ok(defined)
    }

    fn validate_expr(
        &self,
        expr: &ResolvedExpr,
        visible: &BTreeSet<i64>,
        context: &mut ValidationContext,
    ) -> Result<()> {
        match expr {
            ResolvedExpr::Literal(n) => {
                let consistent = match &n.value {
                    Value::Null => true,
                    Value::Bool(_) => n.ty.kind() == TypeKind::Bool,
                    Value::Int64(_) => n.ty.kind() == TypeKind::Int64,
                    Value::String(_) => n.ty.kind() == TypeKind::String,
                };
                if !consistent {
                    bail!(
                        "validation failed: literal {} does not match its annotated type {}",
                        n.value,
                        n.ty
                    );
                }
                Ok(())
            }
            ResolvedExpr::ColumnRef(n) => {
                if !visible.contains(&n.column.column_id) {
                    bail!(
                        "validation failed: column '{}' (id {}) is referenced outside its scope",
                        n.column.name,
                        n.column.column_id
                    );
                }
                Ok(())
            }
            ResolvedExpr::FunctionCall(n) => {
                if !n.function.accepts_arg_count(n.argument_list.len()) {
                    bail!(
                        "validation failed: function {} does not accept {} arguments",
                        n.function.name(),
                        n.argument_list.len()
                    );
                }
                self.validate_hints(&n.hint_list)?;
                for arg in &n.argument_list {
                    self.validate_expr(arg, visible, context)?;
                }
                Ok(())
            }
            ResolvedExpr::Cast(n) => self.validate_expr(&n.expr, visible, context),
            ResolvedExpr::WithExpr(n) => {
                let mut extended = visible.clone();
                for assignment in &n.assignment_list {
                    self.validate_expr(&assignment.expr, &extended, context)?;
                    context.define(assignment.column.column_id)?;
                    extended.insert(assignment.column.column_id);
                }
                self.validate_expr(&n.expr, &extended, context)
            }
        }
    }

    fn validate_hints(&self, hints: &[ResolvedHint]) -> Result<()> {
        for hint in hints {
            let qualifier = hint.qualifier.as_deref();
            if !self
                .options
                .allowed_hints_and_options
                .allows_hint(qualifier, &hint.name)
            {
                bail!("validation failed: hint '{}' is not allowed", hint.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ResolvedAnonymizedAggregateScan, ResolvedColumn, ResolvedColumnRef, ResolvedFunctionCall,
        ResolvedLiteral, ResolvedOutputColumn, ResolvedQueryStmt, ResolvedTableScan,
        ResolvedWithExpr,
    };
    use crate::catalog::Catalog;
    use crate::types::TypeFactory;
    use std::sync::Arc;

    fn validator_over(language: &LanguageOptions) -> Validator<'_> {
        Validator::new(language, ValidatorOptions::default())
    }

    #[test]
    fn dangling_column_ref_fails() {
        let language = LanguageOptions::new();
        let validator = validator_over(&language);
        let factory = TypeFactory::new();
        let expr = ResolvedExpr::ColumnRef(ResolvedColumnRef {
            ty: factory.int64(),
            column: ResolvedColumn {
                column_id: 9,
                name: Arc::from("ghost"),
                ty: factory.int64(),
            },
        });
        let err = validator.validate_standalone_resolved_expr(&expr);
        assert!(err.is_err(), "a free column reference must fail validation");
    }

    #[test]
    fn mismatched_literal_type_fails() {
        let language = LanguageOptions::new();
        let validator = validator_over(&language);
        let factory = TypeFactory::new();
        let expr = ResolvedExpr::Literal(ResolvedLiteral {
            ty: factory.bool(),
            value: Value::Int64(1),
            has_explicit_type: false,
        });
        assert!(validator.validate_standalone_resolved_expr(&expr).is_err());
    }

    #[test]
    fn with_expr_assignments_extend_scope() -> Result<()> {
        let language = LanguageOptions::new();
        let validator = validator_over(&language);
        let factory = TypeFactory::new();
        let column = ResolvedColumn {
            column_id: 1,
            name: Arc::from("a"),
            ty: factory.int64(),
        };
        let expr = ResolvedExpr::WithExpr(crate::ast::ResolvedWithExpr {
            ty: factory.int64(),
            assignment_list: vec![ResolvedComputedColumn {
                column: column.clone(),
                expr: ResolvedExpr::Literal(ResolvedLiteral {
                    ty: factory.int64(),
                    value: Value::Int64(1),
                    has_explicit_type: false,
                }),
            }],
            expr: Box::new(ResolvedExpr::ColumnRef(ResolvedColumnRef {
                ty: factory.int64(),
                column,
            })),
        });
        validator.validate_standalone_resolved_expr(&expr)
    }

    #[test]
    fn duplicate_assignment_ids_fail() {
        let language = LanguageOptions::new();
        let validator = validator_over(&language);
        let factory = TypeFactory::new();
        let column = ResolvedColumn {
            column_id: 1,
            name: Arc::from("a"),
            ty: factory.int64(),
        };
        let literal = ResolvedExpr::Literal(ResolvedLiteral {
            ty: factory.int64(),
            value: Value::Int64(1),
            has_explicit_type: false,
        });
        let expr = ResolvedExpr::WithExpr(crate::ast::ResolvedWithExpr {
            ty: factory.int64(),
            assignment_list: vec![
                ResolvedComputedColumn {
                    column: column.clone(),
                    expr: literal.clone(),
                },
                ResolvedComputedColumn {
                    column: column.clone(),
                    expr: literal,
                },
            ],
            expr: Box::new(ResolvedExpr::ColumnRef(ResolvedColumnRef {
                ty: factory.int64(),
                column,
            })),
        });
        let err = validator.validate_standalone_resolved_expr(&expr);
        assert!(err.is_err(), "two definition sites must not share an id");
    }

    #[test]
    fn duplicate_id_inside_k_threshold_expr_fails() -> Result<()> {
        let mut language = LanguageOptions::new();
        language.enable_feature(LanguageFeature::Anonymization);
        let validator = validator_over(&language);
        let factory = TypeFactory::new();
        let catalog = Catalog::builtin();
        let count = catalog
            .find_function("count")
            .ok_or_else(|| anyhow::anyhow!("missing count"))?;

        let uid = ResolvedColumn {
            column_id: 1,
            name: Arc::from("uid"),
            ty: factory.int64(),
        };
        let agg = ResolvedColumn {
            column_id: 2,
            name: Arc::from("n"),
            ty: factory.int64(),
        };
        // The threshold expression smuggles a WITH assignment that reuses
        // the table scan's column id.
        let k_threshold = ResolvedExpr::WithExpr(ResolvedWithExpr {
            ty: factory.int64(),
            assignment_list: vec![ResolvedComputedColumn {
                column: uid.clone(),
                expr: ResolvedExpr::Literal(ResolvedLiteral {
                    ty: factory.int64(),
                    value: Value::Int64(5),
                    has_explicit_type: false,
                }),
            }],
            expr: Box::new(ResolvedExpr::ColumnRef(ResolvedColumnRef {
                ty: factory.int64(),
                column: uid.clone(),
            })),
        });
        let statement = ResolvedStatement::QueryStmt(ResolvedQueryStmt {
            output_column_list: vec![ResolvedOutputColumn {
                name: Arc::from("n"),
                column: agg.clone(),
            }],
            query: Box::new(ResolvedScan::AnonymizedAggregateScan(
                ResolvedAnonymizedAggregateScan {
                    column_list: vec![agg.clone()],
                    input_scan: Box::new(ResolvedScan::TableScan(ResolvedTableScan {
                        table_name: Arc::from("events"),
                        column_list: vec![uid.clone()],
                    })),
                    aggregate_list: vec![ResolvedComputedColumn {
                        column: agg,
                        expr: ResolvedExpr::FunctionCall(ResolvedFunctionCall {
                            ty: factory.int64(),
                            function: count,
                            argument_list: vec![ResolvedExpr::ColumnRef(ResolvedColumnRef {
                                ty: factory.int64(),
                                column: uid,
                            })],
                            hint_list: vec![],
                        }),
                    }],
                    k_threshold_expr: Some(Box::new(k_threshold)),
                },
            )),
            hint_list: vec![],
        });
        let err = match validator.validate_resolved_statement(&statement) {
            Err(err) => err,
            Ok(()) => anyhow::bail!(
                "an id reused inside the threshold expression must fail validation"
            ),
        };
        assert!(
            err.to_string().contains("defined more than once"),
            "unexpected error: {err}"
        );
        Ok(())
    }
}
