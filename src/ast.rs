// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolved AST: the post-name-resolution, type-annotated tree form of a
//! SQL statement or standalone expression. Nodes own their children; there
//! are no parent back-references, so transforms stay local and the tree can
//! move through the rewrite pipeline as an exclusively owned value.

use crate::arena::IdString;
use crate::catalog::FunctionRef;
use crate::types::TypeRef;
use crate::value::Value;

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolvedNodeKind {
    QueryStmt,
    TableScan,
    ProjectScan,
    FilterScan,
    AggregateScan,
    AnonymizedAggregateScan,
    Literal,
    ColumnRef,
    FunctionCall,
    Cast,
    WithExpr,
}

/// A column-definition site. Column ids are drawn from a process-wide
/// unique sequence; two distinct definition sites never share an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub column_id: i64,
    pub name: IdString,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHint {
    pub qualifier: Option<IdString>,
    pub name: IdString,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedExpr {
    Literal(ResolvedLiteral),
    ColumnRef(ResolvedColumnRef),
    FunctionCall(ResolvedFunctionCall),
    Cast(ResolvedCast),
    WithExpr(ResolvedWithExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLiteral {
    pub ty: TypeRef,
    pub value: Value,
    pub has_explicit_type: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumnRef {
    pub ty: TypeRef,
    pub column: ResolvedColumn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFunctionCall {
    pub ty: TypeRef,
    pub function: FunctionRef,
    pub argument_list: Vec<ResolvedExpr>,
    pub hint_list: Vec<ResolvedHint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCast {
    pub ty: TypeRef,
    pub expr: Box<ResolvedExpr>,
}

/// `WITH(a AS x, b AS y, expr)`: assignments are evaluated in order and
/// visible to later assignments and to the final expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWithExpr {
    pub ty: TypeRef,
    pub assignment_list: Vec<ResolvedComputedColumn>,
    pub expr: Box<ResolvedExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedComputedColumn {
    pub column: ResolvedColumn,
    pub expr: ResolvedExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedScan {
    TableScan(ResolvedTableScan),
    ProjectScan(ResolvedProjectScan),
    FilterScan(ResolvedFilterScan),
    AggregateScan(ResolvedAggregateScan),
    AnonymizedAggregateScan(ResolvedAnonymizedAggregateScan),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTableScan {
    pub table_name: IdString,
    pub column_list: Vec<ResolvedColumn>,
}

/// Projection. `input_scan` is absent for single-row scans (`SELECT 1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProjectScan {
    pub column_list: Vec<ResolvedColumn>,
    pub expr_list: Vec<ResolvedComputedColumn>,
    pub input_scan: Option<Box<ResolvedScan>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilterScan {
    pub column_list: Vec<ResolvedColumn>,
    pub input_scan: Box<ResolvedScan>,
    pub filter_expr: Box<ResolvedExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAggregateScan {
    pub column_list: Vec<ResolvedColumn>,
    pub input_scan: Box<ResolvedScan>,
    pub group_by_list: Vec<ResolvedComputedColumn>,
    pub aggregate_list: Vec<ResolvedComputedColumn>,
}

/// Aggregation with differential-privacy bookkeeping. `k_threshold_expr`
/// references the synthesized group-size count aggregate once the
/// anonymization rewrite has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAnonymizedAggregateScan {
    pub column_list: Vec<ResolvedColumn>,
    pub input_scan: Box<ResolvedScan>,
    pub aggregate_list: Vec<ResolvedComputedColumn>,
    pub k_threshold_expr: Option<Box<ResolvedExpr>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedStatement {
    QueryStmt(ResolvedQueryStmt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQueryStmt {
    pub output_column_list: Vec<ResolvedOutputColumn>,
    pub query: Box<ResolvedScan>,
    pub hint_list: Vec<ResolvedHint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputColumn {
    pub name: IdString,
    pub column: ResolvedColumn,
}

/// Root handle handed to rewriters: exactly one statement or one
/// standalone expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedNode {
    Statement(ResolvedStatement),
    Expr(ResolvedExpr),
}

impl ResolvedExpr {
    pub fn ty(&self) -> TypeRef {
        match self {
            ResolvedExpr::Literal(n) => n.ty.clone(),
            ResolvedExpr::ColumnRef(n) => n.ty.clone(),
            ResolvedExpr::FunctionCall(n) => n.ty.clone(),
            ResolvedExpr::Cast(n) => n.ty.clone(),
            ResolvedExpr::WithExpr(n) => n.ty.clone(),
        }
    }

    pub fn kind(&self) -> ResolvedNodeKind {
        match self {
            ResolvedExpr::Literal(_) => ResolvedNodeKind::Literal,
            ResolvedExpr::ColumnRef(_) => ResolvedNodeKind::ColumnRef,
            ResolvedExpr::FunctionCall(_) => ResolvedNodeKind::FunctionCall,
            ResolvedExpr::Cast(_) => ResolvedNodeKind::Cast,
            ResolvedExpr::WithExpr(_) => ResolvedNodeKind::WithExpr,
        }
    }

    pub fn visit_kinds(&self, f: &mut impl FnMut(ResolvedNodeKind)) {
        visit_expr_kinds(self, f);
    }
}

impl ResolvedScan {
    pub fn kind(&self) -> ResolvedNodeKind {
        match self {
            ResolvedScan::TableScan(_) => ResolvedNodeKind::TableScan,
            ResolvedScan::ProjectScan(_) => ResolvedNodeKind::ProjectScan,
            ResolvedScan::FilterScan(_) => ResolvedNodeKind::FilterScan,
            ResolvedScan::AggregateScan(_) => ResolvedNodeKind::AggregateScan,
            ResolvedScan::AnonymizedAggregateScan(_) => {
                ResolvedNodeKind::AnonymizedAggregateScan
            }
        }
    }

    pub fn column_list(&self) -> &[ResolvedColumn] {
        match self {
            ResolvedScan::TableScan(n) => &n.column_list,
            ResolvedScan::ProjectScan(n) => &n.column_list,
            ResolvedScan::FilterScan(n) => &n.column_list,
            ResolvedScan::AggregateScan(n) => &n.column_list,
            ResolvedScan::AnonymizedAggregateScan(n) => &n.column_list,
        }
    }
}

impl ResolvedStatement {
    pub fn kind(&self) -> ResolvedNodeKind {
        match self {
            ResolvedStatement::QueryStmt(_) => ResolvedNodeKind::QueryStmt,
        }
    }

    pub fn visit_kinds(&self, f: &mut impl FnMut(ResolvedNodeKind)) {
        visit_statement_kinds(self, f);
    }
}

impl ResolvedNode {
    /// Walks the tree and reports every node's kind in pre-order. Used by
    /// the legacy fields-accessed accounting sweep.
    pub fn visit_kinds(&self, f: &mut impl FnMut(ResolvedNodeKind)) {
        match self {
            ResolvedNode::Statement(stmt) => visit_statement_kinds(stmt, f),
            ResolvedNode::Expr(expr) => visit_expr_kinds(expr, f),
        }
    }

    /// The largest column id defined or referenced anywhere in the tree, or
    /// 0 for a tree without columns.
    pub fn max_column_id(&self) -> i64 {
        let mut max = 0;
        self.visit_columns(&mut |column| {
            if column.column_id > max {
                max = column.column_id;
            }
        });
        max
    }

    pub fn visit_columns(&self, f: &mut impl FnMut(&ResolvedColumn)) {
        match self {
            ResolvedNode::Statement(stmt) => visit_statement_columns(stmt, f),
            ResolvedNode::Expr(expr) => visit_expr_columns(expr, f),
        }
    }
}

fn visit_statement_kinds(stmt: &ResolvedStatement, f: &mut impl FnMut(ResolvedNodeKind)) {
    f(stmt.kind());
    match stmt {
        ResolvedStatement::QueryStmt(n) => visit_scan_kinds(&n.query, f),
    }
}

fn visit_scan_kinds(scan: &ResolvedScan, f: &mut impl FnMut(ResolvedNodeKind)) {
    f(scan.kind());
    match scan {
        ResolvedScan::TableScan(_) => {}
        ResolvedScan::ProjectScan(n) => {
            for computed in &n.expr_list {
                visit_expr_kinds(&computed.expr, f);
            }
            if let Some(input) = &n.input_scan {
                visit_scan_kinds(input, f);
            }
        }
        ResolvedScan::FilterScan(n) => {
            visit_expr_kinds(&n.filter_expr, f);
            visit_scan_kinds(&n.input_scan, f);
        }
        ResolvedScan::AggregateScan(n) => {
            for computed in n.group_by_list.iter().chain(&n.aggregate_list) {
                visit_expr_kinds(&computed.expr, f);
            }
            visit_scan_kinds(&n.input_scan, f);
        }
        ResolvedScan::AnonymizedAggregateScan(n) => {
            for computed in &n.aggregate_list {
                visit_expr_kinds(&computed.expr, f);
            }
            if let Some(k) = &n.k_threshold_expr {
                visit_expr_kinds(k, f);
            }
            visit_scan_kinds(&n.input_scan, f);
        }
    }
}

fn visit_expr_kinds(expr: &ResolvedExpr, f: &mut impl FnMut(ResolvedNodeKind)) {
    f(expr.kind());
    match expr {
        ResolvedExpr::Literal(_) | ResolvedExpr::ColumnRef(_) => {}
        ResolvedExpr::FunctionCall(n) => {
            for arg in &n.argument_list {
                visit_expr_kinds(arg, f);
            }
        }
        ResolvedExpr::Cast(n) => visit_expr_kinds(&n.expr, f),
        ResolvedExpr::WithExpr(n) => {
            for assignment in &n.assignment_list {
                visit_expr_kinds(&assignment.expr, f);
            }
            visit_expr_kinds(&n.expr, f);
        }
    }
}

fn visit_statement_columns(stmt: &ResolvedStatement, f: &mut impl FnMut(&ResolvedColumn)) {
    match stmt {
        ResolvedStatement::QueryStmt(n) => {
            for output in &n.output_column_list {
                f(&output.column);
            }
            visit_scan_columns(&n.query, f);
        }
    }
}

fn visit_scan_columns(scan: &ResolvedScan, f: &mut impl FnMut(&ResolvedColumn)) {
    for column in scan.column_list() {
        f(column);
    }
    match scan {
        ResolvedScan::TableScan(_) => {}
        ResolvedScan::ProjectScan(n) => {
            for computed in &n.expr_list {
                f(&computed.column);
                visit_expr_columns(&computed.expr, f);
            }
            if let Some(input) = &n.input_scan {
                visit_scan_columns(input, f);
            }
        }
        ResolvedScan::FilterScan(n) => {
            visit_expr_columns(&n.filter_expr, f);
            visit_scan_columns(&n.input_scan, f);
        }
        ResolvedScan::AggregateScan(n) => {
            for computed in n.group_by_list.iter().chain(&n.aggregate_list) {
                f(&computed.column);
                visit_expr_columns(&computed.expr, f);
            }
            visit_scan_columns(&n.input_scan, f);
        }
        ResolvedScan::AnonymizedAggregateScan(n) => {
            for computed in &n.aggregate_list {
                f(&computed.column);
                visit_expr_columns(&computed.expr, f);
            }
            if let Some(k) = &n.k_threshold_expr {
                visit_expr_columns(k, f);
            }
            visit_scan_columns(&n.input_scan, f);
        }
    }
}

fn visit_expr_columns(expr: &ResolvedExpr, f: &mut impl FnMut(&ResolvedColumn)) {
    match expr {
        ResolvedExpr::Literal(_) => {}
        ResolvedExpr::ColumnRef(n) => f(&n.column),
        ResolvedExpr::FunctionCall(n) => {
            for arg in &n.argument_list {
                visit_expr_columns(arg, f);
            }
        }
        ResolvedExpr::Cast(n) => visit_expr_columns(&n.expr, f),
        ResolvedExpr::WithExpr(n) => {
            for assignment in &n.assignment_list {
                f(&assignment.column);
                visit_expr_columns(&assignment.expr, f);
            }
            visit_expr_columns(&n.expr, f);
        }
    }
}

/// Post-order rewrite visitor: children are rewritten first, then the
/// matching `post_visit_*` hook may replace the rebuilt node. Every hook
/// defaults to identity, so a rule overrides only the kinds it cares
/// about.
pub trait ResolvedAstRewriteVisitor {
    fn post_visit_literal(&mut self, node: ResolvedLiteral) -> Result<ResolvedExpr> {
        Ok(ResolvedExpr::Literal(node))
    }

    fn post_visit_column_ref(&mut self, node: ResolvedColumnRef) -> Result<ResolvedExpr> {
        Ok(ResolvedExpr::ColumnRef(node))
    }

    fn post_visit_function_call(&mut self, node: ResolvedFunctionCall) -> Result<ResolvedExpr> {
        Ok(ResolvedExpr::FunctionCall(node))
    }

    fn post_visit_cast(&mut self, node: ResolvedCast) -> Result<ResolvedExpr> {
        Ok(ResolvedExpr::Cast(node))
    }

    fn post_visit_with_expr(&mut self, node: ResolvedWithExpr) -> Result<ResolvedExpr> {
        Ok(ResolvedExpr::WithExpr(node))
    }

    fn post_visit_table_scan(&mut self, node: ResolvedTableScan) -> Result<ResolvedScan> {
        Ok(ResolvedScan::TableScan(node))
    }

    fn post_visit_project_scan(&mut self, node: ResolvedProjectScan) -> Result<ResolvedScan> {
        Ok(ResolvedScan::ProjectScan(node))
    }

    fn post_visit_filter_scan(&mut self, node: ResolvedFilterScan) -> Result<ResolvedScan> {
        Ok(ResolvedScan::FilterScan(node))
    }

    fn post_visit_aggregate_scan(&mut self, node: ResolvedAggregateScan) -> Result<ResolvedScan> {
        Ok(ResolvedScan::AggregateScan(node))
    }

    fn post_visit_anonymized_aggregate_scan(
        &mut self,
        node: ResolvedAnonymizedAggregateScan,
    ) -> Result<ResolvedScan> {
        Ok(ResolvedScan::AnonymizedAggregateScan(node))
    }

    fn post_visit_query_stmt(&mut self, node: ResolvedQueryStmt) -> Result<ResolvedStatement> {
        Ok(ResolvedStatement::QueryStmt(node))
    }
}

/// Runs `visitor` over the whole tree in post order, consuming the input
/// and producing the rewritten tree.
pub fn rewrite_all<V: ResolvedAstRewriteVisitor>(
    node: ResolvedNode,
    visitor: &mut V,
) -> Result<ResolvedNode> {
    match node {
        ResolvedNode::Statement(stmt) => {
            Ok(ResolvedNode::Statement(rewrite_statement(stmt, visitor)?))
        }
        ResolvedNode::Expr(expr) => Ok(ResolvedNode::Expr(rewrite_expr(expr, visitor)?)),
    }
}

fn rewrite_statement<V: ResolvedAstRewriteVisitor>(
    stmt: ResolvedStatement,
    visitor: &mut V,
) -> Result<ResolvedStatement> {
    match stmt {
        ResolvedStatement::QueryStmt(node) => {
            let ResolvedQueryStmt {
                output_column_list,
                query,
                hint_list,
            } = node;
            let query = Box::new(rewrite_scan(*query, visitor)?);
            visitor.post_visit_query_stmt(ResolvedQueryStmt {
                output_column_list,
                query,
                hint_list,
            })
        }
    }
}

fn rewrite_scan<V: ResolvedAstRewriteVisitor>(
    scan: ResolvedScan,
    visitor: &mut V,
) -> Result<ResolvedScan> {
    match scan {
        ResolvedScan::TableScan(node) => visitor.post_visit_table_scan(node),
        ResolvedScan::ProjectScan(node) => {
            let ResolvedProjectScan {
                column_list,
                expr_list,
                input_scan,
            } = node;
            let expr_list = rewrite_computed_columns(expr_list, visitor)?;
            let input_scan = match input_scan {
                Some(input) => Some(Box::new(rewrite_scan(*input, visitor)?)),
                None => None,
            };
            visitor.post_visit_project_scan(ResolvedProjectScan {
                column_list,
                expr_list,
                input_scan,
            })
        }
        ResolvedScan::FilterScan(node) => {
            let ResolvedFilterScan {
                column_list,
                input_scan,
                filter_expr,
            } = node;
            let filter_expr = Box::new(rewrite_expr(*filter_expr, visitor)?);
            let input_scan = Box::new(rewrite_scan(*input_scan, visitor)?);
            visitor.post_visit_filter_scan(ResolvedFilterScan {
                column_list,
                input_scan,
                filter_expr,
            })
        }
        ResolvedScan::AggregateScan(node) => {
            let ResolvedAggregateScan {
                column_list,
                input_scan,
                group_by_list,
                aggregate_list,
            } = node;
            let group_by_list = rewrite_computed_columns(group_by_list, visitor)?;
            let aggregate_list = rewrite_computed_columns(aggregate_list, visitor)?;
            let input_scan = Box::new(rewrite_scan(*input_scan, visitor)?);
            visitor.post_visit_aggregate_scan(ResolvedAggregateScan {
                column_list,
                input_scan,
                group_by_list,
                aggregate_list,
            })
        }
        ResolvedScan::AnonymizedAggregateScan(node) => {
            let ResolvedAnonymizedAggregateScan {
                column_list,
                input_scan,
                aggregate_list,
                k_threshold_expr,
            } = node;
            let aggregate_list = rewrite_computed_columns(aggregate_list, visitor)?;
            let k_threshold_expr = match k_threshold_expr {
                Some(k) => Some(Box::new(rewrite_expr(*k, visitor)?)),
                None => None,
            };
            let input_scan = Box::new(rewrite_scan(*input_scan, visitor)?);
            visitor.post_visit_anonymized_aggregate_scan(ResolvedAnonymizedAggregateScan {
                column_list,
                input_scan,
                aggregate_list,
                k_threshold_expr,
            })
        }
    }
}

fn rewrite_computed_columns<V: ResolvedAstRewriteVisitor>(
    columns: Vec<ResolvedComputedColumn>,
    visitor: &mut V,
) -> Result<Vec<ResolvedComputedColumn>> {
    columns
        .into_iter()
        .map(|computed| {
            Ok(ResolvedComputedColumn {
                column: computed.column,
                expr: rewrite_expr(computed.expr, visitor)?,
            })
        })
        .collect()
}

fn rewrite_expr<V: ResolvedAstRewriteVisitor>(
    expr: ResolvedExpr,
    visitor: &mut V,
) -> Result<ResolvedExpr> {
    match expr {
        ResolvedExpr::Literal(node) => visitor.post_visit_literal(node),
        ResolvedExpr::ColumnRef(node) => visitor.post_visit_column_ref(node),
        ResolvedExpr::FunctionCall(node) => {
            let ResolvedFunctionCall {
                ty,
                function,
                argument_list,
                hint_list,
            } = node;
            let argument_list = argument_list
                .into_iter()
                .map(|arg| rewrite_expr(arg, visitor))
                .collect::<Result<Vec<_>>>()?;
            visitor.post_visit_function_call(ResolvedFunctionCall {
                ty,
                function,
                argument_list,
                hint_list,
            })
        }
        ResolvedExpr::Cast(node) => {
            let ResolvedCast { ty, expr } = node;
            let expr = Box::new(rewrite_expr(*expr, visitor)?);
            visitor.post_visit_cast(ResolvedCast { ty, expr })
        }
        ResolvedExpr::WithExpr(node) => {
            let ResolvedWithExpr {
                ty,
                assignment_list,
                expr,
            } = node;
            let assignment_list = rewrite_computed_columns(assignment_list, visitor)?;
            let expr = Box::new(rewrite_expr(*expr, visitor)?);
            visitor.post_visit_with_expr(ResolvedWithExpr {
                ty,
                assignment_list,
                expr,
            })
        }
    }
}
