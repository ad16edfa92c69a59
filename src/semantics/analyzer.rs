use tracing::{debug, warn};

use crate::semantics::scope::{ScopeId, Scoper};
use crate::semantics::sem_table::SemTable;
use crate::semantics::table_info::{TableInfo, VTableInfo};
use crate::semantics::table_set::TableSet;
use crate::sql::ast::*;
use crate::utils::error::{AnalysisErrorKind, GateResult, SemanticError};
use crate::vschema::schema::SchemaInformation;

use super::early_rewriter::{check_for_invalid_construct, rewrite_positional, rewrite_straight_join, rewrite_union_order_by};

/// Where a SELECT block sits in the statement
#[derive(Debug, Clone, Copy)]
pub(super) struct SelectContext {
    pub top_level: bool,
    pub in_union: bool,
}

impl SelectContext {
    pub const TOP: SelectContext = SelectContext {
        top_level: true,
        in_union: false,
    };
    pub const NESTED: SelectContext = SelectContext {
        top_level: false,
        in_union: false,
    };
}

/// Columns a SELECT (or UNION) produces, as seen by the query around it
#[derive(Debug, Clone)]
pub(super) struct SelectOutput {
    pub column_names: Vec<String>,
    pub cols: Vec<Expr>,
    pub has_star: bool,
    /// Tables introduced anywhere inside the block
    pub tables: TableSet,
}

/// State shared by the binder, scoper, table collector, typer and early rewriter during one walk
pub(super) struct Session<'a> {
    pub schema: &'a dyn SchemaInformation,
    pub current_db: Option<String>,
    pub scoper: Scoper,
    pub sem: SemTable,
    /// Column nodes in the order they were bound
    pub bound_columns: Vec<NodeId>,
    /// SELECT blocks currently being walked, innermost last
    pub select_stack: Vec<NodeId>,
}

/// Bind every column of `statement` to the tables it reads and infer expression types.
///
/// Positional ORDER BY/GROUP BY references, `*` projections over tables with a known column
/// list, STRAIGHT_JOIN and JOIN USING are rewritten in place. Errors that only rule out some
/// plans are stored on the returned [`SemTable`]; any other error is returned.
pub fn analyze(
    statement: &mut Statement,
    current_db: Option<&str>,
    schema: &dyn SchemaInformation,
) -> GateResult<SemTable> {
    let mut session = Session::new(schema, current_db);
    let result = match statement {
        Statement::Select(select) => session
            .analyze_select_statement(select, None, SelectContext::TOP)
            .map(|_| ()),
        Statement::Insert(insert) => session.analyze_insert(insert),
        Statement::Update(update) => session.analyze_update(update),
        Statement::Delete(delete) => session.analyze_delete(delete),
    };
    if let Err(err) = result {
        warn!("analysis failed: {}", err);
        return Err(err);
    }

    let sem = session.sem;
    debug!(
        tables = sem.tables.len(),
        subqueries = sem.subqueries.len(),
        not_single_route = sem.not_single_route_err.is_some(),
        not_unsharded = sem.not_unsharded_err.is_some(),
        "analyzed statement"
    );
    Ok(sem)
}

impl<'a> Session<'a> {
    fn new(schema: &'a dyn SchemaInformation, current_db: Option<&str>) -> Self {
        Self {
            schema,
            current_db: current_db.map(str::to_string),
            scoper: Scoper::default(),
            sem: SemTable::default(),
            bound_columns: Vec::new(),
            select_stack: Vec::new(),
        }
    }

    /// Raise a fatal error, or keep the first error of a deferred kind
    pub fn record_error(&mut self, kind: AnalysisErrorKind, err: SemanticError) -> GateResult<()> {
        let slot = match kind {
            AnalysisErrorKind::Fatal => return Err(err.into()),
            AnalysisErrorKind::NotSingleRoute => &mut self.sem.not_single_route_err,
            AnalysisErrorKind::NotUnsharded => &mut self.sem.not_unsharded_err,
        };
        debug!(?kind, "deferred analysis error: {}", err);
        slot.get_or_insert(err);
        Ok(())
    }

    /// Tables registered from ordinal `first` onward
    pub fn tables_since(&self, first: usize) -> TableSet {
        TableSet::from_offsets(first..self.sem.tables.len())
    }

    pub fn analyze_select_statement(
        &mut self,
        statement: &mut SelectStatement,
        parent: Option<ScopeId>,
        ctx: SelectContext,
    ) -> GateResult<SelectOutput> {
        match statement {
            SelectStatement::Select(select) => self.analyze_select(select, parent, ctx),
            SelectStatement::Union(union) => self.analyze_union(union, parent, ctx),
        }
    }

    fn analyze_select(
        &mut self,
        select: &mut Select,
        parent: Option<ScopeId>,
        ctx: SelectContext,
    ) -> GateResult<SelectOutput> {
        check_for_invalid_construct(select, ctx)?;
        rewrite_straight_join(select);

        self.select_stack.push(select.id);
        let output = self.analyze_select_body(select, parent);
        self.select_stack.pop();
        output
    }

    fn analyze_select_body(&mut self, select: &mut Select, parent: Option<ScopeId>) -> GateResult<SelectOutput> {
        let first_table = self.sem.tables.len();
        let scope = self.scoper.new_scope(parent);

        // each FROM entry only sees its own tables in ON conditions
        let mut using_predicates = Vec::new();
        for table_expr in &mut select.from {
            let join_scope = self.scoper.new_scope(parent);
            self.collect_table_expr(table_expr, join_scope, &mut using_predicates)?;
            self.scoper.merge_into(join_scope, scope)?;
        }

        self.expand_stars(select, scope);
        let has_star = select.projection.iter().any(|e| matches!(e, SelectExpr::Star(_)));
        rewrite_positional(select)?;
        for predicate in using_predicates {
            select.add_where(predicate);
        }

        if let Some(predicate) = &mut select.where_clause {
            self.bind_expr(predicate, scope)?;
        }

        self.bind_projection(&mut select.projection, scope)?;

        let (column_names, cols) = projection_columns(&select.projection);
        let projected_tables = self.tables_since(first_table);
        let post_projection = self.scoper.new_scope(Some(scope));
        self.scoper
            .scope_mut(post_projection)
            .tables
            .push(TableInfo::VTable(VTableInfo {
                column_names: column_names.clone(),
                cols: cols.clone(),
                tables: projected_tables,
                has_star,
            }));

        for expr in &mut select.group_by {
            self.bind_expr(expr, post_projection)?;
        }
        if let Some(having) = &mut select.having {
            self.bind_expr(having, post_projection)?;
        }
        for order in &mut select.order_by {
            self.bind_expr(&mut order.expr, post_projection)?;
        }
        if let Some(limit) = &mut select.limit {
            self.bind_limit(limit, scope)?;
        }

        Ok(SelectOutput {
            column_names,
            cols,
            has_star,
            tables: self.tables_since(first_table),
        })
    }

    fn analyze_union(
        &mut self,
        union: &mut Union,
        parent: Option<ScopeId>,
        ctx: SelectContext,
    ) -> GateResult<SelectOutput> {
        let first_table = self.sem.tables.len();
        let branch = SelectContext {
            top_level: ctx.top_level,
            in_union: true,
        };
        let left = self.analyze_select_statement(&mut union.left, parent, branch)?;
        let right = self.analyze_select_statement(&mut union.right, parent, branch)?;
        if !left.has_star && !right.has_star && left.cols.len() != right.cols.len() {
            return Err(SemanticError::UnionColumnsMismatch {
                left: left.cols.len(),
                right: right.cols.len(),
            }
            .into());
        }

        let has_star = left.has_star || right.has_star;
        let tables = self.tables_since(first_table);
        rewrite_union_order_by(union, &left.column_names)?;

        let scope = self.scoper.new_scope(parent);
        self.scoper.scope_mut(scope).tables.push(TableInfo::VTable(VTableInfo {
            column_names: left.column_names.clone(),
            cols: left.cols.clone(),
            tables: tables.clone(),
            has_star,
        }));

        self.select_stack.push(union.id);
        let bound = self.bind_union_tail(union, scope);
        self.select_stack.pop();
        bound?;

        Ok(SelectOutput {
            column_names: left.column_names,
            cols: left.cols,
            has_star,
            tables,
        })
    }

    fn bind_union_tail(&mut self, union: &mut Union, scope: ScopeId) -> GateResult<()> {
        for order in &mut union.order_by {
            self.bind_expr(&mut order.expr, scope)?;
        }
        if let Some(limit) = &mut union.limit {
            self.bind_limit(limit, scope)?;
        }
        Ok(())
    }

    fn analyze_insert(&mut self, insert: &mut Insert) -> GateResult<()> {
        let scope = self.scoper.new_scope(None);
        let table = self.collect_table_name(NodeId::fresh(), &insert.table, None)?;
        self.scoper.scope_mut(scope).add_table(table)?;

        for column in &insert.columns {
            let col = ColName {
                name: column.clone(),
                qualifier: None,
            };
            self.check_column(&col, scope)?;
        }

        match &mut insert.rows {
            InsertRows::Values(rows) => {
                for expr in rows.iter_mut().flatten() {
                    self.bind_expr(expr, scope)?;
                }
            }
            InsertRows::Select(select) => {
                self.analyze_select_statement(select, None, SelectContext::NESTED)?;
            }
        }
        Ok(())
    }

    fn analyze_update(&mut self, update: &mut Update) -> GateResult<()> {
        let simple = matches!(
            update.table_exprs.as_slice(),
            [TableExpr::Aliased(AliasedTableExpr {
                expr: SimpleTableExpr::Table(_),
                ..
            })]
        );
        if !simple {
            return Err(SemanticError::Unsupported("update with a table expression other than one simple table".to_string()).into());
        }

        let scope = self.scoper.new_scope(None);
        let mut using_predicates = Vec::new();
        for table_expr in &mut update.table_exprs {
            self.collect_table_expr(table_expr, scope, &mut using_predicates)?;
        }

        for assignment in &mut update.assignments {
            self.check_column(&assignment.column, scope)?;
            self.bind_expr(&mut assignment.expr, scope)?;
        }
        self.bind_dml_tail(&mut update.where_clause, &mut update.order_by, &mut update.limit, scope)
    }

    fn analyze_delete(&mut self, delete: &mut Delete) -> GateResult<()> {
        let scope = self.scoper.new_scope(None);
        let mut using_predicates = Vec::new();
        for table_expr in &mut delete.table_exprs {
            self.collect_table_expr(table_expr, scope, &mut using_predicates)?;
        }

        for target in &delete.targets {
            let known = self.scoper.scope(scope).tables.iter().any(|t| t.matches(target));
            if !known {
                return Err(SemanticError::TableNotFound(format!("{} in MULTI DELETE", target)).into());
            }
        }

        let mut where_clause = delete.where_clause.take();
        for predicate in using_predicates {
            where_clause = Some(match where_clause {
                Some(existing) => Expr::binary(BinaryOp::And, existing, predicate),
                None => predicate,
            });
        }
        delete.where_clause = where_clause;
        self.bind_dml_tail(&mut delete.where_clause, &mut delete.order_by, &mut delete.limit, scope)
    }

    fn bind_dml_tail(
        &mut self,
        where_clause: &mut Option<Expr>,
        order_by: &mut [OrderByExpr],
        limit: &mut Option<Limit>,
        scope: ScopeId,
    ) -> GateResult<()> {
        if let Some(predicate) = where_clause {
            self.bind_expr(predicate, scope)?;
        }
        for order in order_by {
            self.bind_expr(&mut order.expr, scope)?;
        }
        if let Some(limit) = limit {
            self.bind_limit(limit, scope)?;
        }
        Ok(())
    }
}

/// Output column names and expressions of a projection; an unexpanded `*` contributes nothing
fn projection_columns(projection: &[SelectExpr]) -> (Vec<String>, Vec<Expr>) {
    projection
        .iter()
        .filter_map(|expr| match expr {
            SelectExpr::Aliased(aliased) => Some((aliased.column_name(), aliased.expr.clone())),
            SelectExpr::Star(_) => None,
        })
        .unzip()
}
