use tracing::trace;

use crate::semantics::analyzer::{SelectContext, Session};
use crate::semantics::dependencies::{Dependencies, Dependency};
use crate::semantics::scope::ScopeId;
use crate::semantics::sem_table::{PulloutOpcode, SubqueryInfo};
use crate::semantics::table_set::TableSet;
use crate::sql::ast::*;
use crate::utils::error::{AnalysisErrorKind, GateResult, SemanticError};

/// Outcome of looking a column up through the scope chain
pub(super) enum ColumnResolution {
    Found(Dependency),
    Ambiguous(SemanticError),
    NotFound,
}

impl Session<'_> {
    /// Bind every column, `COUNT(*)` and subquery in `expr`, then type it
    pub fn bind_expr(&mut self, expr: &mut Expr, scope: ScopeId) -> GateResult<()> {
        let id = expr.id;
        // shards can evaluate these, merging their partial results cannot
        if matches!(&expr.kind, ExprKind::Function(func) if func.distinct && func.is_aggregate() && func.args.len() > 1) {
            self.record_error(
                AnalysisErrorKind::NotSingleRoute,
                SemanticError::Unsupported(format!("only one expression allowed inside aggregates: {}", expr)),
            )?;
        }
        match &mut expr.kind {
            ExprKind::Column(col) => {
                let col = col.clone();
                self.bind_column(id, &col, scope)?;
            }
            ExprKind::CountStar => {
                let tables = self.count_star_tables(scope);
                self.sem.direct.insert(id, tables.clone());
                self.sem.recursive.insert(id, tables);
            }
            ExprKind::Subquery(subquery) => {
                self.bind_subquery(id, subquery, PulloutOpcode::Value, scope)?;
            }
            ExprKind::Exists { subquery, .. } => {
                self.bind_subquery(id, subquery, PulloutOpcode::Exists, scope)?;
            }
            ExprKind::InSubquery { expr: lhs, subquery, negated } => {
                self.bind_expr(lhs, scope)?;
                let opcode = if *negated { PulloutOpcode::NotIn } else { PulloutOpcode::In };
                self.bind_subquery(id, subquery, opcode, scope)?;
            }
            _ => {
                for child in expr.children_mut() {
                    self.bind_expr(child, scope)?;
                }
            }
        }
        self.type_expr(expr);
        Ok(())
    }

    pub fn bind_projection(&mut self, projection: &mut [SelectExpr], scope: ScopeId) -> GateResult<()> {
        for item in projection {
            if let SelectExpr::Aliased(aliased) = item {
                self.bind_expr(&mut aliased.expr, scope)?;
            }
        }
        Ok(())
    }

    pub fn bind_limit(&mut self, limit: &mut Limit, scope: ScopeId) -> GateResult<()> {
        if let Some(offset) = &mut limit.offset {
            self.bind_expr(offset, scope)?;
        }
        self.bind_expr(&mut limit.count, scope)
    }

    fn bind_column(&mut self, id: NodeId, col: &ColName, scope: ScopeId) -> GateResult<()> {
        let dep = match self.resolve_column(col, scope) {
            ColumnResolution::Found(dep) => dep,
            ColumnResolution::Ambiguous(err) => return Err(err.into()),
            ColumnResolution::NotFound => {
                self.record_error(AnalysisErrorKind::NotUnsharded, SemanticError::ColumnNotFound(col.to_string()))?;
                Dependency::default()
            }
        };
        trace!(column = %col, direct = %dep.direct, "bound column");
        self.sem.direct.insert(id, dep.direct);
        self.sem.recursive.insert(id, dep.recursive);
        if let Some(typ) = dep.typ {
            self.sem.types.insert(id, typ);
        }
        self.bound_columns.push(id);
        Ok(())
    }

    /// Check a column that has no node of its own, such as an INSERT column list entry
    pub fn check_column(&mut self, col: &ColName, scope: ScopeId) -> GateResult<()> {
        match self.resolve_column(col, scope) {
            ColumnResolution::Found(_) => Ok(()),
            ColumnResolution::Ambiguous(err) => Err(err.into()),
            ColumnResolution::NotFound => {
                self.record_error(AnalysisErrorKind::NotUnsharded, SemanticError::ColumnNotFound(col.to_string()))
            }
        }
    }

    /// Walk the scopes outward; the first scope with any candidate decides
    pub(super) fn resolve_column(&self, col: &ColName, scope: ScopeId) -> ColumnResolution {
        for scope_id in self.scoper.chain(scope) {
            let deps = self.dependencies_in_scope(col, scope_id);
            if deps.is_empty() {
                continue;
            }
            return match deps.get(&col.name) {
                Ok(dep) => ColumnResolution::Found(dep),
                Err(err) => {
                    if col.qualifier.is_none() {
                        if let Some(tables) = self.scoper.using_tables(scope_id, &col.name) {
                            let typ = deps.dependency().and_then(|d| d.typ);
                            return ColumnResolution::Found(Dependency::new(tables.clone(), tables.clone(), typ));
                        }
                    }
                    ColumnResolution::Ambiguous(err)
                }
            };
        }
        ColumnResolution::NotFound
    }

    fn dependencies_in_scope(&self, col: &ColName, scope: ScopeId) -> Dependencies {
        let mut deps = Dependencies::Nothing;
        for table in &self.scoper.scope(scope).tables {
            if let Some(qualifier) = &col.qualifier {
                if !table.matches(qualifier) {
                    continue;
                }
            }
            deps = deps.merge(table.dependencies(&col.name, &self.sem), false);
        }
        deps
    }

    /// `COUNT(*)` reads every table of the nearest scope that has tables
    fn count_star_tables(&self, scope: ScopeId) -> TableSet {
        for scope_id in self.scoper.chain(scope) {
            let mut tables = TableSet::empty();
            for table in &self.scoper.scope(scope_id).tables {
                if let Some(ts) = table.table_set() {
                    tables.merge_in_place(ts);
                }
            }
            if !tables.is_empty() {
                return tables;
            }
        }
        TableSet::empty()
    }

    /// Analyze a subquery in the current scope and register it against its enclosing SELECT.
    ///
    /// Its dependencies are the outer tables its columns were bound to.
    fn bind_subquery(
        &mut self,
        expr: NodeId,
        subquery: &mut SelectStatement,
        opcode: PulloutOpcode,
        scope: ScopeId,
    ) -> GateResult<()> {
        let first_table = self.sem.tables.len();
        let first_column = self.bound_columns.len();
        let output = self.analyze_select_statement(subquery, Some(scope), SelectContext::NESTED)?;
        let inner = self.tables_since(first_table);

        let mut direct = TableSet::empty();
        let mut recursive = TableSet::empty();
        for node in &self.bound_columns[first_column..] {
            if let Some(tables) = self.sem.direct.get(*node) {
                direct.merge_in_place(tables);
            }
            if let Some(tables) = self.sem.recursive.get(*node) {
                recursive.merge_in_place(tables);
            }
        }
        direct.remove_in_place(&inner);
        recursive.remove_in_place(&inner);

        let statement = subquery.id();
        self.sem.direct.insert(statement, direct);
        self.sem.recursive.insert(statement, recursive.clone());
        if opcode == PulloutOpcode::Value && output.cols.len() == 1 {
            if let Some(typ) = self.sem.type_for(&output.cols[0]) {
                self.sem.types.insert(expr, typ);
            }
        }

        trace!(%opcode, outer = %recursive, "registered subquery");
        self.sem.subqueries.push(SubqueryInfo {
            expr,
            statement,
            enclosing: self.select_stack.last().copied(),
            opcode,
            outer_deps: recursive,
        });
        Ok(())
    }
}
