use std::ops::Range;

use tracing::trace;

use crate::semantics::analyzer::{SelectContext, Session};
use crate::semantics::dependencies::Dependencies;
use crate::semantics::scope::ScopeId;
use crate::semantics::table_info::{DerivedTable, RealTable, TableInfo, VindexTable};
use crate::semantics::table_set::TableSet;
use crate::sql::ast::*;
use crate::utils::error::{GateError, GateResult, SemanticError};
use crate::vschema::schema::TableLookup;

impl Session<'_> {
    /// Register every table of a FROM entry in `scope` and bind its join conditions.
    ///
    /// Equality predicates derived from inner `JOIN ... USING` are pushed to `using_predicates`;
    /// outer joins get them in their ON condition instead, where they keep the outer join semantics.
    pub fn collect_table_expr(
        &mut self,
        table_expr: &mut TableExpr,
        scope: ScopeId,
        using_predicates: &mut Vec<Expr>,
    ) -> GateResult<()> {
        match table_expr {
            TableExpr::Aliased(aliased) => {
                let table = self.collect_aliased(aliased)?;
                self.scoper.scope_mut(scope).add_table(table)?;
            }
            TableExpr::Paren(exprs) => {
                for expr in exprs {
                    self.collect_table_expr(expr, scope, using_predicates)?;
                }
            }
            TableExpr::Join(join) => {
                let left_start = self.scoper.scope(scope).tables.len();
                self.collect_table_expr(&mut join.left, scope, using_predicates)?;
                let right_start = self.scoper.scope(scope).tables.len();
                self.collect_table_expr(&mut join.right, scope, using_predicates)?;
                let end = self.scoper.scope(scope).tables.len();

                if !join.condition.using.is_empty() {
                    let outer = !matches!(join.kind, JoinKind::Inner | JoinKind::StraightJoin);
                    for column in join.condition.using.clone() {
                        let (left_name, left_ts) = self.using_side(scope, left_start..right_start, &column)?;
                        let (right_name, right_ts) = self.using_side(scope, right_start..end, &column)?;
                        let predicate = Expr::binary(
                            BinaryOp::Eq,
                            qualified(&left_name, &column),
                            qualified(&right_name, &column),
                        );
                        self.scoper
                            .scope_mut(scope)
                            .add_using(&column, &left_ts.merge(&right_ts));

                        if outer {
                            join.condition.on = Some(match join.condition.on.take() {
                                Some(on) => Expr::binary(BinaryOp::And, on, predicate),
                                None => predicate,
                            });
                        } else {
                            using_predicates.push(predicate);
                        }
                    }
                    if outer {
                        join.condition.using.clear();
                    }
                }

                if let Some(on) = &mut join.condition.on {
                    self.bind_expr(on, scope)?;
                }
            }
        }
        Ok(())
    }

    fn collect_aliased(&mut self, aliased: &mut AliasedTableExpr) -> GateResult<TableInfo> {
        let node = aliased.id;
        match &mut aliased.expr {
            SimpleTableExpr::Table(name) => {
                let name = name.clone();
                self.collect_table_name(node, &name, aliased.alias.clone())
            }
            SimpleTableExpr::Derived(subquery) => {
                if matches!(subquery.as_ref(), SelectStatement::Union(_)) {
                    return Err(SemanticError::Unsupported("union in a derived table".to_string()).into());
                }
                let alias = aliased
                    .alias
                    .clone()
                    .ok_or_else(|| SemanticError::Unsupported("derived table without an alias".to_string()))?;

                // derived tables cannot see the tables of the query around them
                let output = self.analyze_select_statement(subquery, None, SelectContext::NESTED)?;
                let offset = self.sem.tables.len();
                let table = TableInfo::Derived(DerivedTable {
                    node,
                    ts: TableSet::single(offset),
                    alias,
                    column_names: output.column_names,
                    cols: output.cols,
                    tables: output.tables,
                    has_star: output.has_star,
                });
                Ok(self.register_table(node, table))
            }
        }
    }

    /// Look a table name up in the vschema and register it
    pub fn collect_table_name(&mut self, node: NodeId, name: &TableName, alias: Option<String>) -> GateResult<TableInfo> {
        let lookup = self.find_table(name)?;
        let offset = self.sem.tables.len();
        let ts = TableSet::single(offset);
        let table = match lookup {
            TableLookup { table: Some(table), .. } => TableInfo::Real(RealTable {
                node,
                ts,
                name: name.clone(),
                alias,
                table,
            }),
            TableLookup { vindex: Some(vindex), .. } => TableInfo::Vindex(VindexTable {
                node,
                ts,
                name: name.clone(),
                alias,
                vindex,
            }),
            TableLookup { .. } => return Err(SemanticError::TableNotFound(name.to_string()).into()),
        };
        trace!(table = %name, offset, "registered table");
        Ok(self.register_table(node, table))
    }

    fn register_table(&mut self, node: NodeId, table: TableInfo) -> TableInfo {
        self.sem.table_ids.insert(node, self.sem.tables.len());
        self.sem.tables.push(table.clone());
        table
    }

    /// Unqualified names are tried in the current database first
    fn find_table(&self, name: &TableName) -> GateResult<TableLookup> {
        if let (None, Some(db)) = (&name.qualifier, &self.current_db) {
            match self.schema.find_table_or_vindex(&TableName::qualified(db, &name.name)) {
                Ok(found) => return Ok(found),
                Err(GateError::Semantic(SemanticError::TableNotFound(_))) => {}
                Err(err) => return Err(err),
            }
        }
        self.schema.find_table_or_vindex(name)
    }

    /// Table on one side of a join that provides a USING column, preferring a certain match
    fn using_side(&self, scope: ScopeId, side: Range<usize>, column: &str) -> GateResult<(TableName, TableSet)> {
        let tables = &self.scoper.scope(scope).tables[side];
        let mut uncertain = None;
        for table in tables.iter().rev() {
            let (Some(name), Some(ts)) = (table.visible_name(), table.table_set()) else {
                continue;
            };
            match table.dependencies(column, &self.sem) {
                Dependencies::Certain { .. } => return Ok((name, ts.clone())),
                Dependencies::Uncertain { .. } if uncertain.is_none() => uncertain = Some((name, ts.clone())),
                _ => {}
            }
        }
        uncertain.ok_or_else(|| SemanticError::ColumnNotFound(format!("{} in USING clause", column)).into())
    }
}

fn qualified(table: &TableName, column: &str) -> Expr {
    Expr::new(ExprKind::Column(ColName {
        name: column.to_string(),
        qualifier: Some(table.clone()),
    }))
}
