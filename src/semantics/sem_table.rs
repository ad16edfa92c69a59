use std::collections::HashMap;
use std::fmt;

use crate::semantics::table_info::{Originable, TableInfo};
use crate::semantics::table_set::TableSet;
use crate::sql::ast::{Expr, NodeId};
use crate::utils::error::{GateError, GateResult, SemanticError};
use crate::utils::types::DataType;

/// Table sets recorded per expression node.
///
/// Only columns, `COUNT(*)` and subqueries are recorded; the set of any other
/// expression is the union of what its sub-expressions recorded.
#[derive(Debug, Clone, Default)]
pub struct ExprDependencies(HashMap<NodeId, TableSet>);

impl ExprDependencies {
    pub fn insert(&mut self, node: NodeId, tables: TableSet) {
        self.0.insert(node, tables);
    }

    pub fn get(&self, node: NodeId) -> Option<&TableSet> {
        self.0.get(&node)
    }

    /// Tables `expr` depends on
    pub fn dependencies(&self, expr: &Expr) -> TableSet {
        if let Some(tables) = self.0.get(&expr.id) {
            return tables.clone();
        }
        let mut deps = TableSet::empty();
        expr.walk(&mut |node| {
            if let Some(sub) = node.subquery_statement() {
                if let Some(tables) = self.0.get(&sub.id()) {
                    deps.merge_in_place(tables);
                }
            }
            match self.0.get(&node.id) {
                Some(tables) => {
                    deps.merge_in_place(tables);
                    false
                }
                None => true,
            }
        });
        deps
    }
}

/// How the result of a subquery feeds the query around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulloutOpcode {
    /// Scalar subquery
    Value,
    /// `expr IN (subquery)`
    In,
    /// `expr NOT IN (subquery)`
    NotIn,
    /// `[NOT] EXISTS (subquery)`
    Exists,
}

impl fmt::Display for PulloutOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PulloutOpcode::Value => "PulloutValue",
            PulloutOpcode::In => "PulloutIn",
            PulloutOpcode::NotIn => "PulloutNotIn",
            PulloutOpcode::Exists => "PulloutExists",
        };
        write!(f, "{}", name)
    }
}

/// A subquery found inside an expression
#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryInfo {
    /// The expression holding the subquery
    pub expr: NodeId,
    /// The subquery's own SELECT
    pub statement: NodeId,
    /// SELECT block the subquery appears in; `None` at the top of a DML statement
    pub enclosing: Option<NodeId>,
    pub opcode: PulloutOpcode,
    /// Outer tables the subquery is correlated with
    pub outer_deps: TableSet,
}

/// Frozen result of semantic analysis of one statement
#[derive(Debug, Clone, Default)]
pub struct SemTable {
    pub(crate) tables: Vec<TableInfo>,
    pub(crate) table_ids: HashMap<NodeId, usize>,
    pub(crate) direct: ExprDependencies,
    pub(crate) recursive: ExprDependencies,
    pub(crate) types: HashMap<NodeId, DataType>,
    pub(crate) subqueries: Vec<SubqueryInfo>,
    pub(crate) not_single_route_err: Option<SemanticError>,
    pub(crate) not_unsharded_err: Option<SemanticError>,
}

impl SemTable {
    /// Every table of the statement, in ordinal order
    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    /// Table set of a FROM-clause node; empty for nodes the analyzer never saw
    pub fn table_set_for(&self, node: NodeId) -> TableSet {
        self.table_ids
            .get(&node)
            .map(|offset| TableSet::single(*offset))
            .unwrap_or_default()
    }

    /// Tables the expression reads in its own scope
    pub fn direct_deps(&self, expr: &Expr) -> TableSet {
        self.direct.dependencies(expr)
    }

    /// Tables the expression reads, following derived tables down to their sources
    pub fn recursive_deps(&self, expr: &Expr) -> TableSet {
        self.recursive.dependencies(expr)
    }

    pub fn type_for(&self, expr: &Expr) -> Option<DataType> {
        self.types.get(&expr.id).copied()
    }

    /// Table of a single-table set
    pub fn table_info_for(&self, tables: &TableSet) -> GateResult<&TableInfo> {
        tables
            .table_offset()
            .and_then(|offset| self.tables.get(offset))
            .ok_or_else(|| GateError::Internal(format!("{} does not name exactly one table", tables)))
    }

    /// Table an expression reads when it reads exactly one
    pub fn table_info_for_expr(&self, expr: &Expr) -> Option<&TableInfo> {
        self.direct_deps(expr)
            .table_offset()
            .and_then(|offset| self.tables.get(offset))
    }

    /// Give `to` the dependencies and type of `from`, for planner rewrites that replace an expression
    pub fn copy_dependencies(&mut self, from: &Expr, to: &Expr) {
        let direct = self.direct_deps(from);
        let recursive = self.recursive_deps(from);
        self.direct.insert(to.id, direct);
        self.recursive.insert(to.id, recursive);
        if let Some(typ) = self.type_for(from) {
            self.types.insert(to.id, typ);
        }
    }

    /// Subqueries found directly in the given SELECT block
    pub fn subqueries_in(&self, select: NodeId) -> Vec<&SubqueryInfo> {
        self.subqueries
            .iter()
            .filter(|info| info.enclosing == Some(select))
            .collect()
    }

    /// Registration of the subquery whose SELECT has the given id
    pub fn subquery_for(&self, statement: NodeId) -> Option<&SubqueryInfo> {
        self.subqueries.iter().find(|info| info.statement == statement)
    }

    /// Error that keeps the statement from being sent to one route unchanged
    pub fn not_single_route_err(&self) -> Option<&SemanticError> {
        self.not_single_route_err.as_ref()
    }

    /// Error that only matters when the statement targets a sharded keyspace
    pub fn not_unsharded_err(&self) -> Option<&SemanticError> {
        self.not_unsharded_err.as_ref()
    }
}

impl Originable for SemTable {
    fn deps_for_expr(&self, expr: &Expr) -> (TableSet, TableSet, Option<DataType>) {
        (self.direct_deps(expr), self.recursive_deps(expr), self.type_for(expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::BinaryOp;

    #[test]
    fn test_dependencies_of_compound_expression() {
        let a = Expr::column("a");
        let b = Expr::column("b");
        let mut deps = ExprDependencies::default();
        deps.insert(a.id, TableSet::single(0));
        deps.insert(b.id, TableSet::single(3));

        let sum = Expr::binary(BinaryOp::Plus, a, b);
        assert_eq!(deps.dependencies(&sum), TableSet::from_offsets([0, 3]));
        assert!(deps.dependencies(&Expr::int(1)).is_empty());
    }

    #[test]
    fn test_table_info_for_requires_single_table() {
        let sem = SemTable::default();
        assert!(sem.table_info_for(&TableSet::from_offsets([0, 1])).is_err());
        assert!(sem.table_info_for(&TableSet::empty()).is_err());
    }

    #[test]
    fn test_copy_dependencies() {
        let from = Expr::column("a");
        let to = Expr::column("a");
        let mut sem = SemTable::default();
        sem.direct.insert(from.id, TableSet::single(1));
        sem.recursive.insert(from.id, TableSet::single(2));
        sem.types.insert(from.id, DataType::Text);

        sem.copy_dependencies(&from, &to);
        assert_eq!(sem.direct_deps(&to), TableSet::single(1));
        assert_eq!(sem.recursive_deps(&to), TableSet::single(2));
        assert_eq!(sem.type_for(&to), Some(DataType::Text));
    }
}
