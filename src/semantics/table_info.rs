use std::sync::Arc;

use crate::semantics::dependencies::Dependencies;
use crate::semantics::table_set::TableSet;
use crate::sql::ast::{Expr, NodeId, TableName};
use crate::utils::types::DataType;
use crate::vindexes::Vindex;
use crate::vschema::schema::Table;

/// Access to the bindings already made, needed to resolve columns of derived tables and projections
pub trait Originable {
    /// Direct deps, recursive deps and type of an already bound expression
    fn deps_for_expr(&self, expr: &Expr) -> (TableSet, TableSet, Option<DataType>);
}

/// A column a table is known to have
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub typ: Option<DataType>,
}

/// A physical table from the vschema
#[derive(Debug, Clone)]
pub struct RealTable {
    pub node: NodeId,
    pub ts: TableSet,
    pub name: TableName,
    pub alias: Option<String>,
    pub table: Arc<Table>,
}

/// A vindex queried as if it were a table
#[derive(Debug, Clone)]
pub struct VindexTable {
    pub node: NodeId,
    pub ts: TableSet,
    pub name: TableName,
    pub alias: Option<String>,
    pub vindex: Arc<dyn Vindex>,
}

/// A subquery in FROM, seen through its projection
#[derive(Debug, Clone)]
pub struct DerivedTable {
    pub node: NodeId,
    pub ts: TableSet,
    pub alias: String,
    pub column_names: Vec<String>,
    pub cols: Vec<Expr>,
    /// Tables introduced inside the subquery
    pub tables: TableSet,
    /// Set when the projection kept an unexpanded `*`
    pub has_star: bool,
}

/// The output columns of a SELECT, visible to ORDER BY, GROUP BY and HAVING
#[derive(Debug, Clone)]
pub struct VTableInfo {
    pub column_names: Vec<String>,
    pub cols: Vec<Expr>,
    pub tables: TableSet,
    pub has_star: bool,
}

#[derive(Debug, Clone)]
pub enum TableInfo {
    Real(RealTable),
    Derived(DerivedTable),
    VTable(VTableInfo),
    Vindex(VindexTable),
}

impl TableInfo {
    /// Table set of this table; projections have none of their own
    pub fn table_set(&self) -> Option<&TableSet> {
        match self {
            TableInfo::Real(t) => Some(&t.ts),
            TableInfo::Vindex(t) => Some(&t.ts),
            TableInfo::Derived(t) => Some(&t.ts),
            TableInfo::VTable(_) => None,
        }
    }

    /// Id of the FROM-clause node this table came from
    pub fn node(&self) -> Option<NodeId> {
        match self {
            TableInfo::Real(t) => Some(t.node),
            TableInfo::Vindex(t) => Some(t.node),
            TableInfo::Derived(t) => Some(t.node),
            TableInfo::VTable(_) => None,
        }
    }

    pub fn is_vtable(&self) -> bool {
        matches!(self, TableInfo::VTable(_))
    }

    /// Name the table is referenced by inside the query
    pub fn visible_name(&self) -> Option<TableName> {
        match self {
            TableInfo::Real(RealTable { alias, name, .. }) | TableInfo::Vindex(VindexTable { alias, name, .. }) => {
                Some(match alias {
                    Some(alias) => TableName::new(alias),
                    None => name.clone(),
                })
            }
            TableInfo::Derived(t) => Some(TableName::new(&t.alias)),
            TableInfo::VTable(_) => None,
        }
    }

    /// Whether a column qualifier refers to this table
    pub fn matches(&self, qualifier: &TableName) -> bool {
        let Some(visible) = self.visible_name() else {
            return false;
        };
        if visible.name != qualifier.name {
            return false;
        }
        match (&qualifier.qualifier, &visible.qualifier) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(wanted), None) => match self {
                TableInfo::Real(t) if t.alias.is_none() => &t.table.keyspace.name == wanted,
                _ => false,
            },
        }
    }

    /// Whether the known column list is complete
    pub fn authoritative(&self) -> bool {
        match self {
            TableInfo::Real(t) => t.table.column_list_authoritative,
            TableInfo::Vindex(_) => false,
            TableInfo::Derived(t) => !t.has_star,
            TableInfo::VTable(t) => !t.has_star,
        }
    }

    pub fn real_table(&self) -> Option<&Arc<Table>> {
        match self {
            TableInfo::Real(t) => Some(&t.table),
            _ => None,
        }
    }

    /// Columns known for this table, in declaration order
    pub fn columns(&self, org: &dyn Originable) -> Vec<ColumnInfo> {
        match self {
            TableInfo::Real(t) => t
                .table
                .columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.name.clone(),
                    typ: Some(c.data_type),
                })
                .collect(),
            TableInfo::Vindex(_) => Vec::new(),
            TableInfo::Derived(DerivedTable { column_names, cols, .. })
            | TableInfo::VTable(VTableInfo { column_names, cols, .. }) => column_names
                .iter()
                .zip(cols)
                .map(|(name, expr)| ColumnInfo {
                    name: name.clone(),
                    typ: org.deps_for_expr(expr).2,
                })
                .collect(),
        }
    }

    /// Resolve an unqualified column name against this table alone
    pub fn dependencies(&self, column: &str, org: &dyn Originable) -> Dependencies {
        match self {
            TableInfo::Real(t) => {
                if let Some(col) = t.table.column(column) {
                    return Dependencies::certain(t.ts.clone(), t.ts.clone(), Some(col.data_type));
                }
                if t.table.column_list_authoritative {
                    return Dependencies::Nothing;
                }
                Dependencies::uncertain(t.ts.clone(), t.ts.clone(), None)
            }
            TableInfo::Vindex(t) => Dependencies::uncertain(t.ts.clone(), t.ts.clone(), None),
            TableInfo::Derived(t) => {
                if let Some(i) = t.column_names.iter().position(|n| n.eq_ignore_ascii_case(column)) {
                    let (_, recursive, typ) = org.deps_for_expr(&t.cols[i]);
                    return Dependencies::certain(t.ts.clone(), recursive, typ);
                }
                if !t.has_star {
                    return Dependencies::Nothing;
                }
                Dependencies::uncertain(t.ts.clone(), t.tables.clone(), None)
            }
            TableInfo::VTable(t) => {
                let mut deps = Dependencies::Nothing;
                for (name, expr) in t.column_names.iter().zip(&t.cols) {
                    if !name.eq_ignore_ascii_case(column) {
                        continue;
                    }
                    let (direct, recursive, typ) = org.deps_for_expr(expr);
                    deps = deps.merge(Dependencies::certain(direct, recursive, typ), false);
                }
                if deps.is_empty() && t.has_star {
                    return Dependencies::uncertain(t.tables.clone(), t.tables.clone(), None);
                }
                deps
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vschema::schema::{Column, Keyspace};

    struct NoBindings;

    impl Originable for NoBindings {
        fn deps_for_expr(&self, _expr: &Expr) -> (TableSet, TableSet, Option<DataType>) {
            (TableSet::single(4), TableSet::single(5), Some(DataType::Integer))
        }
    }

    fn real(authoritative: bool) -> TableInfo {
        let keyspace = Arc::new(Keyspace {
            name: "user".to_string(),
            sharded: true,
        });
        let mut table = Table::new("user", keyspace);
        table.columns = vec![Column {
            name: "id".to_string(),
            data_type: DataType::Integer,
        }];
        table.column_list_authoritative = authoritative;
        TableInfo::Real(RealTable {
            node: NodeId::fresh(),
            ts: TableSet::single(0),
            name: TableName::new("user"),
            alias: None,
            table: Arc::new(table),
        })
    }

    #[test]
    fn test_real_table_dependencies() {
        let authoritative = real(true);
        assert_eq!(
            authoritative.dependencies("ID", &NoBindings),
            Dependencies::certain(TableSet::single(0), TableSet::single(0), Some(DataType::Integer))
        );
        assert!(authoritative.dependencies("name", &NoBindings).is_empty());

        let partial = real(false);
        assert!(matches!(
            partial.dependencies("name", &NoBindings),
            Dependencies::Uncertain { .. }
        ));
    }

    #[test]
    fn test_matches_qualified_names() {
        let table = real(true);
        assert!(table.matches(&TableName::new("user")));
        assert!(table.matches(&TableName::qualified("user", "user")));
        assert!(!table.matches(&TableName::qualified("main", "user")));
        assert!(!table.matches(&TableName::new("u")));
    }

    #[test]
    fn test_derived_table_uses_inner_recursive_deps() {
        let derived = TableInfo::Derived(DerivedTable {
            node: NodeId::fresh(),
            ts: TableSet::single(2),
            alias: "d".to_string(),
            column_names: vec!["x".to_string()],
            cols: vec![Expr::column("x")],
            tables: TableSet::single(5),
            has_star: false,
        });

        let deps = derived.dependencies("x", &NoBindings).get("x").unwrap();
        assert_eq!(deps.direct, TableSet::single(2));
        assert_eq!(deps.recursive, TableSet::single(5));
        assert!(derived.dependencies("y", &NoBindings).is_empty());
        assert!(derived.matches(&TableName::new("d")));
    }

    #[test]
    fn test_vtable_duplicate_names_are_ambiguous_only_when_different() {
        let vtable = TableInfo::VTable(VTableInfo {
            column_names: vec!["a".to_string(), "a".to_string()],
            cols: vec![Expr::column("a"), Expr::column("a")],
            tables: TableSet::single(5),
            has_star: false,
        });
        // both columns resolve to the same tables
        assert!(vtable.dependencies("a", &NoBindings).get("a").is_ok());
        assert!(vtable.table_set().is_none());
        assert!(vtable.visible_name().is_none());
    }
}
