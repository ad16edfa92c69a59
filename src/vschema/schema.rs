use std::sync::Arc;

use crate::sql::ast::TableName;
use crate::utils::error::GateResult;
use crate::utils::types::DataType;
use crate::vindexes::Vindex;

/// A logical database, possibly split across shards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    pub name: String,
    pub sharded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

/// A vindex bound to one or more columns of a table
#[derive(Debug, Clone)]
pub struct ColumnVindex {
    pub columns: Vec<String>,
    pub vindex: Arc<dyn Vindex>,
    /// Owned vindexes are written by inserts into this table; unowned ones are only verified
    pub owned: bool,
}

impl ColumnVindex {
    pub fn name(&self) -> &str {
        self.vindex.name()
    }
}

/// Sequence-backed generation for one column
#[derive(Debug, Clone, PartialEq)]
pub struct AutoIncrement {
    pub column: String,
    pub sequence: String,
}

/// Sharding metadata of one physical table
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub keyspace: Arc<Keyspace>,
    pub columns: Vec<Column>,
    /// When set, `columns` lists every column of the table
    pub column_list_authoritative: bool,
    /// The first entry is the primary vindex
    pub column_vindexes: Vec<ColumnVindex>,
    pub auto_increment: Option<AutoIncrement>,
}

impl Table {
    pub fn new(name: &str, keyspace: Arc<Keyspace>) -> Self {
        Self {
            name: name.to_string(),
            keyspace,
            columns: Vec::new(),
            column_list_authoritative: false,
            column_vindexes: Vec::new(),
            auto_increment: None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_vindex(&self) -> Option<&ColumnVindex> {
        self.column_vindexes.first()
    }
}

/// Result of looking a FROM-clause name up in the vschema
#[derive(Debug, Clone, Default)]
pub struct TableLookup {
    pub table: Option<Arc<Table>>,
    /// Set when the name refers to a vindex queried as a table
    pub vindex: Option<Arc<dyn Vindex>>,
}

/// Schema capability the analyzer consumes
pub trait SchemaInformation: Send + Sync {
    /// Find the table, or vindex used as a table, named in a FROM clause
    fn find_table_or_vindex(&self, name: &TableName) -> GateResult<TableLookup>;
}
