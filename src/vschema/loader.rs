use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::sql::ast::TableName;
use crate::utils::error::{GateError, GateResult, SemanticError};
use crate::utils::types::DataType;
use crate::vindexes::{create_vindex, Vindex};
use crate::vschema::schema::*;

#[derive(Debug, Deserialize)]
struct VSchemaDocument {
    #[serde(default)]
    keyspaces: BTreeMap<String, KeyspaceDocument>,
}

#[derive(Debug, Deserialize)]
struct KeyspaceDocument {
    #[serde(default)]
    sharded: bool,
    #[serde(default)]
    vindexes: BTreeMap<String, VindexDocument>,
    #[serde(default)]
    tables: BTreeMap<String, TableDocument>,
}

#[derive(Debug, Deserialize)]
struct VindexDocument {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableDocument {
    #[serde(default)]
    column_vindexes: Vec<ColumnVindexDocument>,
    #[serde(default)]
    auto_increment: Option<AutoIncrementDocument>,
    #[serde(default)]
    columns: Vec<ColumnDocument>,
    #[serde(default)]
    column_list_authoritative: bool,
}

#[derive(Debug, Deserialize)]
struct ColumnVindexDocument {
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AutoIncrementDocument {
    column: String,
    sequence: String,
}

#[derive(Debug, Deserialize)]
struct ColumnDocument {
    name: String,
    #[serde(rename = "type", default = "default_column_type")]
    data_type: DataType,
}

fn default_column_type() -> DataType {
    DataType::Text
}

/// Tables and vindexes of one keyspace
#[derive(Debug, Clone)]
pub struct KeyspaceSchema {
    pub keyspace: Arc<Keyspace>,
    pub tables: BTreeMap<String, Arc<Table>>,
    pub vindexes: BTreeMap<String, Arc<dyn Vindex>>,
}

/// In-memory vschema: every keyspace with its tables and vindexes
#[derive(Debug, Clone, Default)]
pub struct VSchema {
    keyspaces: BTreeMap<String, KeyspaceSchema>,
}

impl VSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a vschema document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| GateError::Configuration(format!("failed to read vschema {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Build a vschema from its JSON document
    pub fn from_json(json: &str) -> GateResult<Self> {
        let document: VSchemaDocument = serde_json::from_str(json)
            .map_err(|e| GateError::Configuration(format!("failed to parse vschema: {}", e)))?;

        let mut vschema = VSchema::new();
        for (ks_name, ks_doc) in document.keyspaces {
            let keyspace = vschema.add_keyspace(&ks_name, ks_doc.sharded);

            let mut vindexes = BTreeMap::new();
            let mut owners = BTreeMap::new();
            for (vindex_name, vindex_doc) in &ks_doc.vindexes {
                vindexes.insert(vindex_name.clone(), create_vindex(&vindex_doc.kind, vindex_name)?);
                if let Some(owner) = &vindex_doc.owner {
                    owners.insert(vindex_name.clone(), owner.clone());
                }
            }

            for (table_name, table_doc) in ks_doc.tables {
                let mut table = Table::new(&table_name, keyspace.clone());
                table.column_list_authoritative = table_doc.column_list_authoritative;
                table.columns = table_doc
                    .columns
                    .into_iter()
                    .map(|c| Column {
                        name: c.name,
                        data_type: c.data_type,
                    })
                    .collect();
                table.auto_increment = table_doc.auto_increment.map(|a| AutoIncrement {
                    column: a.column,
                    sequence: a.sequence,
                });

                for cv in table_doc.column_vindexes {
                    let vindex = vindexes.get(&cv.name).cloned().ok_or_else(|| {
                        GateError::Configuration(format!(
                            "table {}.{}: vindex {} not declared",
                            ks_name, table_name, cv.name
                        ))
                    })?;
                    let mut columns = cv.columns;
                    if let Some(column) = cv.column {
                        columns.insert(0, column);
                    }
                    if columns.is_empty() {
                        return Err(GateError::Configuration(format!(
                            "table {}.{}: vindex {} has no columns",
                            ks_name, table_name, cv.name
                        )));
                    }
                    table.column_vindexes.push(ColumnVindex {
                        columns,
                        vindex,
                        owned: owners.get(&cv.name) == Some(&table_name),
                    });
                }

                if ks_doc.sharded && table.column_vindexes.is_empty() {
                    return Err(GateError::Configuration(format!(
                        "table {}.{} in a sharded keyspace needs a primary vindex",
                        ks_name, table_name
                    )));
                }
                vschema.add_table(table);
            }

            if let Some(ks) = vschema.keyspaces.get_mut(&ks_name) {
                ks.vindexes = vindexes;
            }
        }

        debug!("loaded vschema with {} keyspaces", vschema.keyspaces.len());
        Ok(vschema)
    }

    /// Register a keyspace, returning the shared handle tables should point at
    pub fn add_keyspace(&mut self, name: &str, sharded: bool) -> Arc<Keyspace> {
        let keyspace = Arc::new(Keyspace {
            name: name.to_string(),
            sharded,
        });
        self.keyspaces.insert(
            name.to_string(),
            KeyspaceSchema {
                keyspace: keyspace.clone(),
                tables: BTreeMap::new(),
                vindexes: BTreeMap::new(),
            },
        );
        keyspace
    }

    /// Register a table under its keyspace, creating the keyspace entry if needed
    pub fn add_table(&mut self, table: Table) -> Arc<Table> {
        let table = Arc::new(table);
        let entry = self
            .keyspaces
            .entry(table.keyspace.name.clone())
            .or_insert_with(|| KeyspaceSchema {
                keyspace: table.keyspace.clone(),
                tables: BTreeMap::new(),
                vindexes: BTreeMap::new(),
            });
        for cv in &table.column_vindexes {
            entry
                .vindexes
                .entry(cv.name().to_string())
                .or_insert_with(|| cv.vindex.clone());
        }
        entry.tables.insert(table.name.clone(), table.clone());
        table
    }

    pub fn keyspace(&self, name: &str) -> Option<&KeyspaceSchema> {
        self.keyspaces.get(name)
    }

    pub fn keyspaces(&self) -> impl Iterator<Item = &KeyspaceSchema> {
        self.keyspaces.values()
    }

    fn lookup_in(&self, ks: &KeyspaceSchema, name: &str) -> Option<TableLookup> {
        if let Some(table) = ks.tables.get(name) {
            return Some(TableLookup {
                table: Some(table.clone()),
                vindex: None,
            });
        }
        ks.vindexes.get(name).map(|vindex| TableLookup {
            table: None,
            vindex: Some(vindex.clone()),
        })
    }
}

impl SchemaInformation for VSchema {
    fn find_table_or_vindex(&self, name: &TableName) -> GateResult<TableLookup> {
        if let Some(qualifier) = &name.qualifier {
            return self
                .keyspaces
                .get(qualifier)
                .and_then(|ks| self.lookup_in(ks, &name.name))
                .ok_or_else(|| SemanticError::TableNotFound(name.to_string()).into());
        }

        let mut found: Vec<TableLookup> = self
            .keyspaces
            .values()
            .filter_map(|ks| ks.tables.get(&name.name))
            .map(|table| TableLookup {
                table: Some(table.clone()),
                vindex: None,
            })
            .collect();
        if found.is_empty() {
            found = self
                .keyspaces
                .values()
                .filter_map(|ks| ks.vindexes.get(&name.name))
                .map(|vindex| TableLookup {
                    table: None,
                    vindex: Some(vindex.clone()),
                })
                .collect();
        }

        match found.len() {
            0 => Err(SemanticError::TableNotFound(name.to_string()).into()),
            1 => Ok(found.remove(0)),
            _ => Err(SemanticError::AmbiguousTable(name.to_string()).into()),
        }
    }
}
