use std::collections::HashMap;

use crate::semantics::table_info::TableInfo;
use crate::semantics::table_set::TableSet;
use crate::utils::error::SemanticError;

pub type ScopeId = usize;

/// Tables visible at one point of a statement
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub tables: Vec<TableInfo>,
    /// Columns named in `JOIN ... USING`, with the tables they join
    pub using: HashMap<String, TableSet>,
}

impl Scope {
    /// Make a table visible, rejecting a second table under the same name
    pub fn add_table(&mut self, table: TableInfo) -> Result<(), SemanticError> {
        if let Some(name) = table.visible_name() {
            let taken = self
                .tables
                .iter()
                .filter_map(TableInfo::visible_name)
                .any(|existing| existing.name == name.name);
            if taken {
                return Err(SemanticError::NotUniqueTable(name.name));
            }
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn add_using(&mut self, column: &str, tables: &TableSet) {
        self.using
            .entry(column.to_ascii_lowercase())
            .or_default()
            .merge_in_place(tables);
    }
}

/// Arena of the scopes created while walking one statement.
///
/// Scopes link to their parent by id; a parent is always created before its children.
#[derive(Debug, Default)]
pub struct Scoper {
    scopes: Vec<Scope>,
}

impl Scoper {
    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(Scope {
            parent,
            ..Scope::default()
        });
        self.scopes.len() - 1
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }

    /// Scope ids from `id` outward to the root
    pub fn chain(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![id];
        let mut current = self.scopes[id].parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.scopes[parent].parent;
        }
        chain
    }

    /// Tables joined on `column` by the innermost USING clause that names it
    pub fn using_tables(&self, id: ScopeId, column: &str) -> Option<&TableSet> {
        let column = column.to_ascii_lowercase();
        self.chain(id)
            .into_iter()
            .find_map(|scope| self.scopes[scope].using.get(&column))
    }

    /// Move the tables and USING columns of `from` into `into`
    pub fn merge_into(&mut self, from: ScopeId, into: ScopeId) -> Result<(), SemanticError> {
        let moved = std::mem::take(&mut self.scopes[from]);
        self.scopes[from].parent = moved.parent;
        for table in moved.tables {
            self.scopes[into].add_table(table)?;
        }
        for (column, tables) in moved.using {
            self.scopes[into].add_using(&column, &tables);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantics::table_info::DerivedTable;
    use crate::sql::ast::NodeId;

    fn derived(alias: &str, offset: usize) -> TableInfo {
        TableInfo::Derived(DerivedTable {
            node: NodeId::fresh(),
            ts: TableSet::single(offset),
            alias: alias.to_string(),
            column_names: Vec::new(),
            cols: Vec::new(),
            tables: TableSet::empty(),
            has_star: false,
        })
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut scope = Scope::default();
        scope.add_table(derived("a", 0)).unwrap();
        match scope.add_table(derived("a", 1)) {
            Err(SemanticError::NotUniqueTable(name)) => assert_eq!(name, "a"),
            other => panic!("Expected not unique table, got {:?}", other),
        }
    }

    #[test]
    fn test_chain_and_using_lookup() {
        let mut scoper = Scoper::default();
        let root = scoper.new_scope(None);
        let child = scoper.new_scope(Some(root));
        let grandchild = scoper.new_scope(Some(child));
        assert_eq!(scoper.chain(grandchild), vec![grandchild, child, root]);

        scoper.scope_mut(root).add_using("ID", &TableSet::from_offsets([0, 1]));
        assert_eq!(
            scoper.using_tables(grandchild, "id"),
            Some(&TableSet::from_offsets([0, 1]))
        );
        assert!(scoper.using_tables(grandchild, "name").is_none());
    }

    #[test]
    fn test_merge_into_moves_tables() {
        let mut scoper = Scoper::default();
        let select = scoper.new_scope(None);
        let join = scoper.new_scope(None);
        scoper.scope_mut(join).add_table(derived("a", 0)).unwrap();
        scoper.scope_mut(join).add_using("x", &TableSet::single(0));

        scoper.merge_into(join, select).unwrap();
        assert_eq!(scoper.scope(select).tables.len(), 1);
        assert!(scoper.scope(join).tables.is_empty());
        assert!(scoper.scope(select).using.contains_key("x"));

        scoper.scope_mut(join).add_table(derived("a", 2)).unwrap();
        assert!(scoper.merge_into(join, select).is_err());
    }
}
