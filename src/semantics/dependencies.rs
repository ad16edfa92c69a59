use crate::semantics::table_set::TableSet;
use crate::utils::error::SemanticError;
use crate::utils::types::DataType;

/// Tables an expression reads, directly and through derived tables
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dependency {
    pub direct: TableSet,
    pub recursive: TableSet,
    pub typ: Option<DataType>,
}

impl Dependency {
    pub fn new(direct: TableSet, recursive: TableSet, typ: Option<DataType>) -> Self {
        Self {
            direct,
            recursive,
            typ,
        }
    }

    fn merged(&self, other: &Dependency) -> Dependency {
        Dependency {
            direct: self.direct.merge(&other.direct),
            recursive: self.recursive.merge(&other.recursive),
            typ: self.typ.or(other.typ),
        }
    }
}

/// Outcome of resolving one column against candidate tables.
///
/// Ambiguity is recorded while candidates are merged and only raised by [`Dependencies::get`],
/// so a scan over every table of a scope can finish before failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Dependencies {
    /// No candidate provides the column
    Nothing,
    /// An authoritative table provides the column
    Certain { dep: Dependency, ambiguous: bool },
    /// A table without a full column list may provide the column
    Uncertain { dep: Dependency, fail: bool },
}

impl Dependencies {
    pub fn certain(direct: TableSet, recursive: TableSet, typ: Option<DataType>) -> Self {
        Dependencies::Certain {
            dep: Dependency::new(direct, recursive, typ),
            ambiguous: false,
        }
    }

    pub fn uncertain(direct: TableSet, recursive: TableSet, typ: Option<DataType>) -> Self {
        Dependencies::Uncertain {
            dep: Dependency::new(direct, recursive, typ),
            fail: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Dependencies::Nothing)
    }

    /// The merged dependency, ignoring any recorded ambiguity
    pub fn dependency(&self) -> Option<&Dependency> {
        match self {
            Dependencies::Nothing => None,
            Dependencies::Certain { dep, .. } | Dependencies::Uncertain { dep, .. } => Some(dep),
        }
    }

    /// Materialize the dependency of `column`; `Nothing` yields an empty dependency
    pub fn get(&self, column: &str) -> Result<Dependency, SemanticError> {
        match self {
            Dependencies::Nothing => Ok(Dependency::default()),
            Dependencies::Certain { ambiguous: true, .. } | Dependencies::Uncertain { fail: true, .. } => {
                Err(SemanticError::AmbiguousColumn(column.to_string()))
            }
            Dependencies::Certain { dep, .. } | Dependencies::Uncertain { dep, .. } => Ok(dep.clone()),
        }
    }

    /// Combine the candidates of two tables.
    ///
    /// Recursive table sets are compared by value in both the certain and the uncertain path.
    pub fn merge(self, other: Dependencies, allow_multi: bool) -> Dependencies {
        match (self, other) {
            (Dependencies::Nothing, other) | (other, Dependencies::Nothing) => other,
            (
                Dependencies::Certain { dep: d1, ambiguous: a1 },
                Dependencies::Certain { dep: d2, ambiguous: a2 },
            ) => {
                if d1.recursive == d2.recursive {
                    return Dependencies::Certain {
                        dep: d1,
                        ambiguous: a1 || a2,
                    };
                }
                Dependencies::Certain {
                    dep: d1.merged(&d2),
                    ambiguous: a1 || a2 || !allow_multi,
                }
            }
            (certain @ Dependencies::Certain { .. }, Dependencies::Uncertain { .. })
            | (Dependencies::Uncertain { .. }, certain @ Dependencies::Certain { .. }) => certain,
            (Dependencies::Uncertain { dep: d1, fail: f1 }, Dependencies::Uncertain { dep: d2, fail: f2 }) => {
                let differs = d1.recursive != d2.recursive;
                Dependencies::Uncertain {
                    dep: d1,
                    fail: f1 || f2 || differs,
                }
            }
        }
    }
}
