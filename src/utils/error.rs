use thiserror::Error;

/// Main error type for the shardgate engine
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Semantic error: {0}")]
    Semantic(#[from] SemanticError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Vcursor error: {0}")]
    Vcursor(#[from] VcursorError),

    #[error("Query parsing error: {0}")]
    QueryParsing(#[from] QueryParsingError),

    #[error("{operation} is not supported by {primitive}")]
    Unsupported { primitive: String, operation: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Feature-not-supported signal for an operator invoked outside its capabilities
    pub fn unsupported(primitive: &str, operation: &str) -> Self {
        GateError::Unsupported {
            primitive: primitive.to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Errors raised while binding and checking a statement
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("Column '{0}' in field list is ambiguous")]
    AmbiguousColumn(String),

    #[error("symbol {0} not found")]
    ColumnNotFound(String),

    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("Not unique table/alias: '{0}'")]
    NotUniqueTable(String),

    #[error("ambiguous table reference: {0}")]
    AmbiguousTable(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("The used SELECT statements have a different number of columns: {left}, {right}")]
    UnionColumnsMismatch { left: usize, right: usize },

    #[error("Unknown column '{position}' in '{clause}'")]
    InvalidPosition { clause: String, position: String },
}

/// How far an analysis error reaches.
///
/// Deferred kinds are stored on the semantic table so a planner can still pick a plan they do not affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    /// Analysis cannot produce a usable result
    Fatal,
    /// The statement cannot be sent to a single route as is
    NotSingleRoute,
    /// The statement can only be planned against an unsharded keyspace
    NotUnsharded,
}

/// Errors raised while computing shard targets
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutingError {
    #[error("keyspace {keyspace}: expected {expected} shard(s) for {opcode}, got {actual}")]
    UnexpectedShardCount {
        keyspace: String,
        opcode: String,
        expected: usize,
        actual: usize,
    },

    #[error("can't use more than one keyspace per system table query")]
    MultipleKeyspaces,

    #[error("keyspace {0} not found")]
    KeyspaceNotFound(String),

    #[error("vindex mapping failed: {0}")]
    VindexMapping(String),

    #[error("{opcode} route on table {table} requires a vindex")]
    MissingVindex { opcode: String, table: String },

    #[error("invalid routing value: {0}")]
    InvalidValue(String),
}

/// Errors raised while executing or merging results
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("The used SELECT statements have a different number of columns: {left}, {right}")]
    ColumnCountMismatch { left: usize, right: usize },

    #[error("column field type does not match for column {index}: ({left}, {right})")]
    ColumnTypeMismatch {
        index: usize,
        left: String,
        right: String,
    },

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("{0} is not allowed for read only connection")]
    ReadOnly(String),

    #[error("subquery returned more than one row")]
    SubqueryMoreThanOneRow,

    #[error("subquery returned more than one column")]
    SubqueryMoreThanOneColumn,

    #[error("values for rows {rows:?} do not map to their keyspace ids")]
    VindexMismatch { rows: Vec<usize> },

    #[error("could not compare values: {0}")]
    Comparison(String),

    #[error("in-memory row count exceeded allowed limit of {0}")]
    RowLimitExceeded(usize),

    #[error("missing bind var {0}")]
    MissingBindVariable(String),

    #[error("invalid arithmetic: {0}")]
    InvalidArithmetic(String),

    #[error("column offset {index} out of range for row of width {width}")]
    ColumnOutOfRange { index: usize, width: usize },
}

/// Errors surfaced by the execution boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VcursorError {
    #[error("shard {keyspace}/{shard}: {message}")]
    ShardExecution {
        keyspace: String,
        shard: String,
        message: String,
    },

    #[error("destination resolution failed: {0}")]
    Destination(String),

    #[error("sequence fetch failed: {0}")]
    Sequence(String),

    #[error("stream already closed")]
    StreamClosed,
}

/// Errors raised while turning SQL text into a statement
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryParsingError {
    #[error("Invalid SQL syntax: {0}")]
    InvalidSyntax(String),

    #[error("Unsupported SQL feature: {0}")]
    UnsupportedFeature(String),
}

/// Result type alias for engine operations
pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_error_from_semantic_error() {
        let semantic = SemanticError::AmbiguousColumn("id".to_string());
        let error: GateError = semantic.into();

        match error {
            GateError::Semantic(SemanticError::AmbiguousColumn(col)) => assert_eq!(col, "id"),
            _ => panic!("Expected Semantic error"),
        }
    }

    #[test]
    fn test_gate_error_from_routing_error() {
        let error: GateError = RoutingError::MultipleKeyspaces.into();
        assert!(matches!(error, GateError::Routing(RoutingError::MultipleKeyspaces)));
        assert!(error
            .to_string()
            .contains("can't use more than one keyspace per system table query"));
    }

    #[test]
    fn test_unexpected_shard_count_names_context() {
        let error = RoutingError::UnexpectedShardCount {
            keyspace: "main".to_string(),
            opcode: "Unsharded".to_string(),
            expected: 1,
            actual: 2,
        };
        let message = error.to_string();
        assert!(message.contains("main"));
        assert!(message.contains("Unsharded"));
        assert!(message.contains("got 2"));
    }

    #[test]
    fn test_unsupported_display() {
        let error = GateError::unsupported("PulloutSubquery", "merge_result");
        assert_eq!(error.to_string(), "merge_result is not supported by PulloutSubquery");
    }

    #[test]
    fn test_column_type_mismatch_names_column() {
        let error = ExecutionError::ColumnTypeMismatch {
            index: 2,
            left: "Integer".to_string(),
            right: "Text".to_string(),
        };
        assert!(error.to_string().contains("column 2"));
    }

    #[test]
    fn test_gate_result_type() {
        let success: GateResult<String> = Ok("success".to_string());
        let failure: GateResult<String> = Err(GateError::Internal("test error".to_string()));

        assert!(success.is_ok());
        match failure {
            Err(GateError::Internal(msg)) => assert_eq!(msg, "test error"),
            _ => panic!("Expected Internal error"),
        }
    }
}
