use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::utils::error::{ExecutionError, GateResult};

/// Supported column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Null,
    Integer,
    Unsigned,
    Float,
    Decimal,
    Text,
    Binary,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl DataType {
    /// Whether values of this type take part in numeric comparison and arithmetic
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Unsigned | DataType::Float | DataType::Decimal
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Individual cell values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Decimal(String),
    Text(String),
    Binary(Vec<u8>),
    Boolean(bool),
    Date(String),     // ISO 8601 format
    DateTime(String), // ISO 8601 format
    Json(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Integer(_) => DataType::Integer,
            Value::Unsigned(_) => DataType::Unsigned,
            Value::Float(_) => DataType::Float,
            Value::Decimal(_) => DataType::Decimal,
            Value::Text(_) => DataType::Text,
            Value::Binary(_) => DataType::Binary,
            Value::Boolean(_) => DataType::Boolean,
            Value::Date(_) => DataType::Date,
            Value::DateTime(_) => DataType::DateTime,
            Value::Json(_) => DataType::Json,
        }
    }

    /// Interpret the value as a signed integer, accepting numeric text
    pub fn to_i64(&self) -> GateResult<i64> {
        let invalid = || ExecutionError::InvalidArithmetic(format!("{} is not an integer", self));
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Unsigned(u) => i64::try_from(*u).map_err(|_| invalid().into()),
            Value::Boolean(b) => Ok(i64::from(*b)),
            Value::Text(s) | Value::Decimal(s) => s.trim().parse::<i64>().map_err(|_| invalid().into()),
            _ => Err(invalid().into()),
        }
    }

    /// Interpret the value as a float when it belongs to the numeric family
    fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Unsigned(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(s) => s.parse::<f64>().ok(),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        self.data_type().is_numeric() || matches!(self, Value::Boolean(_))
    }

    /// Compare two values with NULL sorting before everything else.
    ///
    /// Numeric kinds compare across widths; text-like kinds compare bytewise.
    /// Any other pairing is an error rather than an arbitrary order.
    pub fn null_safe_compare(&self, other: &Value) -> GateResult<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Less),
            (_, Value::Null) => Ok(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Unsigned(a), Value::Unsigned(b)) => Ok(a.cmp(b)),
            (Value::Integer(a), Value::Unsigned(b)) => Ok(if *a < 0 {
                Ordering::Less
            } else {
                (*a as u64).cmp(b)
            }),
            (Value::Unsigned(a), Value::Integer(b)) => Ok(if *b < 0 {
                Ordering::Greater
            } else {
                a.cmp(&(*b as u64))
            }),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.to_f64(), b.to_f64());
                match (x, y) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                        ExecutionError::Comparison(format!("{} and {} are unordered", a, b)).into()
                    }),
                    _ => Err(ExecutionError::Comparison(format!("{} and {} are not numbers", a, b)).into()),
                }
            }
            (Value::Text(a), Value::Text(b))
            | (Value::Date(a), Value::Date(b))
            | (Value::DateTime(a), Value::DateTime(b))
            | (Value::Json(a), Value::Json(b)) => Ok(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Ok(a.cmp(b)),
            (Value::Text(a), Value::Binary(b)) => Ok(a.as_bytes().cmp(b.as_slice())),
            (Value::Binary(a), Value::Text(b)) => Ok(a.as_slice().cmp(b.as_bytes())),
            (a, b) => Err(ExecutionError::Comparison(format!(
                "types are not comparable: {} vs {}",
                a.data_type(),
                b.data_type()
            ))
            .into()),
        }
    }

    /// NULL-tolerant addition used by SUM folds: NULL is the identity
    pub fn add(&self, other: &Value) -> GateResult<Value> {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => Ok(v.clone()),
            (Value::Integer(a), Value::Integer(b)) => Ok(a
                .checked_add(*b)
                .map(Value::Integer)
                .unwrap_or_else(|| Value::Decimal((*a as i128 + *b as i128).to_string()))),
            (Value::Unsigned(a), Value::Unsigned(b)) => Ok(a
                .checked_add(*b)
                .map(Value::Unsigned)
                .unwrap_or_else(|| Value::Decimal((*a as u128 + *b as u128).to_string()))),
            (Value::Float(_), _) | (_, Value::Float(_)) => match (self.to_f64(), other.to_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(ExecutionError::InvalidArithmetic(format!("cannot add {} and {}", self, other)).into()),
            },
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.to_f64(), b.to_f64()) {
                (Some(x), Some(y)) => Ok(Value::Decimal(format_decimal(x + y))),
                _ => Err(ExecutionError::InvalidArithmetic(format!("cannot add {} and {}", a, b)).into()),
            },
            (a, b) => Err(ExecutionError::InvalidArithmetic(format!("cannot add {} and {}", a, b)).into()),
        }
    }

    /// Render the value as a SQL literal for substitution into query text
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Unsigned(u) => u.to_string(),
            Value::Float(f) => format!("{:?}", f),
            Value::Decimal(d) => d.clone(),
            Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Binary(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                format!("X'{}'", hex)
            }
            Value::Text(s) | Value::Date(s) | Value::DateTime(s) | Value::Json(s) => quote_sql_string(s),
        }
    }

    /// Convert a JSON fixture cell into a value
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Unsigned(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.to_string()),
        }
    }
}

fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn quote_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Unsigned(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Binary(b) => write!(f, "<binary: {} bytes>", b.len()),
            Value::Decimal(s) | Value::Text(s) | Value::Date(s) | Value::DateTime(s) | Value::Json(s) => {
                write!(f, "{}", s)
            }
        }
    }
}

/// Metadata for result columns
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnMetadata {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable: true,
        }
    }
}

/// A row of data in query results
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    /// Create a new row with the given values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Query execution result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
    pub insert_id: u64,
    pub execution_time: Duration,
}

impl QueryResult {
    /// Create a new empty result
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: 0,
            insert_id: 0,
            execution_time: Duration::from_millis(0),
        }
    }

    /// Create an empty result carrying only field metadata
    pub fn with_columns(columns: Vec<ColumnMetadata>) -> Self {
        Self {
            columns,
            ..Self::new()
        }
    }

    /// Get the number of rows in the result
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop helper columns appended for sorting or routing.
    ///
    /// A count of zero, or one not smaller than the current width, leaves the result untouched.
    pub fn truncate_columns(mut self, count: usize) -> Self {
        if count == 0 {
            return self;
        }
        if self.columns.len() > count {
            self.columns.truncate(count);
        }
        for row in &mut self.rows {
            if row.values.len() > count {
                row.values.truncate(count);
            }
        }
        self
    }

    /// Append another partial result, adopting its fields if this one has none
    pub fn append(&mut self, other: QueryResult) {
        if self.columns.is_empty() {
            self.columns = other.columns;
        }
        self.rows_affected += other.rows_affected;
        if self.insert_id == 0 {
            self.insert_id = other.insert_id;
        }
        self.rows.extend(other.rows);
    }
}

impl Default for QueryResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A named placeholder value
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Single(Value),
    Tuple(Vec<Value>),
}

/// Bind variables of one execution
pub type BindVars = HashMap<String, BindValue>;

/// Query text plus the variables bound when it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub bind_vars: BindVars,
    /// Advisory limit handed to the execution layer; operators never enforce it
    pub timeout: Option<Duration>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>, bind_vars: BindVars) -> Self {
        Self {
            sql: sql.into(),
            bind_vars,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A value in a plan that is either known statically or read from bind variables
#[derive(Debug, Clone, PartialEq)]
pub enum PlanValue {
    Key(String),
    ListKey(String),
    Value(Value),
    List(Vec<PlanValue>),
}

impl PlanValue {
    pub fn is_list(&self) -> bool {
        matches!(self, PlanValue::ListKey(_) | PlanValue::List(_))
    }

    /// Resolve to a single value
    pub fn resolve_value(&self, bind_vars: &BindVars) -> GateResult<Value> {
        match self {
            PlanValue::Value(v) => Ok(v.clone()),
            PlanValue::Key(name) => match bind_vars.get(name) {
                Some(BindValue::Single(v)) => Ok(v.clone()),
                Some(BindValue::Tuple(_)) => Err(ExecutionError::InvalidArithmetic(format!(
                    "bind var {} is a list where a single value was expected",
                    name
                ))
                .into()),
                None => Err(ExecutionError::MissingBindVariable(name.clone()).into()),
            },
            PlanValue::ListKey(_) | PlanValue::List(_) => Err(ExecutionError::InvalidArithmetic(
                "a list was supplied where a single value was expected".to_string(),
            )
            .into()),
        }
    }

    /// Resolve to a list of values
    pub fn resolve_list(&self, bind_vars: &BindVars) -> GateResult<Vec<Value>> {
        match self {
            PlanValue::List(items) => items.iter().map(|item| item.resolve_value(bind_vars)).collect(),
            PlanValue::ListKey(name) | PlanValue::Key(name) => match bind_vars.get(name) {
                Some(BindValue::Tuple(values)) => Ok(values.clone()),
                Some(BindValue::Single(_)) => Err(ExecutionError::InvalidArithmetic(format!(
                    "bind var {} is a single value where a list was expected",
                    name
                ))
                .into()),
                None => Err(ExecutionError::MissingBindVariable(name.clone()).into()),
            },
            PlanValue::Value(_) => Err(ExecutionError::InvalidArithmetic(
                "a single value was supplied where a list was expected".to_string(),
            )
            .into()),
        }
    }
}
