use async_trait::async_trait;
use std::fmt;

use crate::engine::primitive::*;
use crate::engine::streams::MapStream;
use crate::utils::error::{ExecutionError, GateResult};
use crate::utils::types::{BindVars, ColumnMetadata, DataType, PlanValue, QueryResult, Row, Value};
use crate::vcursor::{BoxedRowStream, Vcursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
        };
        write!(f, "{}", symbol)
    }
}

/// Expression evaluated per input row
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionExpr {
    /// Offset into the input row
    Column(usize),
    Literal(Value),
    BindVar(String),
    Arithmetic {
        op: ArithmeticOp,
        left: Box<ProjectionExpr>,
        right: Box<ProjectionExpr>,
    },
}

impl ProjectionExpr {
    pub fn arithmetic(op: ArithmeticOp, left: ProjectionExpr, right: ProjectionExpr) -> Self {
        ProjectionExpr::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn evaluate(&self, row: &Row, bind_vars: &BindVars) -> GateResult<Value> {
        match self {
            ProjectionExpr::Column(index) => row.get(*index).cloned().ok_or_else(|| {
                ExecutionError::ColumnOutOfRange {
                    index: *index,
                    width: row.values.len(),
                }
                .into()
            }),
            ProjectionExpr::Literal(value) => Ok(value.clone()),
            ProjectionExpr::BindVar(name) => bind_value(name, bind_vars),
            ProjectionExpr::Arithmetic { op, left, right } => {
                let left = left.evaluate(row, bind_vars)?;
                let right = right.evaluate(row, bind_vars)?;
                arithmetic(*op, &left, &right)
            }
        }
    }

    fn data_type(&self, columns: &[ColumnMetadata], bind_vars: &BindVars) -> DataType {
        match self {
            ProjectionExpr::Column(index) => columns.get(*index).map(|c| c.data_type).unwrap_or(DataType::Null),
            ProjectionExpr::Literal(value) => value.data_type(),
            ProjectionExpr::BindVar(name) => bind_value(name, bind_vars)
                .map(|v| v.data_type())
                .unwrap_or(DataType::Null),
            ProjectionExpr::Arithmetic { left, right, .. } => {
                match (left.data_type(columns, bind_vars), right.data_type(columns, bind_vars)) {
                    (DataType::Float, _) | (_, DataType::Float) => DataType::Float,
                    (DataType::Decimal, _) | (_, DataType::Decimal) => DataType::Decimal,
                    (DataType::Unsigned, DataType::Unsigned) => DataType::Unsigned,
                    _ => DataType::Integer,
                }
            }
        }
    }
}

fn bind_value(name: &str, bind_vars: &BindVars) -> GateResult<Value> {
    PlanValue::Key(name.to_string()).resolve_value(bind_vars)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Unsigned(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        Value::Decimal(s) | Value::Text(s) => s.trim().parse().ok(),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// SQL arithmetic: NULL on either side gives NULL, integers stay exact until they overflow
pub fn arithmetic(op: ArithmeticOp, left: &Value, right: &Value) -> GateResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if op == ArithmeticOp::Add {
        return left.add(right);
    }
    let invalid = || ExecutionError::InvalidArithmetic(format!("cannot evaluate {} {} {}", left, op, right));
    if let (Value::Integer(_) | Value::Unsigned(_), Value::Integer(_) | Value::Unsigned(_)) = (left, right) {
        let (a, b) = (left.to_i64()?, right.to_i64()?);
        let exact = match op {
            ArithmeticOp::Sub => a.checked_sub(b),
            _ => a.checked_mul(b),
        };
        return exact.map(Value::Integer).ok_or_else(|| invalid().into());
    }
    let (a, b) = match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(invalid().into()),
    };
    Ok(Value::Float(match op {
        ArithmeticOp::Sub => a - b,
        _ => a * b,
    }))
}

/// Computes its output columns from the rows of its input
#[derive(Debug)]
pub struct Projection {
    pub cols: Vec<String>,
    pub exprs: Vec<ProjectionExpr>,
    pub input: Box<dyn Primitive>,
}

impl Projection {
    pub fn new(cols: Vec<String>, exprs: Vec<ProjectionExpr>, input: Box<dyn Primitive>) -> Self {
        Self { cols, exprs, input }
    }
}

fn project(
    cols: &[String],
    exprs: &[ProjectionExpr],
    bind_vars: &BindVars,
    input: QueryResult,
    with_fields: bool,
) -> GateResult<QueryResult> {
    let mut result = QueryResult::new();
    result.rows_affected = input.rows_affected;
    if with_fields {
        result.columns = cols
            .iter()
            .zip(exprs)
            .map(|(name, expr)| ColumnMetadata::new(name, expr.data_type(&input.columns, bind_vars)))
            .collect();
    }
    result.rows = input
        .rows
        .iter()
        .map(|row| {
            exprs
                .iter()
                .map(|expr| expr.evaluate(row, bind_vars))
                .collect::<GateResult<Vec<_>>>()
                .map(Row::new)
        })
        .collect::<GateResult<Vec<_>>>()?;
    Ok(result)
}

#[async_trait]
impl Primitive for Projection {
    fn route_type(&self) -> &'static str {
        "Projection"
    }

    fn keyspace_name(&self) -> Option<&str> {
        self.input.keyspace_name()
    }

    fn table_name(&self) -> Option<&str> {
        self.input.table_name()
    }

    fn inputs(&self) -> Vec<&dyn Primitive> {
        vec![self.input.as_ref()]
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        let input = self.input.execute(ctx, vcursor, bind_vars, want_fields).await?;
        project(&self.cols, &self.exprs, bind_vars, input, want_fields)
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.input.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for Projection {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let inner = require_streaming(self.input.as_ref())?
            .stream_execute(ctx, vcursor, bind_vars, want_fields)
            .await?;
        let (cols, exprs, vars) = (self.cols.clone(), self.exprs.clone(), bind_vars.clone());
        // fields go out with the first batch only
        let mut fields_pending = want_fields;
        Ok(Box::new(MapStream::new(inner, move |batch| {
            let with_fields = std::mem::take(&mut fields_pending);
            project(&cols, &exprs, &vars, batch, with_fields)
        })))
    }
}
