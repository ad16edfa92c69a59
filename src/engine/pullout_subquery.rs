use async_trait::async_trait;
use tracing::debug;

use crate::engine::primitive::*;
use crate::semantics::PulloutOpcode;
use crate::utils::error::{ExecutionError, GateResult};
use crate::utils::types::{BindValue, BindVars, QueryResult, Value};
use crate::vcursor::{BoxedRowStream, Vcursor};

/// Runs an uncorrelated subquery first and hands its result to the underlying plan as bind
/// variables.
///
/// `subquery_result` carries the scalar or the value list; `has_values` tells IN/NOT IN and
/// EXISTS plans whether the subquery produced anything.
#[derive(Debug)]
pub struct PulloutSubquery {
    pub opcode: PulloutOpcode,
    pub subquery_result: String,
    pub has_values: String,
    pub subquery: Box<dyn Primitive>,
    pub underlying: Box<dyn Primitive>,
}

impl PulloutSubquery {
    pub fn new(
        opcode: PulloutOpcode,
        subquery_result: &str,
        has_values: &str,
        subquery: Box<dyn Primitive>,
        underlying: Box<dyn Primitive>,
    ) -> Self {
        Self {
            opcode,
            subquery_result: subquery_result.to_string(),
            has_values: has_values.to_string(),
            subquery,
            underlying,
        }
    }

    /// Execute the subquery and return the bind variables the underlying plan runs with
    pub async fn execute_subquery(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<BindVars> {
        let result = self.subquery.execute(ctx, vcursor, bind_vars, false).await?;
        debug!(opcode = %self.opcode, rows = result.rows.len(), "pullout subquery");
        let mut combined = bind_vars.clone();
        for (name, value) in self.bind_results(result)? {
            combined.insert(name, value);
        }
        Ok(combined)
    }

    fn bind_results(&self, result: QueryResult) -> GateResult<Vec<(String, BindValue)>> {
        let flag = |present: bool| (self.has_values.clone(), BindValue::Single(Value::Integer(i64::from(present))));
        match self.opcode {
            PulloutOpcode::Value => {
                let value = match result.rows.as_slice() {
                    [] => Value::Null,
                    [row] => single_column(row.values.as_slice())?,
                    _ => return Err(ExecutionError::SubqueryMoreThanOneRow.into()),
                };
                Ok(vec![(self.subquery_result.clone(), BindValue::Single(value))])
            }
            PulloutOpcode::In | PulloutOpcode::NotIn => {
                if result.rows.is_empty() {
                    // never read downstream: the plan checks has_values first
                    return Ok(vec![
                        flag(false),
                        (self.subquery_result.clone(), BindValue::Tuple(vec![Value::Integer(0)])),
                    ]);
                }
                let values = result
                    .rows
                    .iter()
                    .map(|row| single_column(row.values.as_slice()))
                    .collect::<GateResult<Vec<_>>>()?;
                Ok(vec![flag(true), (self.subquery_result.clone(), BindValue::Tuple(values))])
            }
            PulloutOpcode::Exists => Ok(vec![flag(!result.rows.is_empty())]),
        }
    }
}

fn single_column(values: &[Value]) -> GateResult<Value> {
    match values {
        [value] => Ok(value.clone()),
        _ => Err(ExecutionError::SubqueryMoreThanOneColumn.into()),
    }
}

#[async_trait]
impl Primitive for PulloutSubquery {
    fn route_type(&self) -> &'static str {
        "PulloutSubquery"
    }

    fn inputs(&self) -> Vec<&dyn Primitive> {
        vec![self.subquery.as_ref(), self.underlying.as_ref()]
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        let combined = self.execute_subquery(ctx, vcursor, bind_vars).await?;
        self.underlying.execute(ctx, vcursor, &combined, want_fields).await
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.underlying.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for PulloutSubquery {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let underlying = require_streaming(self.underlying.as_ref())?;
        let combined = self.execute_subquery(ctx, vcursor, bind_vars).await?;
        underlying.stream_execute(ctx, vcursor, &combined, want_fields).await
    }
}
