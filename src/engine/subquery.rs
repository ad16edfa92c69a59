use async_trait::async_trait;
use std::collections::HashMap;

use crate::engine::primitive::*;
use crate::engine::streams::MapStream;
use crate::utils::error::{ExecutionError, GateResult};
use crate::utils::types::{BindVars, QueryResult, Row};
use crate::vcursor::{BoxedRowStream, Vcursor};

/// Derived table: keeps only the listed columns of its input, in the listed order
#[derive(Debug)]
pub struct SubQuery {
    pub cols: Vec<usize>,
    pub input: Box<dyn Primitive>,
}

impl SubQuery {
    pub fn new(cols: Vec<usize>, input: Box<dyn Primitive>) -> Self {
        Self { cols, input }
    }
}

fn pick_columns(cols: &[usize], mut result: QueryResult) -> GateResult<QueryResult> {
    if !result.columns.is_empty() {
        result.columns = cols
            .iter()
            .map(|c| {
                result.columns.get(*c).cloned().ok_or_else(|| {
                    ExecutionError::ColumnOutOfRange {
                        index: *c,
                        width: result.columns.len(),
                    }
                    .into()
                })
            })
            .collect::<GateResult<Vec<_>>>()?;
    }
    for row in &mut result.rows {
        let picked = cols
            .iter()
            .map(|c| {
                row.values.get(*c).cloned().ok_or_else(|| {
                    ExecutionError::ColumnOutOfRange {
                        index: *c,
                        width: row.values.len(),
                    }
                    .into()
                })
            })
            .collect::<GateResult<Vec<_>>>()?;
        *row = Row::new(picked);
    }
    Ok(result)
}

#[async_trait]
impl Primitive for SubQuery {
    fn route_type(&self) -> &'static str {
        "SubQuery"
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
        let result = self.input.execute(ctx, vcursor, bind_vars, want_fields).await?;
        pick_columns(&self.cols, result)
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.input.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }

    fn as_batched(&self) -> Option<&dyn BatchPrimitive> {
        self.input.as_batched().map(|_| self as &dyn BatchPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for SubQuery {
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
        let cols = self.cols.clone();
        Ok(Box::new(MapStream::new(inner, move |batch| pick_columns(&cols, batch))))
    }
}

#[async_trait]
impl BatchPrimitive for SubQuery {
    async fn resolve_shard_query(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery> {
        require_batched(self.input.as_ref())?
            .resolve_shard_query(ctx, vcursor, bind_vars, switch_table_map)
            .await
    }

    fn merge_result(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        result: QueryResult,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        let merged = require_batched(self.input.as_ref())?.merge_result(ctx, vcursor, result, bind_vars, want_fields)?;
        pick_columns(&self.cols, merged)
    }
}
