use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::engine::primitive::*;
use crate::utils::error::{ExecutionError, GateResult, VcursorError};
use crate::utils::types::{BindValue, BindVars, PlanValue, QueryResult, Value};
use crate::vcursor::{collect_stream, BoxedRowStream, RowStream, Vcursor};

/// Bind variable telling inputs how many rows the limit can use at most
pub const UPPER_LIMIT_BIND_VAR: &str = "__upper_limit";

/// Applies LIMIT count OFFSET offset over its input
#[derive(Debug)]
pub struct Limit {
    pub count: PlanValue,
    pub offset: Option<PlanValue>,
    pub input: Box<dyn Primitive>,
}

impl Limit {
    pub fn new(count: PlanValue, input: Box<dyn Primitive>) -> Self {
        Self {
            count,
            offset: None,
            input,
        }
    }

    pub fn with_offset(mut self, offset: PlanValue) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Resolve count and offset, rejecting anything that is not a non-negative integer
    pub fn fetch_count_offset(&self, bind_vars: &BindVars) -> GateResult<(u64, u64)> {
        let count = resolve_bound(&self.count, bind_vars, "count")?;
        let offset = match &self.offset {
            Some(offset) => resolve_bound(offset, bind_vars, "offset")?,
            None => 0,
        };
        Ok((count, offset))
    }

    fn input_bind_vars(bind_vars: &BindVars, count: u64, offset: u64) -> BindVars {
        let upper = count.saturating_add(offset);
        with_bind_var(bind_vars, UPPER_LIMIT_BIND_VAR, BindValue::Single(Value::Unsigned(upper)))
    }

    fn deep_paginated(&self, ctx: &ExecContext, offset: u64) -> bool {
        offset > ctx.deep_pagination_threshold && self.input.as_streaming().is_some()
    }
}

fn resolve_bound(value: &PlanValue, bind_vars: &BindVars, what: &str) -> GateResult<u64> {
    let resolved = value.resolve_value(bind_vars)?;
    let number = resolved
        .to_i64()
        .map_err(|_| ExecutionError::InvalidLimit(format!("{} {} is not an integer", what, resolved)))?;
    u64::try_from(number).map_err(|_| ExecutionError::InvalidLimit(format!("{} {} is negative", what, number)).into())
}

/// Keep rows `[offset, offset + count)`; a short result keeps whatever lies past the offset
fn slice_result(mut result: QueryResult, count: u64, offset: u64) -> QueryResult {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(result.rows.len());
    let end = start
        .saturating_add(usize::try_from(count).unwrap_or(usize::MAX))
        .min(result.rows.len());
    result.rows.truncate(end);
    result.rows.drain(..start);
    result.rows_affected = result.rows.len() as u64;
    result
}

#[async_trait]
impl Primitive for Limit {
    fn route_type(&self) -> &'static str {
        "Limit"
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
        let (count, offset) = self.fetch_count_offset(bind_vars)?;
        if self.deep_paginated(ctx, offset) {
            debug!(count, offset, "deep pagination, streaming past the offset");
            let mut stream = self.stream_execute(ctx, vcursor, bind_vars, want_fields).await?;
            let mut result = collect_stream(&mut stream, want_fields).await?;
            result.rows_affected = result.rows.len() as u64;
            return Ok(result);
        }

        let input_vars = Self::input_bind_vars(bind_vars, count, offset);
        let result = self.input.execute(ctx, vcursor, &input_vars, want_fields).await?;
        Ok(slice_result(result, count, offset))
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.input.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }

    fn as_batched(&self) -> Option<&dyn BatchPrimitive> {
        self.input.as_batched().map(|_| self as &dyn BatchPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for Limit {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let (count, offset) = self.fetch_count_offset(bind_vars)?;
        let input_vars = Self::input_bind_vars(bind_vars, count, offset);
        let inner = require_streaming(self.input.as_ref())?
            .stream_execute(ctx, vcursor, &input_vars, want_fields)
            .await?;
        Ok(Box::new(LimitStream::new(inner, count, offset)))
    }
}

#[async_trait]
impl BatchPrimitive for Limit {
    async fn resolve_shard_query(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery> {
        let (count, offset) = self.fetch_count_offset(bind_vars)?;
        let input_vars = Self::input_bind_vars(bind_vars, count, offset);
        require_batched(self.input.as_ref())?
            .resolve_shard_query(ctx, vcursor, &input_vars, switch_table_map)
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
        let (count, offset) = self.fetch_count_offset(bind_vars)?;
        let input_vars = Self::input_bind_vars(bind_vars, count, offset);
        let merged = require_batched(self.input.as_ref())?.merge_result(ctx, vcursor, result, &input_vars, want_fields)?;
        Ok(slice_result(merged, count, offset))
    }
}

/// Skips `offset` rows then yields at most `count`, closing its input once satisfied
pub struct LimitStream {
    inner: BoxedRowStream,
    remaining_offset: u64,
    remaining_count: u64,
    pending_fields: Option<QueryResult>,
    fields_seen: bool,
    done: bool,
    closed: bool,
}

impl LimitStream {
    pub fn new(inner: BoxedRowStream, count: u64, offset: u64) -> Self {
        Self {
            inner,
            remaining_offset: offset,
            remaining_count: count,
            pending_fields: None,
            fields_seen: false,
            done: false,
            closed: false,
        }
    }

    async fn finish(&mut self) -> GateResult<()> {
        if !self.done {
            self.done = true;
            self.inner.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RowStream for LimitStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        loop {
            if self.done || (self.remaining_count == 0 && self.fields_seen) {
                self.finish().await?;
                // fields of a fully skipped input still reach the caller once
                return Ok(self.pending_fields.take());
            }
            let ask_fields = want_fields && !self.fields_seen;
            self.fields_seen = true;
            let Some(mut batch) = self.inner.fetch(ask_fields).await? else {
                self.finish().await?;
                return Ok(self.pending_fields.take());
            };
            if ask_fields && !batch.columns.is_empty() {
                self.pending_fields = Some(QueryResult::with_columns(std::mem::take(&mut batch.columns)));
            }
            batch.columns.clear();

            let skip = usize::try_from(self.remaining_offset)
                .unwrap_or(usize::MAX)
                .min(batch.rows.len());
            batch.rows.drain(..skip);
            self.remaining_offset -= skip as u64;

            let take = usize::try_from(self.remaining_count)
                .unwrap_or(usize::MAX)
                .min(batch.rows.len());
            batch.rows.truncate(take);
            self.remaining_count -= take as u64;
            if batch.rows.is_empty() {
                continue;
            }
            if let Some(fields) = self.pending_fields.take() {
                batch.columns = fields.columns;
            }
            return Ok(Some(batch));
        }
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending_fields = None;
        self.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::route::{Route, RouteOpcode};
    use crate::utils::config::EngineConfig;
    use crate::utils::error::GateError;
    use crate::utils::types::{ColumnMetadata, DataType, Row};
    use crate::vcursor::{MemoryStream, MockVcursor};
    use crate::vschema::Keyspace;
    use std::sync::Arc;

    fn numbered(n: i64) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new("id", DataType::Integer)]);
        result.rows = (1..=n).map(|i| Row::new(vec![Value::Integer(i)])).collect();
        result
    }

    fn scatter() -> Box<dyn Primitive> {
        let keyspace = Arc::new(Keyspace {
            name: "user".to_string(),
            sharded: true,
        });
        Box::new(Route::new(
            RouteOpcode::Scatter,
            keyspace,
            "select id from user limit :__upper_limit",
            "",
        ))
    }

    fn mock_with_rows() -> MockVcursor {
        let vcursor = MockVcursor::from_config(&EngineConfig::default())
            .unwrap()
            .with_stream_batch_size(2);
        vcursor.set_shard_result("user", "-80", numbered(5));
        vcursor
    }

    fn values(result: &QueryResult) -> Vec<Value> {
        result.rows.iter().map(|r| r.values[0].clone()).collect()
    }

    #[tokio::test]
    async fn test_count_and_offset() {
        let vcursor = mock_with_rows();
        let limit = Limit::new(PlanValue::Value(Value::Integer(3)), scatter())
            .with_offset(PlanValue::Value(Value::Integer(1)));
        let result = limit
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(values(&result), vec![Value::Integer(2), Value::Integer(3), Value::Integer(4)]);
        assert_eq!(result.rows_affected, 3);
        // the input only needs count + offset rows from each shard
        assert_eq!(vcursor.executed().await[0].sql, "select id from user limit 4");
    }

    #[tokio::test]
    async fn test_offset_past_end() {
        let vcursor = mock_with_rows();
        let limit = Limit::new(PlanValue::Value(Value::Integer(3)), scatter())
            .with_offset(PlanValue::Value(Value::Integer(10)));
        let result = limit
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_negative_count_is_rejected() {
        let vcursor = mock_with_rows();
        let mut bind_vars = BindVars::new();
        bind_vars.insert("n".to_string(), BindValue::Single(Value::Integer(-1)));
        let limit = Limit::new(PlanValue::Key("n".to_string()), scatter());
        match limit.execute(&ExecContext::new(), &vcursor, &bind_vars, false).await {
            Err(GateError::Execution(ExecutionError::InvalidLimit(msg))) => assert!(msg.contains("negative")),
            other => panic!("Expected invalid limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deep_pagination_streams() {
        let vcursor = mock_with_rows();
        let mut ctx = ExecContext::new();
        ctx.deep_pagination_threshold = 1;
        let limit = Limit::new(PlanValue::Value(Value::Integer(2)), scatter())
            .with_offset(PlanValue::Value(Value::Integer(2)));
        let result = limit.execute(&ctx, &vcursor, &BindVars::new(), true).await.unwrap();
        assert_eq!(values(&result), vec![Value::Integer(3), Value::Integer(4)]);
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_stream_skips_whole_batches() {
        let inner = MemoryStream::boxed(numbered(7), 2);
        let mut stream: BoxedRowStream = Box::new(LimitStream::new(inner, 2, 5));
        let result = collect_stream(&mut stream, true).await.unwrap();
        assert_eq!(values(&result), vec![Value::Integer(6), Value::Integer(7)]);
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_stream_fields_when_everything_skipped() {
        let inner = MemoryStream::boxed(numbered(2), 5);
        let mut stream: BoxedRowStream = Box::new(LimitStream::new(inner, 1, 5));
        let result = collect_stream(&mut stream, true).await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.columns.len(), 1);
    }

    #[tokio::test]
    async fn test_batched_limit_merges_like_execute() {
        let vcursor = mock_with_rows();
        let limit = Limit::new(PlanValue::Value(Value::Integer(2)), scatter());
        let ctx = ExecContext::new();
        let batched = limit.as_batched().unwrap();
        let resolved = batched
            .resolve_shard_query(&ctx, &vcursor, &BindVars::new(), None)
            .await
            .unwrap();
        assert_eq!(resolved.queries[0].sql, "select id from user limit 2");

        let raw = vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, false, false)
            .await
            .unwrap();
        let merged = batched.merge_result(&ctx, &vcursor, raw, &BindVars::new(), false).unwrap();
        assert_eq!(values(&merged), vec![Value::Integer(1), Value::Integer(2)]);
    }
}
