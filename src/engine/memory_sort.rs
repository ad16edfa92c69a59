use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::engine::comparator::{OrderByParams, RowComparator, TopK};
use crate::engine::primitive::*;
use crate::utils::error::{ExecutionError, GateResult, VcursorError};
use crate::utils::types::{BindVars, ColumnMetadata, PlanValue, QueryResult, Row};
use crate::vcursor::{BoxedRowStream, RowStream, Vcursor};

/// Sorts the full result of its input in memory
#[derive(Debug)]
pub struct MemorySort {
    pub order_by: Vec<OrderByParams>,
    /// Only this many rows can ever be consumed above the sort
    pub upper_limit: Option<PlanValue>,
    pub truncate_column_count: usize,
    pub input: Box<dyn Primitive>,
}

impl MemorySort {
    pub fn new(order_by: Vec<OrderByParams>, input: Box<dyn Primitive>) -> Self {
        Self {
            order_by,
            upper_limit: None,
            truncate_column_count: 0,
            input,
        }
    }

    pub fn with_upper_limit(mut self, limit: PlanValue) -> Self {
        self.upper_limit = Some(limit);
        self
    }

    pub fn with_truncate(mut self, count: usize) -> Self {
        self.truncate_column_count = count;
        self
    }

    fn fetch_upper_limit(&self, bind_vars: &BindVars) -> GateResult<Option<usize>> {
        let Some(limit) = &self.upper_limit else {
            return Ok(None);
        };
        let value = limit.resolve_value(bind_vars)?;
        let count = value
            .to_i64()
            .map_err(|_| ExecutionError::InvalidLimit(format!("upper limit {} is not an integer", value)))?;
        let count = usize::try_from(count)
            .map_err(|_| ExecutionError::InvalidLimit(format!("upper limit {} is negative", count)))?;
        Ok(Some(count))
    }
}

#[async_trait]
impl Primitive for MemorySort {
    fn route_type(&self) -> &'static str {
        "Sort"
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
        let upper_limit = self.fetch_upper_limit(bind_vars)?;
        let mut result = self.input.execute(ctx, vcursor, bind_vars, want_fields).await?;
        check_row_limit(vcursor, result.rows.len())?;
        RowComparator::new(self.order_by.clone()).sort(&mut result.rows)?;
        if let Some(limit) = upper_limit {
            result.rows.truncate(limit);
        }
        Ok(result.truncate_columns(self.truncate_column_count))
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.input.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for MemorySort {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let upper_limit = self.fetch_upper_limit(bind_vars)?;
        let inner = require_streaming(self.input.as_ref())?
            .stream_execute(ctx, vcursor, bind_vars, want_fields)
            .await?;
        let comparator = Arc::new(RowComparator::new(self.order_by.clone()));
        Ok(Box::new(SortStream {
            inner: Some(inner),
            top: TopK::new(comparator, upper_limit),
            bounded: upper_limit.is_some(),
            max_rows: vcursor.max_memory_rows(),
            batch_size: vcursor.stream_batch_size().max(1),
            truncate: self.truncate_column_count,
            sorted: None,
            columns: Vec::new(),
            closed: false,
        }))
    }
}

/// Consumes its whole input on the first fetch, keeping at most the upper limit of rows,
/// then hands the sorted rows out in batches
struct SortStream {
    inner: Option<BoxedRowStream>,
    top: TopK,
    bounded: bool,
    max_rows: usize,
    batch_size: usize,
    truncate: usize,
    sorted: Option<std::vec::IntoIter<Row>>,
    columns: Vec<ColumnMetadata>,
    closed: bool,
}

impl SortStream {
    async fn drain_input(&mut self, want_fields: bool) -> GateResult<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let mut first = true;
        loop {
            let batch = match inner.fetch(want_fields && first).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    if let Err(close_err) = inner.close().await {
                        warn!(error = %close_err, "closing sort input after a failed fetch");
                    }
                    return Err(err);
                }
            };
            if first && want_fields {
                self.columns = batch.columns;
            }
            first = false;
            for row in batch.rows {
                self.top.push(row);
                // a bounded heap never outgrows its limit, only unbounded sorts can blow the budget
                if !self.bounded && self.top.len() > self.max_rows {
                    inner.close().await?;
                    return Err(ExecutionError::RowLimitExceeded(self.max_rows).into());
                }
            }
        }
        inner.close().await?;
        let top = std::mem::replace(&mut self.top, TopK::new(Arc::new(RowComparator::new(Vec::new())), None));
        self.sorted = Some(top.into_sorted()?.into_iter());
        Ok(())
    }
}

#[async_trait]
impl RowStream for SortStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        let first = self.sorted.is_none();
        if first {
            self.drain_input(want_fields).await?;
        }

        let mut batch = QueryResult::new();
        if first && want_fields {
            batch.columns = std::mem::take(&mut self.columns);
        }
        if let Some(sorted) = self.sorted.as_mut() {
            batch.rows.extend(sorted.take(self.batch_size));
        }
        if batch.rows.is_empty() && batch.columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch.truncate_columns(self.truncate)))
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sorted = None;
        match self.inner.take() {
            Some(mut inner) => inner.close().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::route::{Route, RouteOpcode};
    use crate::utils::config::EngineConfig;
    use crate::utils::error::GateError;
    use crate::utils::types::{BindValue, DataType, Value};
    use crate::vcursor::{collect_stream, MockVcursor};
    use crate::vschema::Keyspace;

    fn shard_rows(values: &[(i64, &str)]) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![
            ColumnMetadata::new("id", DataType::Integer),
            ColumnMetadata::new("name", DataType::Text),
        ]);
        result.rows = values
            .iter()
            .map(|(id, name)| Row::new(vec![Value::Integer(*id), Value::Text(name.to_string())]))
            .collect();
        result
    }

    fn scatter() -> Box<dyn Primitive> {
        let keyspace = Arc::new(Keyspace {
            name: "user".to_string(),
            sharded: true,
        });
        Box::new(Route::new(RouteOpcode::Scatter, keyspace, "select id, name from user", ""))
    }

    fn mock() -> MockVcursor {
        let vcursor = MockVcursor::from_config(&EngineConfig::default())
            .unwrap()
            .with_stream_batch_size(2);
        vcursor.set_shard_result("user", "-80", shard_rows(&[(5, "e"), (1, "a"), (3, "c")]));
        vcursor.set_shard_result("user", "80-", shard_rows(&[(4, "d"), (2, "b")]));
        vcursor
    }

    fn ids(result: &QueryResult) -> Vec<Value> {
        result.rows.iter().map(|r| r.values[0].clone()).collect()
    }

    #[tokio::test]
    async fn test_sort_descending_with_truncate() {
        let vcursor = mock();
        let sort = MemorySort::new(vec![OrderByParams::desc(1)], scatter()).with_truncate(1);
        let result = sort
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(
            ids(&result),
            (1..=5).rev().map(Value::Integer).collect::<Vec<_>>()
        );
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.rows[0].values.len(), 1);
    }

    #[tokio::test]
    async fn test_upper_limit_from_bind_var() {
        let vcursor = mock();
        let mut bind_vars = BindVars::new();
        bind_vars.insert("__upper_limit".to_string(), BindValue::Single(Value::Unsigned(2)));
        let sort = MemorySort::new(vec![OrderByParams::asc(0)], scatter())
            .with_upper_limit(PlanValue::Key("__upper_limit".to_string()));

        let executed = sort
            .execute(&ExecContext::new(), &vcursor, &bind_vars, false)
            .await
            .unwrap();
        assert_eq!(ids(&executed), vec![Value::Integer(1), Value::Integer(2)]);

        let mut stream = sort
            .stream_execute(&ExecContext::new(), &vcursor, &bind_vars, true)
            .await
            .unwrap();
        let streamed = collect_stream(&mut stream, true).await.unwrap();
        assert_eq!(ids(&streamed), ids(&executed));
        assert_eq!(streamed.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_sorts_everything_in_batches() {
        let vcursor = mock();
        let sort = MemorySort::new(vec![OrderByParams::asc(0)], scatter());
        let mut stream = sort
            .stream_execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        let first = stream.fetch(false).await.unwrap().unwrap();
        assert_eq!(first.rows.len(), 2);
        let rest = collect_stream(&mut stream, false).await.unwrap();
        assert_eq!(ids(&rest), vec![Value::Integer(3), Value::Integer(4), Value::Integer(5)]);
    }

    struct FailingStream {
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl RowStream for FailingStream {
        async fn fetch(&mut self, _want_fields: bool) -> GateResult<Option<QueryResult>> {
            Err(VcursorError::ShardExecution {
                keyspace: "user".to_string(),
                shard: "-80".to_string(),
                message: "connection reset".to_string(),
            }
            .into())
        }

        async fn close(&mut self) -> GateResult<()> {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_closes_input() {
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut stream = SortStream {
            inner: Some(Box::new(FailingStream { closed: closed.clone() })),
            top: TopK::new(Arc::new(RowComparator::new(vec![OrderByParams::asc(0)])), None),
            bounded: false,
            max_rows: 100,
            batch_size: 2,
            truncate: 0,
            sorted: None,
            columns: Vec::new(),
            closed: false,
        };
        match stream.fetch(true).await {
            Err(GateError::Vcursor(VcursorError::ShardExecution { message, .. })) => assert_eq!(message, "connection reset"),
            other => panic!("Expected shard error, got {:?}", other),
        }
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(stream.inner.is_none());
    }

    #[tokio::test]
    async fn test_row_limit_exceeded() {
        let vcursor = mock().with_max_memory_rows(3);
        let sort = MemorySort::new(vec![OrderByParams::asc(0)], scatter());
        match sort.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Execution(ExecutionError::RowLimitExceeded(3))) => {}
            other => panic!("Expected row limit error, got {:?}", other),
        }
    }
}
