use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::engine::multi_query::MultiQueryEngine;
use crate::engine::primitive::*;
use crate::utils::error::{ExecutionError, GateResult, VcursorError};
use crate::utils::types::{BindVars, ColumnMetadata, DataType, QueryResult};
use crate::vcursor::{BoxedRowStream, RowCursor, RowStream, Vcursor};

/// UNION ALL of independent sources
#[derive(Debug)]
pub struct Concatenate {
    pub sources: Vec<Box<dyn Primitive>>,
}

impl Concatenate {
    pub fn new(sources: Vec<Box<dyn Primitive>>) -> Self {
        Self { sources }
    }

    fn source_refs(&self) -> Vec<&dyn Primitive> {
        self.sources.iter().map(|s| s.as_ref()).collect()
    }

    async fn execute_sources(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<Vec<QueryResult>> {
        let sources = self.source_refs();
        let batchable = MultiQueryEngine::batchable_count(&sources);
        if batchable > 1 {
            debug!(sources = sources.len(), batchable, "concatenate batched");
            return MultiQueryEngine::new()
                .execute_batch(ctx, vcursor, &sources, bind_vars, true)
                .await;
        }
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            results.push(source.execute(ctx, vcursor, bind_vars, true).await?);
        }
        Ok(results)
    }
}

/// Every branch must agree with the first on column count and, column by column, on type
fn check_fields<'a>(fields: impl IntoIterator<Item = &'a [ColumnMetadata]>) -> GateResult<()> {
    let mut first: Option<&[ColumnMetadata]> = None;
    for columns in fields {
        // a branch that reached no shard reports no fields
        if columns.is_empty() {
            continue;
        }
        let Some(expected) = first else {
            first = Some(columns);
            continue;
        };
        if expected.len() != columns.len() {
            return Err(ExecutionError::ColumnCountMismatch {
                left: expected.len(),
                right: columns.len(),
            }
            .into());
        }
        for (index, (left, right)) in expected.iter().zip(columns).enumerate() {
            let compatible = left.data_type == right.data_type
                || left.data_type == DataType::Null
                || right.data_type == DataType::Null;
            if !compatible {
                return Err(ExecutionError::ColumnTypeMismatch {
                    index,
                    left: left.data_type.to_string(),
                    right: right.data_type.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Primitive for Concatenate {
    fn route_type(&self) -> &'static str {
        "Concatenate"
    }

    fn inputs(&self) -> Vec<&dyn Primitive> {
        self.source_refs()
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        let results = self.execute_sources(ctx, vcursor, bind_vars).await?;
        check_fields(results.iter().map(|r| r.columns.as_slice()))?;
        let total: usize = results.iter().map(|r| r.rows.len()).sum();
        check_row_limit(vcursor, total)?;

        let mut merged = QueryResult::new();
        for result in results {
            merged.append(result);
        }
        if !want_fields {
            merged.columns.clear();
        }
        Ok(merged)
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        if self.sources.iter().all(|s| s.as_streaming().is_some()) {
            return Some(self);
        }
        None
    }
}

#[async_trait]
impl StreamPrimitive for Concatenate {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        _want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let sources = self
            .sources
            .iter()
            .map(|s| require_streaming(s.as_ref()))
            .collect::<GateResult<Vec<_>>>()?;

        let streams = if sources.len() == 1 {
            vec![sources[0].stream_execute(ctx, vcursor, bind_vars, true).await?]
        } else {
            start_concurrently(&sources, ctx, vcursor, bind_vars).await?
        };
        Ok(Box::new(RoundRobinStream::new(streams)))
    }
}

/// Open every branch stream at once; the first failure wins and every opened stream is closed
async fn start_concurrently(
    sources: &[&dyn StreamPrimitive],
    ctx: &ExecContext,
    vcursor: &dyn Vcursor,
    bind_vars: &BindVars,
) -> GateResult<Vec<BoxedRowStream>> {
    let mut pending: FuturesUnordered<_> = sources
        .iter()
        .enumerate()
        .map(|(index, source)| async move { (index, source.stream_execute(ctx, vcursor, bind_vars, true).await) })
        .collect();

    let mut opened: Vec<Option<BoxedRowStream>> = (0..sources.len()).map(|_| None).collect();
    let mut first_err = None;
    while let Some((index, started)) = pending.next().await {
        match started {
            Ok(stream) => opened[index] = Some(stream),
            Err(err) if first_err.is_none() => first_err = Some(err),
            Err(err) => warn!(branch = index, error = %err, "concatenate branch failed after an earlier failure"),
        }
    }

    if let Some(err) = first_err {
        for mut stream in opened.into_iter().flatten() {
            if let Err(close_err) = stream.close().await {
                warn!(error = %close_err, "closing concatenate branch");
            }
        }
        return Err(err);
    }
    Ok(opened.into_iter().flatten().collect())
}

/// Takes at most one row from each live branch per fetch
struct RoundRobinStream {
    branches: Vec<RowCursor>,
    live: Vec<bool>,
    started: bool,
    closed: bool,
}

impl RoundRobinStream {
    fn new(streams: Vec<BoxedRowStream>) -> Self {
        let live = vec![true; streams.len()];
        Self {
            branches: streams.into_iter().map(RowCursor::new).collect(),
            live,
            started: false,
            closed: false,
        }
    }

    async fn fields(&mut self) -> GateResult<Vec<ColumnMetadata>> {
        let mut all = Vec::with_capacity(self.branches.len());
        for branch in &mut self.branches {
            all.push(branch.columns().await?);
        }
        check_fields(all.iter().map(Vec::as_slice))?;
        Ok(all.into_iter().find(|c| !c.is_empty()).unwrap_or_default())
    }
}

#[async_trait]
impl RowStream for RoundRobinStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        let mut batch = QueryResult::new();
        if !self.started {
            self.started = true;
            let fields = self.fields().await?;
            if want_fields {
                batch.columns = fields;
            }
        }

        for (index, branch) in self.branches.iter_mut().enumerate() {
            if !self.live[index] {
                continue;
            }
            match branch.next_row().await? {
                Some(row) => batch.rows.push(row),
                None => {
                    self.live[index] = false;
                    branch.close().await?;
                }
            }
        }

        if batch.rows.is_empty() && batch.columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_err = None;
        for (index, branch) in self.branches.iter_mut().enumerate() {
            if !self.live[index] {
                continue;
            }
            self.live[index] = false;
            if let Err(err) = branch.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pullout_subquery::PulloutSubquery;
    use crate::engine::route::{Route, RouteOpcode};
    use crate::semantics::PulloutOpcode;
    use crate::utils::config::EngineConfig;
    use crate::utils::error::GateError;
    use crate::utils::types::{Row, Value};
    use crate::vcursor::{collect_stream, MockVcursor};
    use crate::vschema::Keyspace;
    use std::sync::Arc;

    fn keyspace(name: &str, sharded: bool) -> Arc<Keyspace> {
        Arc::new(Keyspace {
            name: name.to_string(),
            sharded,
        })
    }

    fn ints(name: &str, values: &[i64]) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new(name, DataType::Integer)]);
        result.rows = values.iter().map(|v| Row::new(vec![Value::Integer(*v)])).collect();
        result
    }

    fn values(result: &QueryResult) -> Vec<Value> {
        result.rows.iter().map(|r| r.values[0].clone()).collect()
    }

    fn union_of_two() -> (Concatenate, MockVcursor) {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        vcursor.set_query_result("main", "0", "select id from a", ints("id", &[1, 2, 3]));
        vcursor.set_query_result("user", "-80", "select id from b", ints("id", &[10]));
        vcursor.set_query_result("user", "80-", "select id from b", ints("id", &[20]));
        let concatenate = Concatenate::new(vec![
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select id from a", "")),
            Box::new(Route::new(RouteOpcode::Scatter, keyspace("user", true), "select id from b", "")),
        ]);
        (concatenate, vcursor)
    }

    #[tokio::test]
    async fn test_execute_batches_branches() {
        let (concatenate, vcursor) = union_of_two();
        let result = concatenate
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(
            values(&result),
            [1, 2, 3, 10, 20].into_iter().map(Value::Integer).collect::<Vec<_>>()
        );
        assert_eq!(result.columns.len(), 1);
        assert_eq!(vcursor.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_unbatchable_branch_keeps_the_others_batched() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        for shard in ["-80", "80-"] {
            vcursor.set_query_result("user", shard, "select id from a", ints("id", &[1]));
            vcursor.set_query_result("user", shard, "select id from b", ints("id", &[2]));
        }
        let pullout = PulloutSubquery::new(
            PulloutOpcode::In,
            "__sq1",
            "__sq_has_values1",
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select id from banned", "")),
            Box::new(Route::new(
                RouteOpcode::Unsharded,
                keyspace("main", false),
                "select id from c where :__sq_has_values1 = 1 and id in ::__sq1",
                "",
            )),
        );
        assert!(pullout.as_batched().is_none());
        let concatenate = Concatenate::new(vec![
            Box::new(Route::new(RouteOpcode::Scatter, keyspace("user", true), "select id from a", "")),
            Box::new(Route::new(RouteOpcode::Scatter, keyspace("user", true), "select id from b", "")),
            Box::new(pullout),
        ]);

        let result = concatenate
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(
            values(&result),
            [1, 1, 2, 2].into_iter().map(Value::Integer).collect::<Vec<_>>()
        );
        // both scatters share one round trip; the pullout needs two of its own
        assert_eq!(vcursor.round_trips(), 3);
    }

    #[tokio::test]
    async fn test_stream_round_robin() {
        let (concatenate, vcursor) = union_of_two();
        let mut stream = concatenate
            .stream_execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();

        let first = stream.fetch(true).await.unwrap().unwrap();
        assert_eq!(first.columns.len(), 1);
        assert_eq!(values(&first), vec![Value::Integer(1), Value::Integer(10)]);
        let second = stream.fetch(true).await.unwrap().unwrap();
        assert!(second.columns.is_empty());
        assert_eq!(values(&second), vec![Value::Integer(2), Value::Integer(20)]);

        let rest = collect_stream(&mut stream, false).await.unwrap();
        assert_eq!(values(&rest), vec![Value::Integer(3)]);
    }

    #[tokio::test]
    async fn test_column_count_mismatch() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let mut wide = QueryResult::with_columns(vec![
            ColumnMetadata::new("a", DataType::Integer),
            ColumnMetadata::new("b", DataType::Integer),
            ColumnMetadata::new("c", DataType::Integer),
            ColumnMetadata::new("d", DataType::Integer),
        ]);
        wide.rows.push(Row::new(vec![Value::Integer(1); 4]));
        let mut narrow = QueryResult::with_columns(wide.columns[..3].to_vec());
        narrow.rows.push(Row::new(vec![Value::Integer(1); 3]));
        vcursor.set_query_result("main", "0", "select a, b, c from t", narrow);
        vcursor.set_query_result("main", "0", "select a, b, c, d from t", wide);

        let concatenate = Concatenate::new(vec![
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select a, b, c from t", "")),
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select a, b, c, d from t", "")),
        ]);
        match concatenate.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Execution(ExecutionError::ColumnCountMismatch { left: 3, right: 4 })) => {}
            other => panic!("Expected column count mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_column_type_mismatch_names_column() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let mut text = QueryResult::with_columns(vec![
            ColumnMetadata::new("id", DataType::Integer),
            ColumnMetadata::new("name", DataType::Text),
        ]);
        text.rows.push(Row::new(vec![Value::Integer(1), Value::Text("x".to_string())]));
        let mut number = QueryResult::with_columns(vec![
            ColumnMetadata::new("id", DataType::Integer),
            ColumnMetadata::new("score", DataType::Float),
        ]);
        number.rows.push(Row::new(vec![Value::Integer(1), Value::Float(0.5)]));
        vcursor.set_query_result("main", "0", "select id, name from t", text);
        vcursor.set_query_result("main", "0", "select id, score from s", number);

        let concatenate = Concatenate::new(vec![
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select id, name from t", "")),
            Box::new(Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select id, score from s", "")),
        ]);
        match concatenate.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Execution(ExecutionError::ColumnTypeMismatch { index: 1, .. })) => {}
            other => panic!("Expected column type mismatch, got {:?}", other),
        }

        let mut stream = concatenate
            .stream_execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert!(matches!(
            stream.fetch(false).await,
            Err(GateError::Execution(ExecutionError::ColumnTypeMismatch { index: 1, .. }))
        ));
    }

    #[tokio::test]
    async fn test_failing_branch_fails_stream_start() {
        let (concatenate, vcursor) = union_of_two();
        vcursor.fail_shard("main", "0", "down");
        match concatenate
            .stream_execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
        {
            Err(GateError::Vcursor(VcursorError::ShardExecution { shard, .. })) => assert_eq!(shard, "0"),
            Err(other) => panic!("Expected shard failure, got {:?}", other),
            Ok(_) => panic!("Expected shard failure"),
        }
    }
}
