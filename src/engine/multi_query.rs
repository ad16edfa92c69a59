use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::engine::primitive::*;
use crate::utils::error::{GateError, GateResult};
use crate::utils::types::{BindVars, BoundQuery, QueryResult};
use crate::vcursor::{ResolvedShard, Vcursor};

/// Runs several independent operators with one physical round trip per shard.
///
/// Each batchable operator's shard queries are resolved up front and grouped by shard, keeping
/// the order in which they were added. Shard results come back in that same order and are handed
/// back to the operators positionally, so every operator sees exactly what it would have seen
/// executing alone. Operators that cannot be decomposed run on their own after the batch.
#[derive(Debug, Default)]
pub struct MultiQueryEngine;

/// Shard queries of several operators grouped by shard, in first-seen shard order
#[derive(Debug, Default)]
struct ShardBatch {
    shards: Vec<ResolvedShard>,
    queries: Vec<Vec<BoundQuery>>,
    positions: HashMap<ResolvedShard, usize>,
}

impl ShardBatch {
    fn add(&mut self, resolved: &ResolvedShardQuery) {
        for (shard, query) in resolved.shards.iter().zip(&resolved.queries) {
            let position = match self.positions.get(shard) {
                Some(position) => *position,
                None => {
                    self.shards.push(shard.clone());
                    self.queries.push(Vec::new());
                    self.positions.insert(shard.clone(), self.shards.len() - 1);
                    self.shards.len() - 1
                }
            };
            self.queries[position].push(query.clone());
        }
    }

    fn query_count(&self) -> usize {
        self.queries.iter().map(Vec::len).sum()
    }
}

impl MultiQueryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether every operator can be decomposed into shard queries
    pub fn can_batch(primitives: &[&dyn Primitive]) -> bool {
        primitives.iter().all(|p| p.can_resolve_shard_query())
    }

    /// How many of the operators can share the batched round trip
    pub fn batchable_count(primitives: &[&dyn Primitive]) -> usize {
        primitives.iter().filter(|p| p.can_resolve_shard_query()).count()
    }

    /// Execute `primitives` together; `results[i]` belongs to `primitives[i]`
    pub async fn execute_batch(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        primitives: &[&dyn Primitive],
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<Vec<QueryResult>> {
        let mut batched = Vec::with_capacity(primitives.len());
        let mut resolved = Vec::with_capacity(primitives.len());
        let mut direct = Vec::new();
        for (index, primitive) in primitives.iter().enumerate() {
            let Some(batch_primitive) = primitive.as_batched() else {
                direct.push(index);
                continue;
            };
            resolved.push(
                batch_primitive
                    .resolve_shard_query(ctx, vcursor, bind_vars, None)
                    .await?,
            );
            batched.push((index, batch_primitive));
        }

        let mut batch = ShardBatch::default();
        for shard_query in &resolved {
            batch.add(shard_query);
        }
        debug!(
            primitives = primitives.len(),
            unbatched = direct.len(),
            shards = batch.shards.len(),
            queries = batch.query_count(),
            "multi query batch"
        );

        let shard_results = if batch.shards.is_empty() {
            Vec::new()
        } else {
            vcursor
                .execute_batch_multi_shard(&batch.shards, &batch.queries, false, false)
                .await?
        };
        let mut cursors = Self::shard_cursors(&batch, shard_results)?;

        let mut results: Vec<Option<QueryResult>> = (0..primitives.len()).map(|_| None).collect();
        for ((index, primitive), shard_query) in batched.into_iter().zip(&resolved) {
            let mut merged = QueryResult::new();
            for shard in &shard_query.shards {
                let next = batch
                    .positions
                    .get(shard)
                    .and_then(|position| cursors[*position].pop_front())
                    .ok_or_else(|| GateError::Internal(format!("no batched result left for shard {}", shard)))?;
                merged.append(next);
            }
            results[index] = Some(primitive.merge_result(ctx, vcursor, merged, bind_vars, want_fields)?);
        }
        for index in direct {
            results[index] = Some(primitives[index].execute(ctx, vcursor, bind_vars, want_fields).await?);
        }
        Ok(results.into_iter().flatten().collect())
    }

    fn shard_cursors(batch: &ShardBatch, shard_results: Vec<Vec<QueryResult>>) -> GateResult<Vec<VecDeque<QueryResult>>> {
        if shard_results.len() != batch.shards.len() {
            return Err(GateError::Internal(format!(
                "batch returned results for {} shards, sent {}",
                shard_results.len(),
                batch.shards.len()
            )));
        }
        for ((shard, sent), received) in batch.shards.iter().zip(&batch.queries).zip(&shard_results) {
            if sent.len() != received.len() {
                return Err(GateError::Internal(format!(
                    "shard {} returned {} results for {} queries",
                    shard,
                    received.len(),
                    sent.len()
                )));
            }
        }
        Ok(shard_results.into_iter().map(VecDeque::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::route::{Route, RouteOpcode};
    use crate::engine::send::SendQuery;
    use crate::utils::config::EngineConfig;
    use crate::utils::types::{ColumnMetadata, DataType, Row, Value};
    use crate::vcursor::{Destination, MockVcursor};
    use crate::vschema::Keyspace;
    use std::sync::Arc;

    fn user_keyspace() -> Arc<Keyspace> {
        Arc::new(Keyspace {
            name: "user".to_string(),
            sharded: true,
        })
    }

    fn single(value: &str) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new("v", DataType::Text)]);
        result.rows.push(Row::new(vec![Value::Text(value.to_string())]));
        result
    }

    fn seeded() -> MockVcursor {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        for shard in ["-80", "80-"] {
            vcursor.set_query_result("user", shard, "select v from a", single(&format!("a{}", shard)));
            vcursor.set_query_result("user", shard, "select v from b", single(&format!("b{}", shard)));
        }
        vcursor
    }

    fn texts(result: &QueryResult) -> Vec<String> {
        result.rows.iter().map(|r| r.values[0].to_string()).collect()
    }

    #[tokio::test]
    async fn test_results_match_solo_execution() {
        let a = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from a", "");
        let b = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from b", "");
        let ctx = ExecContext::new();

        let solo = seeded();
        let solo_a = a.execute(&ctx, &solo, &BindVars::new(), true).await.unwrap();
        let solo_b = b.execute(&ctx, &solo, &BindVars::new(), true).await.unwrap();

        let vcursor = seeded();
        let results = MultiQueryEngine::new()
            .execute_batch(&ctx, &vcursor, &[&a, &b], &BindVars::new(), true)
            .await
            .unwrap();

        assert_eq!(results, vec![solo_a, solo_b]);
        assert_eq!(texts(&results[0]), vec!["a-80", "a80-"]);
        assert_eq!(texts(&results[1]), vec!["b-80", "b80-"]);
        assert_eq!(vcursor.round_trips(), 1);
        // queries for the same shard are sent in the order they were added
        assert_eq!(
            vcursor.executed_sql().await,
            vec![
                "user/-80: select v from a",
                "user/-80: select v from b",
                "user/80-: select v from a",
                "user/80-: select v from b",
            ]
        );
    }

    #[tokio::test]
    async fn test_same_operator_twice_on_one_shard() {
        let a = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from a", "");
        let b = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from b", "");
        let vcursor = seeded();
        let results = MultiQueryEngine::new()
            .execute_batch(&ExecContext::new(), &vcursor, &[&b, &a, &b], &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(texts(&results[0]), texts(&results[2]));
        assert_eq!(texts(&results[1]), vec!["a-80", "a80-"]);
    }

    #[tokio::test]
    async fn test_unbatchable_operators_run_on_their_own() {
        let a = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from a", "");
        let send = SendQuery::new(user_keyspace(), Destination::AllShards, "select v from b");
        let b = Route::new(RouteOpcode::Scatter, user_keyspace(), "select v from b", "");
        let primitives: [&dyn Primitive; 3] = [&a, &send, &b];
        assert!(!MultiQueryEngine::can_batch(&primitives));
        assert_eq!(MultiQueryEngine::batchable_count(&primitives), 2);

        let vcursor = seeded();
        let results = MultiQueryEngine::new()
            .execute_batch(&ExecContext::new(), &vcursor, &primitives, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(texts(&results[0]), vec!["a-80", "a80-"]);
        assert_eq!(texts(&results[1]), vec!["b-80", "b80-"]);
        assert_eq!(texts(&results[2]), vec!["b-80", "b80-"]);
        // one round trip for both routes, one for the send
        assert_eq!(vcursor.round_trips(), 2);
        let executed = vcursor.executed().await;
        assert!(executed[..4].iter().all(|q| q.round_trip == 0));
        assert!(executed[4..].iter().all(|q| q.round_trip == 1));
    }

    #[tokio::test]
    async fn test_empty_destinations_skip_the_round_trip() {
        let none = Route::new(RouteOpcode::None, user_keyspace(), "select v from a", "");
        let vcursor = seeded();
        let results = MultiQueryEngine::new()
            .execute_batch(&ExecContext::new(), &vcursor, &[&none], &BindVars::new(), false)
            .await
            .unwrap();
        assert!(results[0].rows.is_empty());
        assert_eq!(vcursor.round_trips(), 0);
    }
}
