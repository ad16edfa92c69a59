use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::sql::bind::substitute;
use crate::utils::config::{EngineConfig, TopologyConfig};
use crate::utils::error::{GateResult, RoutingError, VcursorError};
use crate::utils::types::{BoundQuery, ColumnMetadata, DataType, QueryResult, Row, Value};
use crate::vcursor::destination::{Destination, KeyRange};
use crate::vcursor::stream::{BoxedRowStream, MemoryStream};
use crate::vcursor::vcursor_trait::{ResolvedDestinations, ResolvedShard, Vcursor};

/// One query as the mock received it, with bind variables already substituted
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub shard: ResolvedShard,
    pub sql: String,
    /// Which call into the mock carried this query, counting from zero
    pub round_trip: usize,
    pub rollback_on_error: bool,
    pub autocommit: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct MockShard {
    name: String,
    range: KeyRange,
}

/// In-memory Vcursor with canned per-shard results.
///
/// Results are looked up by exact query text first, then by shard. Every query is recorded so
/// tests can assert what reached which shard and in what order.
#[derive(Debug)]
pub struct MockVcursor {
    keyspaces: BTreeMap<String, Vec<MockShard>>,
    results: DashMap<(ResolvedShard, String), QueryResult>,
    shard_results: DashMap<ResolvedShard, QueryResult>,
    failures: DashMap<ResolvedShard, String>,
    sequences: DashMap<String, i64>,
    user_variables: DashMap<String, Value>,
    log: Mutex<Vec<ExecutedQuery>>,
    round_trips: AtomicUsize,
    max_memory_rows: usize,
    autocommit_approval: bool,
    rollback_on_partial_exec: bool,
    stream_batch_size: usize,
}

impl MockVcursor {
    pub fn new(topology: &TopologyConfig) -> GateResult<Self> {
        let mut keyspaces = BTreeMap::new();
        for (name, keyspace) in &topology.keyspaces {
            let shards = keyspace
                .shards
                .iter()
                .map(|shard| {
                    Ok(MockShard {
                        name: shard.clone(),
                        range: KeyRange::parse(shard)?,
                    })
                })
                .collect::<GateResult<Vec<_>>>()?;
            keyspaces.insert(name.clone(), shards);
        }

        Ok(Self {
            keyspaces,
            results: DashMap::new(),
            shard_results: DashMap::new(),
            failures: DashMap::new(),
            sequences: DashMap::new(),
            user_variables: DashMap::new(),
            log: Mutex::new(Vec::new()),
            round_trips: AtomicUsize::new(0),
            max_memory_rows: 300_000,
            autocommit_approval: true,
            rollback_on_partial_exec: true,
            stream_batch_size: 128,
        })
    }

    pub fn from_config(config: &EngineConfig) -> GateResult<Self> {
        let mut vcursor = Self::new(&config.topology)?;
        vcursor.max_memory_rows = config.execution.max_memory_rows;
        vcursor.stream_batch_size = config.execution.stream_batch_size;
        Ok(vcursor)
    }

    pub fn with_max_memory_rows(mut self, rows: usize) -> Self {
        self.max_memory_rows = rows;
        self
    }

    pub fn with_autocommit_approval(mut self, approval: bool) -> Self {
        self.autocommit_approval = approval;
        self
    }

    pub fn with_stream_batch_size(mut self, size: usize) -> Self {
        self.stream_batch_size = size.max(1);
        self
    }

    /// Answer `sql`, after substitution, with `result` on one shard
    pub fn set_query_result(&self, keyspace: &str, shard: &str, sql: &str, result: QueryResult) {
        self.results
            .insert((ResolvedShard::new(keyspace, shard), sql.to_string()), result);
    }

    /// Answer every query on a shard that has no exact match with `result`
    pub fn set_shard_result(&self, keyspace: &str, shard: &str, result: QueryResult) {
        self.shard_results.insert(ResolvedShard::new(keyspace, shard), result);
    }

    /// Make every query on a shard fail
    pub fn fail_shard(&self, keyspace: &str, shard: &str, message: &str) {
        self.failures
            .insert(ResolvedShard::new(keyspace, shard), message.to_string());
    }

    /// Next value a sequence hands out
    pub fn set_sequence(&self, name: &str, next: i64) {
        self.sequences.insert(name.to_string(), next);
    }

    pub fn user_variable(&self, name: &str) -> Option<Value> {
        self.user_variables.get(name).map(|v| v.clone())
    }

    pub async fn executed(&self) -> Vec<ExecutedQuery> {
        self.log.lock().await.clone()
    }

    /// Executed queries as `keyspace/shard: sql`, in arrival order
    pub async fn executed_sql(&self) -> Vec<String> {
        self.log
            .lock()
            .await
            .iter()
            .map(|q| format!("{}: {}", q.shard, q.sql))
            .collect()
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub async fn clear_log(&self) {
        self.log.lock().await.clear();
        self.round_trips.store(0, Ordering::SeqCst);
    }

    fn shards_of(&self, keyspace: &str) -> GateResult<&Vec<MockShard>> {
        self.keyspaces
            .get(keyspace)
            .ok_or_else(|| RoutingError::KeyspaceNotFound(keyspace.to_string()).into())
    }

    fn shards_for(&self, keyspace: &str, destination: &Destination) -> GateResult<Vec<String>> {
        let shards = self.shards_of(keyspace)?;
        let containing = |ksid: &[u8]| -> GateResult<String> {
            shards
                .iter()
                .find(|s| s.range.contains(ksid))
                .map(|s| s.name.clone())
                .ok_or_else(|| {
                    VcursorError::Destination(format!(
                        "no shard in keyspace {} covers keyspace id {}",
                        keyspace,
                        crate::vcursor::destination::hex(ksid)
                    ))
                    .into()
                })
        };

        match destination {
            Destination::KeyspaceId(ksid) => Ok(vec![containing(ksid)?]),
            Destination::KeyspaceIds(ksids) => ksids.iter().map(|k| containing(k)).collect(),
            Destination::KeyRange(range) => Ok(shards
                .iter()
                .filter(|s| s.range.intersects(range))
                .map(|s| s.name.clone())
                .collect()),
            Destination::Shard(name) => {
                if shards.iter().any(|s| &s.name == name) {
                    Ok(vec![name.clone()])
                } else {
                    Err(VcursorError::Destination(format!("shard {}/{} does not exist", keyspace, name)).into())
                }
            }
            Destination::AllShards => Ok(shards.iter().map(|s| s.name.clone()).collect()),
            Destination::AnyShard => Ok(shards.iter().take(1).map(|s| s.name.clone()).collect()),
            Destination::None => Ok(Vec::new()),
        }
    }

    async fn run(
        &self,
        shard: &ResolvedShard,
        query: &BoundQuery,
        round_trip: usize,
        rollback_on_error: bool,
        autocommit: bool,
    ) -> GateResult<QueryResult> {
        let sql = substitute(&query.sql, &query.bind_vars)?;
        debug!(shard = %shard, sql = %sql, timeout = ?query.timeout, "mock execute");
        self.log.lock().await.push(ExecutedQuery {
            shard: shard.clone(),
            sql: sql.clone(),
            round_trip,
            rollback_on_error,
            autocommit,
            timeout: query.timeout,
        });

        if let Some(message) = self.failures.get(shard) {
            return Err(VcursorError::ShardExecution {
                keyspace: shard.keyspace.clone(),
                shard: shard.shard.clone(),
                message: message.clone(),
            }
            .into());
        }
        if let Some(result) = self.results.get(&(shard.clone(), sql)) {
            return Ok(result.clone());
        }
        Ok(self
            .shard_results
            .get(shard)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    fn next_round_trip(&self) -> usize {
        self.round_trips.fetch_add(1, Ordering::SeqCst)
    }

    /// `select next <n> values from <sequence>` reserves n consecutive values
    fn reserve_sequence(&self, sql: &str) -> GateResult<Option<QueryResult>> {
        let words: Vec<&str> = sql.split_whitespace().collect();
        let ["select", "next", count, "values", "from", name] = words.as_slice() else {
            return Ok(None);
        };
        let count: i64 = count
            .parse()
            .map_err(|_| VcursorError::Sequence(format!("invalid count {} for {}", count, name)))?;
        if count < 1 {
            return Err(VcursorError::Sequence(format!("cannot reserve {} values from {}", count, name)).into());
        }

        let mut next = self.sequences.entry(name.to_string()).or_insert(1);
        let first = *next;
        *next += count;

        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new("nextval", DataType::Integer)]);
        result.rows.push(Row::new(vec![Value::Integer(first)]));
        Ok(Some(result))
    }
}

#[async_trait]
impl Vcursor for MockVcursor {
    async fn resolve_destinations(
        &self,
        keyspace: &str,
        destinations: &[Destination],
    ) -> GateResult<ResolvedDestinations> {
        let mut resolved = ResolvedDestinations::default();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (index, destination) in destinations.iter().enumerate() {
            for shard in self.shards_for(keyspace, destination)? {
                let position = *positions.entry(shard.clone()).or_insert_with(|| {
                    resolved.shards.push(ResolvedShard::new(keyspace, &shard));
                    resolved.indexes.push(Vec::new());
                    resolved.shards.len() - 1
                });
                if resolved.indexes[position].last() != Some(&index) {
                    resolved.indexes[position].push(index);
                }
            }
        }
        Ok(resolved)
    }

    async fn execute_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[BoundQuery],
        rollback_on_error: bool,
        autocommit: bool,
    ) -> GateResult<QueryResult> {
        let round_trip = self.next_round_trip();
        let mut merged = QueryResult::new();
        for (shard, query) in shards.iter().zip(queries) {
            let result = self.run(shard, query, round_trip, rollback_on_error, autocommit).await?;
            merged.append(result);
        }
        Ok(merged)
    }

    async fn execute_batch_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[Vec<BoundQuery>],
        rollback_on_error: bool,
        autocommit: bool,
    ) -> GateResult<Vec<Vec<QueryResult>>> {
        let round_trip = self.next_round_trip();
        let mut results = Vec::with_capacity(shards.len());
        for (shard, shard_queries) in shards.iter().zip(queries) {
            let mut shard_results = Vec::with_capacity(shard_queries.len());
            for query in shard_queries {
                shard_results.push(self.run(shard, query, round_trip, rollback_on_error, autocommit).await?);
            }
            results.push(shard_results);
        }
        Ok(results)
    }

    async fn stream_execute_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[BoundQuery],
    ) -> GateResult<Vec<BoxedRowStream>> {
        let round_trip = self.next_round_trip();
        let mut streams = Vec::with_capacity(shards.len());
        for (shard, query) in shards.iter().zip(queries) {
            let result = self.run(shard, query, round_trip, false, false).await?;
            streams.push(MemoryStream::boxed(result, self.stream_batch_size));
        }
        Ok(streams)
    }

    async fn execute_standalone(
        &self,
        query: &BoundQuery,
        shard: &ResolvedShard,
        autocommit: bool,
    ) -> GateResult<QueryResult> {
        let round_trip = self.next_round_trip();
        let sql = substitute(&query.sql, &query.bind_vars)?;
        if let Some(result) = self.reserve_sequence(&sql)? {
            self.log.lock().await.push(ExecutedQuery {
                shard: shard.clone(),
                sql,
                round_trip,
                rollback_on_error: false,
                autocommit,
                timeout: query.timeout,
            });
            return Ok(result);
        }
        self.run(shard, query, round_trip, false, autocommit).await
    }

    async fn set_user_defined_variable(&self, name: &str, value: Value) -> GateResult<()> {
        self.user_variables.insert(name.to_string(), value);
        Ok(())
    }

    fn autocommit_approval(&self) -> bool {
        self.autocommit_approval
    }

    fn max_memory_rows(&self) -> usize {
        self.max_memory_rows
    }

    fn rollback_on_partial_exec(&self) -> bool {
        self.rollback_on_partial_exec
    }

    fn stream_batch_size(&self) -> usize {
        self.stream_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::types::{BindValue, BindVars};

    fn mock() -> MockVcursor {
        MockVcursor::from_config(&EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_keyspace_ids_groups_by_shard() {
        let vcursor = mock();
        let low = vec![0x10, 0, 0, 0, 0, 0, 0, 0];
        let high = vec![0x90, 0, 0, 0, 0, 0, 0, 0];
        let resolved = vcursor
            .resolve_destinations(
                "user",
                &[
                    Destination::KeyspaceId(high.clone()),
                    Destination::KeyspaceId(low),
                    Destination::None,
                    Destination::KeyspaceId(high),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            resolved.shards,
            vec![ResolvedShard::new("user", "80-"), ResolvedShard::new("user", "-80")]
        );
        assert_eq!(resolved.indexes, vec![vec![0, 3], vec![1]]);
    }

    #[tokio::test]
    async fn test_resolve_all_and_any_shard() {
        let vcursor = mock();
        let all = vcursor.resolve_destinations("user", &[Destination::AllShards]).await.unwrap();
        assert_eq!(all.len(), 2);
        let any = vcursor.resolve_destinations("user", &[Destination::AnyShard]).await.unwrap();
        assert_eq!(any.shards, vec![ResolvedShard::new("user", "-80")]);

        match vcursor.resolve_destinations("nope", &[Destination::AllShards]).await {
            Err(crate::utils::error::GateError::Routing(RoutingError::KeyspaceNotFound(ks))) => assert_eq!(ks, "nope"),
            other => panic!("Expected keyspace not found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_canned_results_and_log() {
        let vcursor = mock();
        let mut canned = QueryResult::new();
        canned.rows.push(Row::new(vec![Value::Integer(1)]));
        vcursor.set_query_result("user", "-80", "select 1 from t where id = 5", canned);

        let mut bind_vars = BindVars::new();
        bind_vars.insert("id".to_string(), BindValue::Single(Value::Integer(5)));
        let query = BoundQuery::new("select 1 from t where id = :id", bind_vars);
        let shards = vec![ResolvedShard::new("user", "-80"), ResolvedShard::new("user", "80-")];

        let result = vcursor
            .execute_multi_shard(&shards, &[query.clone(), query], false, true)
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(
            vcursor.executed_sql().await,
            vec![
                "user/-80: select 1 from t where id = 5",
                "user/80-: select 1 from t where id = 5"
            ]
        );
        assert_eq!(vcursor.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_failed_shard() {
        let vcursor = mock();
        vcursor.fail_shard("main", "0", "connection refused");
        let shard = ResolvedShard::new("main", "0");
        let result = vcursor
            .execute_multi_shard(&[shard], &[BoundQuery::new("select 1", BindVars::new())], false, false)
            .await;
        assert!(matches!(
            result,
            Err(crate::utils::error::GateError::Vcursor(VcursorError::ShardExecution { .. }))
        ));
    }

    #[tokio::test]
    async fn test_sequence_reservation() {
        let vcursor = mock();
        vcursor.set_sequence("user_seq", 100);
        let shard = ResolvedShard::new("main", "0");
        let mut bind_vars = BindVars::new();
        bind_vars.insert("n".to_string(), BindValue::Single(Value::Integer(3)));
        let query = BoundQuery::new("select next :n values from user_seq", bind_vars);

        let first = vcursor.execute_standalone(&query, &shard, true).await.unwrap();
        let second = vcursor.execute_standalone(&query, &shard, true).await.unwrap();
        assert_eq!(first.rows[0].values[0], Value::Integer(100));
        assert_eq!(second.rows[0].values[0], Value::Integer(103));
    }

    #[test]
    fn test_clear_log_resets_round_trips() {
        let vcursor = mock();
        let shard = ResolvedShard::new("main", "0");
        tokio_test::block_on(async {
            vcursor
                .execute_multi_shard(&[shard], &[BoundQuery::new("select 1", BindVars::new())], false, false)
                .await
                .unwrap();
            assert_eq!(vcursor.round_trips(), 1);
            vcursor.clear_log().await;
        });
        assert_eq!(vcursor.round_trips(), 0);
        assert!(tokio_test::block_on(vcursor.executed()).is_empty());
    }
}
