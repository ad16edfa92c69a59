use async_trait::async_trait;

use crate::utils::error::GateResult;
use crate::utils::types::{BoundQuery, QueryResult, Value};
use crate::vcursor::destination::Destination;
use crate::vcursor::stream::BoxedRowStream;

/// One shard of one keyspace, as targeted by a query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolvedShard {
    pub keyspace: String,
    pub shard: String,
}

impl ResolvedShard {
    pub fn new(keyspace: &str, shard: &str) -> Self {
        Self {
            keyspace: keyspace.to_string(),
            shard: shard.to_string(),
        }
    }
}

impl std::fmt::Display for ResolvedShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.keyspace, self.shard)
    }
}

/// Shards a list of destinations resolved to.
///
/// `indexes[i]` lists the positions of the input destinations that landed on `shards[i]`, so a
/// caller can send each shard only the values that belong to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDestinations {
    pub shards: Vec<ResolvedShard>,
    pub indexes: Vec<Vec<usize>>,
}

impl ResolvedDestinations {
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// The execution boundary every operator talks to.
///
/// Implementations own shard topology, connections and transactions; operators only decide
/// which query goes to which shard and how the partial results are merged.
#[async_trait]
pub trait Vcursor: Send + Sync {
    /// Resolve destinations against the shards of `keyspace`, keeping first-seen shard order
    async fn resolve_destinations(
        &self,
        keyspace: &str,
        destinations: &[Destination],
    ) -> GateResult<ResolvedDestinations>;

    /// Run `queries[i]` on `shards[i]` and merge the partial results in shard order
    async fn execute_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[BoundQuery],
        rollback_on_error: bool,
        autocommit: bool,
    ) -> GateResult<QueryResult>;

    /// Run every query list on its shard in one round trip, keeping each partial result
    async fn execute_batch_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[Vec<BoundQuery>],
        rollback_on_error: bool,
        autocommit: bool,
    ) -> GateResult<Vec<Vec<QueryResult>>>;

    /// Open one stream per shard, in shard order
    async fn stream_execute_multi_shard(
        &self,
        shards: &[ResolvedShard],
        queries: &[BoundQuery],
    ) -> GateResult<Vec<BoxedRowStream>>;

    /// Run a query outside the current transaction, e.g. to reserve sequence values
    async fn execute_standalone(
        &self,
        query: &BoundQuery,
        shard: &ResolvedShard,
        autocommit: bool,
    ) -> GateResult<QueryResult>;

    async fn set_user_defined_variable(&self, name: &str, value: Value) -> GateResult<()>;

    /// Whether the session lets a single-shard statement commit on its own
    fn autocommit_approval(&self) -> bool;

    fn max_memory_rows(&self) -> usize;

    fn exceeds_max_memory_rows(&self, rows: usize) -> bool {
        rows > self.max_memory_rows()
    }

    fn char_encoding(&self) -> &str {
        "utf8mb4"
    }

    /// Whether a failure part way through a multi-shard statement rolls the transaction back
    fn rollback_on_partial_exec(&self) -> bool;

    /// Rows per batch this cursor's streams return
    fn stream_batch_size(&self) -> usize {
        128
    }
}
