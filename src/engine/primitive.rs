use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::utils::config::ExecutionConfig;
use crate::utils::error::{ExecutionError, GateError, GateResult};
use crate::utils::types::{BindValue, BindVars, BoundQuery, QueryResult};
use crate::vcursor::{BoxedRowStream, ResolvedShard, Vcursor};

/// Per-request settings every operator sees
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub request_id: u64,
    /// Reject DML before any shard is touched
    pub read_only: bool,
    /// Default timeout for writes that do not configure their own
    pub query_timeout: Option<Duration>,
    /// LIMIT offsets above this are served by streaming skip-then-take when possible
    pub deep_pagination_threshold: u64,
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl ExecContext {
    pub fn new() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            request_id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            read_only: false,
            query_timeout: config.query_timeout(),
            deep_pagination_threshold: config.deep_pagination_threshold,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Shard targets and final query text of a batchable operator, computed without executing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedShardQuery {
    pub shards: Vec<ResolvedShard>,
    /// `queries[i]` goes to `shards[i]`, with bind variables already substituted
    pub queries: Vec<BoundQuery>,
}

impl ResolvedShardQuery {
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Attach the same advisory timeout to every query
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        for query in &mut self.queries {
            query.timeout = timeout;
        }
        self
    }
}

/// A node of an execution plan.
///
/// Every operator can execute to a full result. Streaming and batching are optional
/// capabilities exposed through `as_streaming` and `as_batched`; callers check them before use.
#[async_trait]
pub trait Primitive: Send + Sync + fmt::Debug {
    /// Short operator name used in plan descriptions and errors
    fn route_type(&self) -> &'static str;

    fn keyspace_name(&self) -> Option<&str> {
        None
    }

    fn table_name(&self) -> Option<&str> {
        None
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult>;

    /// Whether executing this operator writes and so needs a transaction
    fn needs_transaction(&self) -> bool {
        self.inputs().iter().any(|input| input.needs_transaction())
    }

    fn inputs(&self) -> Vec<&dyn Primitive> {
        Vec::new()
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        None
    }

    fn as_batched(&self) -> Option<&dyn BatchPrimitive> {
        None
    }

    /// Whether this operator can take part in a multi-query batch
    fn can_resolve_shard_query(&self) -> bool {
        self.as_batched().is_some()
    }
}

/// Operators that can hand out results incrementally
#[async_trait]
pub trait StreamPrimitive: Primitive {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream>;
}

/// Operators whose shard queries can be sent together with other operators' queries.
///
/// Any state needed between the two halves travels in `bind_vars`, which the caller passes to
/// both calls unchanged.
#[async_trait]
pub trait BatchPrimitive: Primitive {
    async fn resolve_shard_query(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery>;

    /// Turn the raw shard results of `resolve_shard_query`, concatenated in its shard order,
    /// into this operator's result
    fn merge_result(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        result: QueryResult,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult>;
}

/// Streaming capability or a feature-not-supported error naming the operator
pub fn require_streaming(primitive: &dyn Primitive) -> GateResult<&dyn StreamPrimitive> {
    primitive
        .as_streaming()
        .ok_or_else(|| GateError::unsupported(primitive.route_type(), "stream_execute"))
}

pub fn require_batched(primitive: &dyn Primitive) -> GateResult<&dyn BatchPrimitive> {
    primitive
        .as_batched()
        .ok_or_else(|| GateError::unsupported(primitive.route_type(), "resolve_shard_query"))
}

/// Fail when an operator is about to hold more rows than the cursor allows
pub fn check_row_limit(vcursor: &dyn Vcursor, rows: usize) -> GateResult<()> {
    if vcursor.exceeds_max_memory_rows(rows) {
        return Err(ExecutionError::RowLimitExceeded(vcursor.max_memory_rows()).into());
    }
    Ok(())
}

/// Copy of `bind_vars` with one variable added or replaced
pub fn with_bind_var(bind_vars: &BindVars, name: &str, value: BindValue) -> BindVars {
    let mut bind_vars = bind_vars.clone();
    bind_vars.insert(name.to_string(), value);
    bind_vars
}

/// Describe a plan tree one operator per line, children indented
pub fn describe_plan(primitive: &dyn Primitive) -> String {
    fn walk(primitive: &dyn Primitive, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(primitive.route_type());
        match (primitive.keyspace_name(), primitive.table_name()) {
            (Some(keyspace), Some(table)) if !table.is_empty() => {
                out.push_str(&format!(" {}.{}", keyspace, table))
            }
            (Some(keyspace), _) => out.push_str(&format!(" {}", keyspace)),
            _ => {}
        }
        out.push('\n');
        for input in primitive.inputs() {
            walk(input, depth + 1, out);
        }
    }

    let mut out = String::new();
    walk(primitive, 0, &mut out);
    out
}
