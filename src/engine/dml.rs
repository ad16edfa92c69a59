use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::primitive::*;
use crate::engine::shards::*;
use crate::utils::error::{ExecutionError, GateResult, RoutingError};
use crate::utils::types::{BindVars, PlanValue, QueryResult};
use crate::vcursor::{Destination, ResolvedShard, Vcursor};
use crate::vindexes::Vindex;
use crate::vschema::Keyspace;

/// How a write picks its shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlOpcode {
    Unsharded,
    Equal,
    In,
    Scatter,
    /// An explicit target, e.g. from a shard-qualified keyspace name
    ByDestination,
}

impl fmt::Display for DmlOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Routing and commit logic shared by UPDATE and DELETE
#[derive(Debug)]
pub struct DmlEngine {
    pub opcode: DmlOpcode,
    pub keyspace: Arc<Keyspace>,
    pub table_name: String,
    pub query: String,
    pub vindex: Option<Arc<dyn Vindex>>,
    pub values: Vec<PlanValue>,
    pub target_destination: Option<Destination>,
    /// Commit each shard on its own instead of rolling every shard back on error
    pub multi_shard_autocommit: bool,
    /// Passed down with every shard query; overrides the context default
    pub query_timeout: Option<Duration>,
    /// Per-shard table renames, keyed by shard name
    pub shard_renames: HashMap<String, HashMap<String, String>>,
}

impl DmlEngine {
    pub fn new(opcode: DmlOpcode, keyspace: Arc<Keyspace>, table_name: &str, query: &str) -> Self {
        Self {
            opcode,
            keyspace,
            table_name: table_name.to_string(),
            query: query.to_string(),
            vindex: None,
            values: Vec::new(),
            target_destination: None,
            multi_shard_autocommit: false,
            query_timeout: None,
            shard_renames: HashMap::new(),
        }
    }

    pub fn with_vindex(mut self, vindex: Arc<dyn Vindex>, value: PlanValue) -> Self {
        self.vindex = Some(vindex);
        self.values = vec![value];
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.target_destination = Some(destination);
        self
    }

    pub fn with_multi_shard_autocommit(mut self, autocommit: bool) -> Self {
        self.multi_shard_autocommit = autocommit;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_shard_rename(mut self, shard: &str, from: &str, to: &str) -> Self {
        self.shard_renames
            .entry(shard.to_string())
            .or_default()
            .insert(from.to_string(), to.to_string());
        self
    }

    fn routing_vindex(&self) -> GateResult<&Arc<dyn Vindex>> {
        self.vindex.as_ref().ok_or_else(|| {
            RoutingError::MissingVindex {
                opcode: self.opcode.to_string(),
                table: self.table_name.clone(),
            }
            .into()
        })
    }

    fn routing_value(&self) -> GateResult<&PlanValue> {
        self.values.first().ok_or_else(|| {
            RoutingError::InvalidValue(format!("{} on {} has no routing value", self.opcode, self.table_name)).into()
        })
    }

    async fn resolve_shards(
        &self,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<(Vec<ResolvedShard>, Vec<BindVars>)> {
        let keyspace = self.keyspace.name.as_str();
        match self.opcode {
            DmlOpcode::Unsharded => {
                let (shards, vars) = resolve_uniform(vcursor, keyspace, &[Destination::AllShards], bind_vars).await?;
                expect_shard_count(keyspace, "Unsharded", &shards, 1)?;
                Ok((shards, vars))
            }
            DmlOpcode::Equal => {
                let vindex = self.routing_vindex()?;
                let value = self.routing_value()?.resolve_value(bind_vars)?;
                let destinations = map_values(vindex, &[value])?;
                resolve_uniform(vcursor, keyspace, &destinations, bind_vars).await
            }
            DmlOpcode::In => {
                let vindex = self.routing_vindex()?;
                let values = self.routing_value()?.resolve_list(bind_vars)?;
                let destinations = map_values(vindex, &values)?;
                resolve_with_values(vcursor, keyspace, &destinations, &values, bind_vars).await
            }
            DmlOpcode::Scatter => resolve_uniform(vcursor, keyspace, &[Destination::AllShards], bind_vars).await,
            DmlOpcode::ByDestination => {
                let destination = self.target_destination.clone().ok_or_else(|| {
                    RoutingError::InvalidValue(format!("{} has no target destination", self.table_name))
                })?;
                resolve_uniform(vcursor, keyspace, &[destination], bind_vars).await
            }
        }
    }

    async fn shard_queries(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery> {
        let (shards, vars) = self.resolve_shards(vcursor, bind_vars).await?;
        let resolved = build_shard_queries(&self.query, shards, &vars, Some(&self.shard_renames), switch_table_map)?;
        Ok(resolved.with_timeout(self.query_timeout.or(ctx.query_timeout)))
    }

    /// Route and run the write; the read-only check comes before any shard is resolved
    pub async fn execute_dml(
        &self,
        statement: &str,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<QueryResult> {
        if ctx.read_only {
            return Err(ExecutionError::ReadOnly(statement.to_string()).into());
        }
        let resolved = self.shard_queries(ctx, vcursor, bind_vars, None).await?;
        if resolved.is_empty() {
            return Ok(QueryResult::new());
        }

        let autocommit = dml_autocommit(vcursor, resolved.len(), self.multi_shard_autocommit);
        if resolved.len() > 1 && autocommit {
            info!(table = %self.table_name, shards = resolved.len(), "multi-shard {} committing per shard", statement);
        }
        debug!(opcode = %self.opcode, table = %self.table_name, shards = resolved.len(), autocommit, "dml execute");
        vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, !autocommit, autocommit)
            .await
    }
}

/// Implements the shared operator surface of a DML wrapper around `DmlEngine`
macro_rules! dml_primitive {
    ($name:ident, $statement:literal) => {
        #[derive(Debug)]
        pub struct $name {
            pub dml: DmlEngine,
        }

        impl $name {
            pub fn new(dml: DmlEngine) -> Self {
                Self { dml }
            }
        }

        #[async_trait]
        impl Primitive for $name {
            fn route_type(&self) -> &'static str {
                stringify!($name)
            }

            fn keyspace_name(&self) -> Option<&str> {
                Some(&self.dml.keyspace.name)
            }

            fn table_name(&self) -> Option<&str> {
                Some(&self.dml.table_name)
            }

            fn needs_transaction(&self) -> bool {
                true
            }

            async fn execute(
                &self,
                ctx: &ExecContext,
                vcursor: &dyn Vcursor,
                bind_vars: &BindVars,
                _want_fields: bool,
            ) -> GateResult<QueryResult> {
                self.dml.execute_dml($statement, ctx, vcursor, bind_vars).await
            }

            fn as_batched(&self) -> Option<&dyn BatchPrimitive> {
                Some(self)
            }
        }

        #[async_trait]
        impl BatchPrimitive for $name {
            async fn resolve_shard_query(
                &self,
                ctx: &ExecContext,
                vcursor: &dyn Vcursor,
                bind_vars: &BindVars,
                switch_table_map: Option<&HashMap<String, String>>,
            ) -> GateResult<ResolvedShardQuery> {
                if ctx.read_only {
                    return Err(ExecutionError::ReadOnly($statement.to_string()).into());
                }
                self.dml.shard_queries(ctx, vcursor, bind_vars, switch_table_map).await
            }

            fn merge_result(
                &self,
                _ctx: &ExecContext,
                _vcursor: &dyn Vcursor,
                result: QueryResult,
                _bind_vars: &BindVars,
                _want_fields: bool,
            ) -> GateResult<QueryResult> {
                Ok(result)
            }
        }
    };
}

dml_primitive!(Delete, "DELETE");
dml_primitive!(Update, "UPDATE");
