use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::engine::primitive::*;
use crate::engine::shards::*;
use crate::engine::streams::SequentialStream;
use crate::utils::error::{ExecutionError, GateResult};
use crate::utils::types::{BindVars, QueryResult};
use crate::vcursor::{BoxedRowStream, Destination, Vcursor};
use crate::vschema::Keyspace;

/// Sends a statement verbatim to an explicit destination
#[derive(Debug)]
pub struct SendQuery {
    pub keyspace: Arc<Keyspace>,
    pub target_destination: Destination,
    pub query: String,
    pub is_dml: bool,
    /// Fail unless the destination resolves to exactly one shard
    pub single_shard_only: bool,
    pub multi_shard_autocommit: bool,
}

impl SendQuery {
    pub fn new(keyspace: Arc<Keyspace>, target_destination: Destination, query: &str) -> Self {
        Self {
            keyspace,
            target_destination,
            query: query.to_string(),
            is_dml: false,
            single_shard_only: false,
            multi_shard_autocommit: false,
        }
    }

    pub fn dml(mut self) -> Self {
        self.is_dml = true;
        self
    }

    pub fn single_shard_only(mut self) -> Self {
        self.single_shard_only = true;
        self
    }

    async fn shard_queries(&self, vcursor: &dyn Vcursor, bind_vars: &BindVars) -> GateResult<ResolvedShardQuery> {
        let destinations = [self.target_destination.clone()];
        let (shards, vars) = resolve_uniform(vcursor, &self.keyspace.name, &destinations, bind_vars).await?;
        if self.single_shard_only {
            expect_shard_count(&self.keyspace.name, "Send", &shards, 1)?;
        }
        build_shard_queries(&self.query, shards, &vars, None, None)
    }
}

#[async_trait]
impl Primitive for SendQuery {
    fn route_type(&self) -> &'static str {
        "Send"
    }

    fn keyspace_name(&self) -> Option<&str> {
        Some(&self.keyspace.name)
    }

    fn needs_transaction(&self) -> bool {
        self.is_dml
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        if self.is_dml && ctx.read_only {
            return Err(ExecutionError::ReadOnly("Send".to_string()).into());
        }
        let resolved = self.shard_queries(vcursor, bind_vars).await?;
        debug!(destination = %self.target_destination, shards = resolved.len(), "send");
        let autocommit = self.is_dml && dml_autocommit(vcursor, resolved.len(), self.multi_shard_autocommit);
        let rollback_on_error = self.is_dml && !autocommit;
        let mut result = vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, rollback_on_error, autocommit)
            .await?;
        if !want_fields {
            result.columns.clear();
        }
        Ok(result)
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        if self.is_dml {
            return None;
        }
        Some(self)
    }
}

#[async_trait]
impl StreamPrimitive for SendQuery {
    async fn stream_execute(
        &self,
        _ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        _want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let resolved = self.shard_queries(vcursor, bind_vars).await?;
        let streams = vcursor
            .stream_execute_multi_shard(&resolved.shards, &resolved.queries)
            .await?;
        Ok(Box::new(SequentialStream::new(streams, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::EngineConfig;
    use crate::utils::error::{GateError, RoutingError};
    use crate::vcursor::MockVcursor;

    fn user_keyspace() -> Arc<Keyspace> {
        Arc::new(Keyspace {
            name: "user".to_string(),
            sharded: true,
        })
    }

    #[tokio::test]
    async fn test_send_to_named_shard() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let send = SendQuery::new(user_keyspace(), Destination::Shard("80-".to_string()), "show tables");
        send.execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(vcursor.executed_sql().await, vec!["user/80-: show tables"]);
    }

    #[tokio::test]
    async fn test_dml_send_autocommit_rule() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let send = SendQuery::new(user_keyspace(), Destination::AllShards, "update t set a = 1").dml();
        send.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        let executed = vcursor.executed().await;
        assert_eq!(executed.len(), 2);
        assert!(executed.iter().all(|q| !q.autocommit && q.rollback_on_error));
        assert!(send.as_streaming().is_none());
        assert!(send.needs_transaction());
    }

    #[tokio::test]
    async fn test_single_shard_only() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let send = SendQuery::new(user_keyspace(), Destination::AllShards, "select 1").single_shard_only();
        match send.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Routing(RoutingError::UnexpectedShardCount { expected: 1, actual: 2, .. })) => {}
            other => panic!("Expected unexpected shard count, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_only_rejects_dml() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let send = SendQuery::new(user_keyspace(), Destination::AnyShard, "delete from t").dml();
        let ctx = ExecContext::new().read_only();
        match send.execute(&ctx, &vcursor, &BindVars::new(), false).await {
            Err(GateError::Execution(ExecutionError::ReadOnly(_))) => {}
            other => panic!("Expected read only error, got {:?}", other),
        }
        assert!(vcursor.executed().await.is_empty());
    }
}
