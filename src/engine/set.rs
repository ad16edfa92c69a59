use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::primitive::*;
use crate::engine::shards::expect_shard_count;
use crate::utils::error::GateResult;
use crate::utils::types::{BindVars, BoundQuery, PlanValue, QueryResult};
use crate::vcursor::{Destination, Vcursor};
use crate::vschema::Keyspace;

/// One assignment of a SET statement
#[derive(Debug, Clone)]
pub enum SetOp {
    /// `SET @name = expr`, kept in the session
    UserDefinedVariable { name: String, expr: PlanValue },
    /// A system variable the gateway accepts without acting on it
    SysVarIgnore { name: String, expr: String },
    /// A system variable checked against one shard; a mismatch is logged, not raised
    SysVarCheckAndIgnore {
        name: String,
        keyspace: Arc<Keyspace>,
        target_destination: Destination,
        expr: String,
    },
}

impl SetOp {
    fn name(&self) -> &str {
        match self {
            SetOp::UserDefinedVariable { name, .. }
            | SetOp::SysVarIgnore { name, .. }
            | SetOp::SysVarCheckAndIgnore { name, .. } => name,
        }
    }

    async fn apply(&self, vcursor: &dyn Vcursor, bind_vars: &BindVars) -> GateResult<()> {
        match self {
            SetOp::UserDefinedVariable { name, expr } => {
                let value = expr.resolve_value(bind_vars)?;
                vcursor.set_user_defined_variable(name, value).await
            }
            SetOp::SysVarIgnore { name, expr } => {
                debug!(variable = %name, value = %expr, "ignoring system variable");
                Ok(())
            }
            SetOp::SysVarCheckAndIgnore {
                name,
                keyspace,
                target_destination,
                expr,
            } => {
                let resolved = vcursor
                    .resolve_destinations(&keyspace.name, std::slice::from_ref(target_destination))
                    .await?;
                expect_shard_count(&keyspace.name, "SysVarCheckAndIgnore", &resolved.shards, 1)?;
                let check = BoundQuery::new(format!("select 1 from dual where @@{} = {}", name, expr), bind_vars.clone());
                let result = vcursor.execute_multi_shard(&resolved.shards, &[check], false, false).await?;
                if result.rows.is_empty() {
                    warn!(variable = %name, value = %expr, "ignored inapplicable SET");
                }
                Ok(())
            }
        }
    }
}

/// SET statement
#[derive(Debug)]
pub struct Set {
    pub ops: Vec<SetOp>,
}

impl Set {
    pub fn new(ops: Vec<SetOp>) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl Primitive for Set {
    fn route_type(&self) -> &'static str {
        "Set"
    }

    async fn execute(
        &self,
        _ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        _want_fields: bool,
    ) -> GateResult<QueryResult> {
        for op in &self.ops {
            debug!(variable = op.name(), "set");
            op.apply(vcursor, bind_vars).await?;
        }
        Ok(QueryResult::new())
    }
}
