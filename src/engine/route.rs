use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::engine::comparator::{OrderByParams, RowComparator};
use crate::engine::primitive::*;
use crate::engine::shards::*;
use crate::engine::streams::{MergeSortStream, SequentialStream};
use crate::utils::error::{GateError, GateResult, RoutingError};
use crate::utils::types::{BindVars, BoundQuery, PlanValue, QueryResult, Value};
use crate::vcursor::{BoxedRowStream, Destination, MemoryStream, ResolvedShard, Vcursor};
use crate::vindexes::Vindex;
use crate::vschema::Keyspace;

/// How a read picks its shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOpcode {
    /// The single shard of an unsharded keyspace
    Unsharded,
    /// One value of a unique vindex
    EqualUnique,
    /// One value of a non-unique vindex
    Equal,
    /// A list of vindex values, each shard receiving only its own
    In,
    Scatter,
    /// Reserve values from a sequence table
    Next,
    /// System schema query, routed by the schema it names
    Dba,
    /// Table replicated to every shard, so any shard will do
    Reference,
    /// Statically known to match nothing
    None,
}

impl fmt::Display for RouteOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouteOpcode::Unsharded => "SelectUnsharded",
            RouteOpcode::EqualUnique => "SelectEqualUnique",
            RouteOpcode::Equal => "SelectEqual",
            RouteOpcode::In => "SelectIN",
            RouteOpcode::Scatter => "SelectScatter",
            RouteOpcode::Next => "SelectNext",
            RouteOpcode::Dba => "SelectDBA",
            RouteOpcode::Reference => "SelectReference",
            RouteOpcode::None => "SelectNone",
        };
        write!(f, "{}", name)
    }
}

/// Sends one read to the shards its opcode selects and merges what comes back
#[derive(Debug)]
pub struct Route {
    pub opcode: RouteOpcode,
    pub keyspace: Arc<Keyspace>,
    pub table_name: String,
    /// Query text with `:name` / `::name` placeholders
    pub query: String,
    /// Query returning only the fields, used when no shard is targeted
    pub field_query: String,
    pub vindex: Option<Arc<dyn Vindex>>,
    /// The routing value for the Equal family, or the list for IN
    pub values: Vec<PlanValue>,
    pub order_by: Vec<OrderByParams>,
    /// Width of the visible result; extra columns only serve ordering
    pub truncate_column_count: usize,
    /// Expressions naming the schema of a system table query
    pub sys_table_schema: Vec<PlanValue>,
}

impl Route {
    pub fn new(opcode: RouteOpcode, keyspace: Arc<Keyspace>, query: &str, field_query: &str) -> Self {
        Self {
            opcode,
            keyspace,
            table_name: String::new(),
            query: query.to_string(),
            field_query: field_query.to_string(),
            vindex: None,
            values: Vec::new(),
            order_by: Vec::new(),
            truncate_column_count: 0,
            sys_table_schema: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table_name = table.to_string();
        self
    }

    pub fn with_vindex(mut self, vindex: Arc<dyn Vindex>, value: PlanValue) -> Self {
        self.vindex = Some(vindex);
        self.values = vec![value];
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderByParams>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_truncate(mut self, count: usize) -> Self {
        self.truncate_column_count = count;
        self
    }

    pub fn with_sys_table_schema(mut self, schema: Vec<PlanValue>) -> Self {
        self.sys_table_schema = schema;
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
            RoutingError::InvalidValue(format!("{} route on {} has no routing value", self.opcode, self.table_name))
                .into()
        })
    }

    /// Pick the shards for this execution, with the bind variables each one gets
    async fn resolve_shards(
        &self,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<(Vec<ResolvedShard>, Vec<BindVars>)> {
        let keyspace = self.keyspace.name.as_str();
        match self.opcode {
            RouteOpcode::Unsharded => {
                let (shards, vars) = resolve_uniform(vcursor, keyspace, &[Destination::AllShards], bind_vars).await?;
                expect_shard_count(keyspace, "Unsharded", &shards, 1)?;
                Ok((shards, vars))
            }
            RouteOpcode::Reference => {
                let (shards, vars) = resolve_uniform(vcursor, keyspace, &[Destination::AnyShard], bind_vars).await?;
                expect_shard_count(keyspace, "Reference", &shards, 1)?;
                Ok((shards, vars))
            }
            RouteOpcode::Next if self.vindex.is_none() => {
                resolve_uniform(vcursor, keyspace, &[Destination::AnyShard], bind_vars).await
            }
            RouteOpcode::EqualUnique | RouteOpcode::Equal | RouteOpcode::Next => {
                let vindex = self.routing_vindex()?;
                let value = self.routing_value()?.resolve_value(bind_vars)?;
                let destinations = map_values(vindex, &[value])?;
                let (shards, vars) = resolve_uniform(vcursor, keyspace, &destinations, bind_vars).await?;
                if self.opcode == RouteOpcode::EqualUnique && shards.len() > 1 {
                    return Err(RoutingError::UnexpectedShardCount {
                        keyspace: keyspace.to_string(),
                        opcode: self.opcode.to_string(),
                        expected: 1,
                        actual: shards.len(),
                    }
                    .into());
                }
                Ok((shards, vars))
            }
            RouteOpcode::In => {
                let vindex = self.routing_vindex()?;
                let values = self.routing_value()?.resolve_list(bind_vars)?;
                let destinations = map_values(vindex, &values)?;
                resolve_with_values(vcursor, keyspace, &destinations, &values, bind_vars).await
            }
            RouteOpcode::Scatter => resolve_uniform(vcursor, keyspace, &[Destination::AllShards], bind_vars).await,
            RouteOpcode::Dba => self.resolve_dba(vcursor, bind_vars).await,
            RouteOpcode::None => Ok((Vec::new(), Vec::new())),
        }
    }

    /// System tables live on every keyspace; the schema a query names picks the keyspace
    async fn resolve_dba(
        &self,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<(Vec<ResolvedShard>, Vec<BindVars>)> {
        let mut named: Option<String> = None;
        for expr in &self.sys_table_schema {
            let schema = match expr.resolve_value(bind_vars)? {
                Value::Null => continue,
                value => value.to_string(),
            };
            match &named {
                Some(existing) if existing != &schema => return Err(RoutingError::MultipleKeyspaces.into()),
                _ => named = Some(schema),
            }
        }

        if let Some(schema) = named {
            match resolve_uniform(vcursor, &schema, &[Destination::AnyShard], bind_vars).await {
                Ok(resolved) if !resolved.0.is_empty() => return Ok(resolved),
                Ok(_) => {}
                // a schema that is not a keyspace is still answered by the default keyspace
                Err(GateError::Routing(RoutingError::KeyspaceNotFound(_))) => {}
                Err(err) => return Err(err),
            }
            debug!(schema = %schema, keyspace = %self.keyspace.name, "system schema is not a keyspace");
        }
        resolve_uniform(vcursor, &self.keyspace.name, &[Destination::AnyShard], bind_vars).await
    }

    async fn shard_queries(
        &self,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery> {
        let (shards, vars) = self.resolve_shards(vcursor, bind_vars).await?;
        build_shard_queries(&self.query, shards, &vars, None, switch_table_map)
    }

    /// Fields without rows, from any shard of the keyspace
    async fn field_result(&self, vcursor: &dyn Vcursor, bind_vars: &BindVars) -> GateResult<QueryResult> {
        let (shards, vars) = resolve_uniform(vcursor, &self.keyspace.name, &[Destination::AnyShard], bind_vars).await?;
        let resolved = build_shard_queries(&self.field_query, shards, &vars, None, None)?;
        if resolved.is_empty() {
            return Ok(QueryResult::new());
        }
        let mut result = vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, false, false)
            .await?;
        result.rows.clear();
        Ok(result.truncate_columns(self.truncate_column_count))
    }

    fn merge_shard_result(
        &self,
        vcursor: &dyn Vcursor,
        mut result: QueryResult,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        if !self.order_by.is_empty() {
            check_row_limit(vcursor, result.rows.len())?;
            RowComparator::new(self.order_by.clone()).sort(&mut result.rows)?;
        }
        if !want_fields {
            result.columns.clear();
        }
        Ok(result.truncate_columns(self.truncate_column_count))
    }
}

#[async_trait]
impl Primitive for Route {
    fn route_type(&self) -> &'static str {
        "Route"
    }

    fn keyspace_name(&self) -> Option<&str> {
        Some(&self.keyspace.name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table_name)
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        let resolved = self.shard_queries(vcursor, bind_vars, None).await?;
        if resolved.is_empty() {
            return if want_fields {
                self.field_result(vcursor, bind_vars).await
            } else {
                Ok(QueryResult::new())
            };
        }
        debug!(opcode = %self.opcode, table = %self.table_name, shards = resolved.len(), "route execute");
        let result = vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, false, false)
            .await?;
        self.merge_result(ctx, vcursor, result, bind_vars, want_fields)
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        Some(self)
    }

    fn as_batched(&self) -> Option<&dyn BatchPrimitive> {
        Some(self)
    }
}

#[async_trait]
impl StreamPrimitive for Route {
    async fn stream_execute(
        &self,
        _ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let resolved = self.shard_queries(vcursor, bind_vars, None).await?;
        if resolved.is_empty() {
            let result = if want_fields {
                self.field_result(vcursor, bind_vars).await?
            } else {
                QueryResult::new()
            };
            return Ok(MemoryStream::boxed(result, vcursor.stream_batch_size()));
        }

        let streams = vcursor
            .stream_execute_multi_shard(&resolved.shards, &resolved.queries)
            .await?;
        if self.order_by.is_empty() {
            return Ok(Box::new(SequentialStream::new(streams, self.truncate_column_count)));
        }
        Ok(Box::new(MergeSortStream::new(
            streams,
            self.order_by.clone(),
            vcursor.stream_batch_size(),
            self.truncate_column_count,
        )))
    }
}

#[async_trait]
impl BatchPrimitive for Route {
    async fn resolve_shard_query(
        &self,
        _ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        switch_table_map: Option<&HashMap<String, String>>,
    ) -> GateResult<ResolvedShardQuery> {
        self.shard_queries(vcursor, bind_vars, switch_table_map).await
    }

    fn merge_result(
        &self,
        _ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        result: QueryResult,
        _bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        self.merge_shard_result(vcursor, result, want_fields)
    }
}

/// Query text that names the shard explicitly, for callers outside the operator tree
pub fn bound_query_for(resolved: &ResolvedShardQuery, shard: &ResolvedShard) -> Option<BoundQuery> {
    resolved
        .shards
        .iter()
        .position(|s| s == shard)
        .and_then(|i| resolved.queries.get(i).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::{EngineConfig, KeyspaceTopology, TopologyConfig};
    use crate::utils::types::{BindValue, ColumnMetadata, DataType, Row};
    use crate::vcursor::{collect_stream, MockVcursor};
    use crate::vindexes::NumericVindex;

    fn keyspace(name: &str, sharded: bool) -> Arc<Keyspace> {
        Arc::new(Keyspace {
            name: name.to_string(),
            sharded,
        })
    }

    fn mock() -> MockVcursor {
        MockVcursor::from_config(&EngineConfig::default()).unwrap()
    }

    fn ids(values: &[i64]) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new("id", DataType::Integer)]);
        result.rows = values.iter().map(|v| Row::new(vec![Value::Integer(*v)])).collect();
        result
    }

    fn numeric() -> Arc<dyn Vindex> {
        Arc::new(NumericVindex::new("user_index"))
    }

    #[tokio::test]
    async fn test_unsharded_route() {
        let vcursor = mock();
        vcursor.set_shard_result("main", "0", ids(&[1, 2]));
        let route = Route::new(RouteOpcode::Unsharded, keyspace("main", false), "select id from t", "");

        let result = route
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(vcursor.executed_sql().await, vec!["main/0: select id from t"]);
    }

    #[tokio::test]
    async fn test_unsharded_route_requires_one_shard() {
        let vcursor = mock();
        let route = Route::new(RouteOpcode::Unsharded, keyspace("user", true), "select 1", "");
        match route.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Routing(RoutingError::UnexpectedShardCount { actual, .. })) => assert_eq!(actual, 2),
            other => panic!("Expected unexpected shard count, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reference_route_requires_one_shard() {
        let vcursor = mock();
        let route = Route::new(RouteOpcode::Reference, keyspace("user", true), "select code from country", "");
        route
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(vcursor.executed_sql().await, vec!["user/-80: select code from country"]);

        let topology = TopologyConfig {
            keyspaces: std::collections::BTreeMap::from([(
                "lookup".to_string(),
                KeyspaceTopology {
                    sharded: false,
                    shards: Vec::new(),
                },
            )]),
        };
        let empty = MockVcursor::new(&topology).unwrap();
        let route = Route::new(RouteOpcode::Reference, keyspace("lookup", false), "select 1", "");
        match route.execute(&ExecContext::new(), &empty, &BindVars::new(), false).await {
            Err(GateError::Routing(RoutingError::UnexpectedShardCount { opcode, actual, .. })) => {
                assert_eq!((opcode.as_str(), actual), ("Reference", 0))
            }
            other => panic!("Expected unexpected shard count, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_equal_unique_targets_one_shard() {
        let vcursor = mock();
        let mut bind_vars = BindVars::new();
        bind_vars.insert("id".to_string(), BindValue::Single(Value::Integer(5)));
        let route = Route::new(
            RouteOpcode::EqualUnique,
            keyspace("user", true),
            "select * from user where id = :id",
            "",
        )
        .with_vindex(numeric(), PlanValue::Key("id".to_string()));

        route
            .execute(&ExecContext::new(), &vcursor, &bind_vars, false)
            .await
            .unwrap();
        assert_eq!(vcursor.executed_sql().await, vec!["user/-80: select * from user where id = 5"]);
    }

    #[tokio::test]
    async fn test_equal_without_vindex() {
        let vcursor = mock();
        let route = Route::new(RouteOpcode::Equal, keyspace("user", true), "select 1", "")
            .with_table("user");
        match route.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Routing(RoutingError::MissingVindex { table, .. })) => assert_eq!(table, "user"),
            other => panic!("Expected missing vindex, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_in_sends_each_shard_its_values() {
        let vcursor = mock();
        let high = Value::Unsigned(0xa000_0000_0000_0000);
        let mut bind_vars = BindVars::new();
        bind_vars.insert(
            "ids".to_string(),
            BindValue::Tuple(vec![Value::Integer(1), high.clone(), Value::Integer(3)]),
        );
        let route = Route::new(
            RouteOpcode::In,
            keyspace("user", true),
            "select * from user where id in ::__vals",
            "",
        )
        .with_vindex(numeric(), PlanValue::ListKey("ids".to_string()));

        route
            .execute(&ExecContext::new(), &vcursor, &bind_vars, false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec![
                "user/-80: select * from user where id in (1, 3)".to_string(),
                format!("user/80-: select * from user where id in ({})", high),
            ]
        );
    }

    #[tokio::test]
    async fn test_scatter_sorts_and_truncates() {
        let vcursor = mock();
        let mut low = QueryResult::with_columns(vec![
            ColumnMetadata::new("id", DataType::Integer),
            ColumnMetadata::new("weight", DataType::Integer),
        ]);
        low.rows = vec![
            Row::new(vec![Value::Integer(1), Value::Integer(30)]),
            Row::new(vec![Value::Integer(2), Value::Integer(10)]),
        ];
        let mut high = low.clone();
        high.rows = vec![Row::new(vec![Value::Integer(3), Value::Integer(20)])];
        vcursor.set_shard_result("user", "-80", low);
        vcursor.set_shard_result("user", "80-", high);

        let route = Route::new(RouteOpcode::Scatter, keyspace("user", true), "select id, weight from user", "")
            .with_order_by(vec![OrderByParams::asc(1)])
            .with_truncate(1);
        let result = route
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        let ordered: Vec<&Value> = result.rows.iter().map(|r| &r.values[0]).collect();
        assert_eq!(ordered, vec![&Value::Integer(2), &Value::Integer(3), &Value::Integer(1)]);
        assert_eq!(result.columns.len(), 1);
        assert!(result.rows.iter().all(|r| r.values.len() == 1));
    }

    #[tokio::test]
    async fn test_scatter_stream_merges_in_order() {
        let vcursor = mock().with_stream_batch_size(1);
        vcursor.set_shard_result("user", "-80", ids(&[1, 5, 6]));
        vcursor.set_shard_result("user", "80-", ids(&[2, 3, 8]));
        let route = Route::new(RouteOpcode::Scatter, keyspace("user", true), "select id from user order by id", "")
            .with_order_by(vec![OrderByParams::asc(0)]);

        let mut stream = route
            .stream_execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        let result = collect_stream(&mut stream, true).await.unwrap();
        let values: Vec<Value> = result.rows.into_iter().map(|r| r.values[0].clone()).collect();
        assert_eq!(values, (1..=8).filter(|v| ![4, 7].contains(v)).map(Value::Integer).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_none_route_returns_fields_from_field_query() {
        let vcursor = mock();
        vcursor.set_query_result("user", "-80", "select id from user where 1 != 1", ids(&[]));
        let route = Route::new(
            RouteOpcode::None,
            keyspace("user", true),
            "select id from user where id in ()",
            "select id from user where 1 != 1",
        );

        let result = route
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.columns[0].name, "id");

        vcursor.clear_log().await;
        let result = route
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert!(result.columns.is_empty());
        assert!(vcursor.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_dba_routes_by_named_schema() {
        let vcursor = mock();
        let mut bind_vars = BindVars::new();
        bind_vars.insert("schema".to_string(), BindValue::Single(Value::Text("user".to_string())));
        let route = Route::new(
            RouteOpcode::Dba,
            keyspace("main", false),
            "select * from information_schema.tables where table_schema = :schema",
            "",
        )
        .with_sys_table_schema(vec![PlanValue::Key("schema".to_string())]);

        route
            .execute(&ExecContext::new(), &vcursor, &bind_vars, false)
            .await
            .unwrap();
        assert_eq!(vcursor.executed().await[0].shard, ResolvedShard::new("user", "-80"));

        // an unknown schema falls back to the route's own keyspace
        vcursor.clear_log().await;
        bind_vars.insert("schema".to_string(), BindValue::Single(Value::Text("mysql".to_string())));
        route
            .execute(&ExecContext::new(), &vcursor, &bind_vars, false)
            .await
            .unwrap();
        assert_eq!(vcursor.executed().await[0].shard, ResolvedShard::new("main", "0"));
    }

    #[tokio::test]
    async fn test_dba_rejects_two_schemas() {
        let vcursor = mock();
        let route = Route::new(RouteOpcode::Dba, keyspace("main", false), "select 1", "").with_sys_table_schema(vec![
            PlanValue::Value(Value::Text("user".to_string())),
            PlanValue::Value(Value::Text("main".to_string())),
        ]);
        match route.execute(&ExecContext::new(), &vcursor, &BindVars::new(), false).await {
            Err(GateError::Routing(RoutingError::MultipleKeyspaces)) => {}
            other => panic!("Expected multiple keyspaces error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolved_query_executes_like_route() {
        let vcursor = mock();
        vcursor.set_query_result("user", "-80", "select * from user where id = 9", ids(&[9]));
        let mut bind_vars = BindVars::new();
        bind_vars.insert("id".to_string(), BindValue::Single(Value::Integer(9)));
        let route = Route::new(
            RouteOpcode::EqualUnique,
            keyspace("user", true),
            "select * from user where id = :id",
            "",
        )
        .with_vindex(numeric(), PlanValue::Key("id".to_string()));
        let ctx = ExecContext::new();

        let resolved = route.resolve_shard_query(&ctx, &vcursor, &bind_vars, None).await.unwrap();
        assert_eq!(resolved.len(), 1);
        let shard = resolved.shards[0].clone();
        let query = bound_query_for(&resolved, &shard).unwrap();
        assert_eq!(query.sql, "select * from user where id = 9");

        let direct = vcursor.execute_multi_shard(&[shard], &[query], false, false).await.unwrap();
        let executed = route.execute(&ctx, &vcursor, &bind_vars, true).await.unwrap();
        assert_eq!(direct.rows, executed.rows);
    }
}
