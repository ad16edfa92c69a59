use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::primitive::*;
use crate::engine::shards::*;
use crate::sql::bind::substitute;
use crate::utils::error::{ExecutionError, GateResult, RoutingError, VcursorError};
use crate::utils::types::{BindValue, BindVars, BoundQuery, PlanValue, QueryResult, Value};
use crate::vcursor::{Destination, Vcursor};
use crate::vindexes::Vindex;
use crate::vschema::{ColumnVindex, Keyspace, Table};

/// Bind variables `__seq0`, `__seq1`, ... carry the auto-increment value of each row
pub const SEQ_VAR_PREFIX: &str = "__seq";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOpcode {
    Unsharded,
    Sharded,
    /// INSERT IGNORE: rows that cannot be routed or verified are dropped instead of failing
    ShardedIgnore,
}

impl fmt::Display for InsertOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Insert{:?}", self)
    }
}

/// Sequence-backed values for an auto-increment column
#[derive(Debug, Clone)]
pub struct Generate {
    /// Keyspace holding the sequence table
    pub keyspace: Arc<Keyspace>,
    pub sequence: String,
    /// One value per row; NULL rows get a reserved sequence value
    pub values: PlanValue,
}

/// Inserts rows, splitting a multi-row statement by the shard each row belongs to
#[derive(Debug)]
pub struct Insert {
    pub opcode: InsertOpcode,
    pub keyspace: Arc<Keyspace>,
    /// Sharding metadata; the first column vindex is the primary one
    pub table: Arc<Table>,
    /// Full statement, used for unsharded inserts
    pub query: String,
    pub prefix: String,
    /// Values text of each row, e.g. `(:__seq0, :_name_0)`
    pub mid: Vec<String>,
    pub suffix: String,
    /// Per column vindex, the list of its column's value in each row
    pub vindex_values: Vec<PlanValue>,
    pub generate: Option<Generate>,
    pub multi_shard_autocommit: bool,
    /// Passed down with every shard query; overrides the context default
    pub query_timeout: Option<Duration>,
}

impl Insert {
    pub fn new_unsharded(keyspace: Arc<Keyspace>, table: Arc<Table>, query: &str) -> Self {
        Self {
            opcode: InsertOpcode::Unsharded,
            keyspace,
            table,
            query: query.to_string(),
            prefix: String::new(),
            mid: Vec::new(),
            suffix: String::new(),
            vindex_values: Vec::new(),
            generate: None,
            multi_shard_autocommit: false,
            query_timeout: None,
        }
    }

    pub fn new_sharded(
        opcode: InsertOpcode,
        table: Arc<Table>,
        prefix: &str,
        mid: Vec<String>,
        suffix: &str,
        vindex_values: Vec<PlanValue>,
    ) -> Self {
        Self {
            opcode,
            keyspace: Arc::clone(&table.keyspace),
            table,
            query: String::new(),
            prefix: prefix.to_string(),
            mid,
            suffix: suffix.to_string(),
            vindex_values,
            generate: None,
            multi_shard_autocommit: false,
            query_timeout: None,
        }
    }

    pub fn with_generate(mut self, generate: Generate) -> Self {
        self.generate = Some(generate);
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

    fn ignore(&self) -> bool {
        self.opcode == InsertOpcode::ShardedIgnore
    }

    fn timeout(&self, ctx: &ExecContext) -> Option<Duration> {
        self.query_timeout.or(ctx.query_timeout)
    }

    /// Fill in `__seqN` for every row, reserving values for NULL rows in one round trip.
    ///
    /// Returns the first reserved value, or 0 when nothing was generated.
    async fn process_generate(&self, vcursor: &dyn Vcursor, bind_vars: &mut BindVars) -> GateResult<u64> {
        let Some(generate) = &self.generate else {
            return Ok(0);
        };
        let values = generate.values.resolve_list(bind_vars)?;
        let missing = values.iter().filter(|v| v.is_null()).count();

        let mut next = 0i64;
        if missing > 0 {
            let resolved = vcursor
                .resolve_destinations(&generate.keyspace.name, &[Destination::AnyShard])
                .await?;
            let shard = resolved.shards.first().ok_or_else(|| {
                VcursorError::Sequence(format!("no shard serves sequence {}", generate.sequence))
            })?;
            let mut vars = BindVars::new();
            vars.insert("n".to_string(), BindValue::Single(Value::Integer(missing as i64)));
            let query = BoundQuery::new(format!("select next :n values from {}", generate.sequence), vars);
            let result = vcursor.execute_standalone(&query, shard, true).await?;
            next = result
                .rows
                .first()
                .and_then(|row| row.get(0))
                .ok_or_else(|| VcursorError::Sequence(format!("{} returned no value", generate.sequence)))?
                .to_i64()?;
            debug!(sequence = %generate.sequence, first = next, count = missing, "reserved sequence values");
        }

        let first = next;
        for (row, value) in values.into_iter().enumerate() {
            let value = if value.is_null() {
                next += 1;
                Value::Integer(next - 1)
            } else {
                value
            };
            bind_vars.insert(format!("{}{}", SEQ_VAR_PREFIX, row), BindValue::Single(value));
        }
        Ok(if missing > 0 { first as u64 } else { 0 })
    }

    fn vindex_column_values(&self, index: usize, bind_vars: &BindVars) -> GateResult<Vec<Value>> {
        let plan = self.vindex_values.get(index).ok_or_else(|| {
            RoutingError::InvalidValue(format!("no values for column vindex {} of {}", index, self.table.name))
        })?;
        let values = plan.resolve_list(bind_vars)?;
        if values.len() != self.mid.len() {
            return Err(RoutingError::InvalidValue(format!(
                "{} vindex values for {} rows",
                values.len(),
                self.mid.len()
            ))
            .into());
        }
        Ok(values)
    }

    /// Destination of each row, `None` where INSERT IGNORE drops a row the vindex cannot map.
    ///
    /// Plain inserts map all rows at once and fail on the first bad value.
    fn map_rows(&self, vindex: &Arc<dyn Vindex>, values: &[Value]) -> GateResult<Vec<Option<Destination>>> {
        if !self.ignore() {
            return Ok(map_values(vindex, values)?.into_iter().map(Some).collect());
        }
        Ok(values
            .iter()
            .map(|value| match map_values(vindex, std::slice::from_ref(value)) {
                Ok(mut destinations) => destinations.pop(),
                Err(err) => {
                    warn!(table = %self.table.name, vindex = vindex.name(), %value, error = %err, "dropping unmappable row");
                    None
                }
            })
            .collect())
    }

    /// Keyspace id of each row from the primary vindex; `None` marks a dropped row
    fn process_primary(&self, bind_vars: &BindVars) -> GateResult<Vec<Option<Vec<u8>>>> {
        let primary = self.table.primary_vindex().ok_or_else(|| RoutingError::MissingVindex {
            opcode: self.opcode.to_string(),
            table: self.table.name.clone(),
        })?;
        let values = self.vindex_column_values(0, bind_vars)?;
        let destinations = self.map_rows(&primary.vindex, &values)?;

        destinations
            .into_iter()
            .zip(&values)
            .map(|(destination, value)| match destination {
                Some(Destination::KeyspaceId(ksid)) => Ok(Some(ksid)),
                _ if self.ignore() => Ok(None),
                _ => Err(RoutingError::VindexMapping(format!("could not map {} to a keyspace id", value)).into()),
            })
            .collect()
    }

    /// Owned vindex values are written by this insert, so each routed row must supply one
    fn process_owned(
        &self,
        vindex: &ColumnVindex,
        values: &[Value],
        ksids: &mut [Option<Vec<u8>>],
    ) -> GateResult<()> {
        let destinations = self.map_rows(&vindex.vindex, values)?;
        for (row, (value, destination)) in values.iter().zip(destinations).enumerate() {
            if ksids[row].is_none() || (destination.is_some() && !value.is_null()) {
                continue;
            }
            if self.ignore() {
                ksids[row] = None;
                continue;
            }
            return Err(RoutingError::VindexMapping(format!(
                "value must be supplied for column {} of owned vindex {}",
                vindex.columns.join(","),
                vindex.name()
            ))
            .into());
        }
        Ok(())
    }

    /// Unowned vindex values must agree with the row's keyspace id; missing ones are derived from it
    fn process_unowned(
        &self,
        vindex: &ColumnVindex,
        values: &[Value],
        ksids: &mut [Option<Vec<u8>>],
        bind_vars: &mut BindVars,
    ) -> GateResult<()> {
        let column = vindex.columns.first().cloned().unwrap_or_default();
        let mut reverse_rows = Vec::new();
        let mut verify_rows = Vec::new();
        for (row, value) in values.iter().enumerate() {
            if ksids[row].is_none() {
                continue;
            }
            if value.is_null() {
                reverse_rows.push(row);
            } else {
                verify_rows.push(row);
            }
        }

        if !reverse_rows.is_empty() {
            let reversible = vindex.vindex.as_reversible().ok_or_else(|| {
                RoutingError::VindexMapping(format!("value must be supplied for column {}", column))
            })?;
            let row_ksids: Vec<Vec<u8>> = reverse_rows.iter().filter_map(|r| ksids[*r].clone()).collect();
            let reversed = reversible.reverse_map(&row_ksids)?;
            for (row, value) in reverse_rows.iter().zip(reversed) {
                bind_vars.insert(format!("_{}_{}", column, row), BindValue::Single(value));
            }
        }

        if !verify_rows.is_empty() {
            let row_values: Vec<Value> = verify_rows.iter().map(|r| values[*r].clone()).collect();
            let row_ksids: Vec<Vec<u8>> = verify_rows.iter().filter_map(|r| ksids[*r].clone()).collect();
            let verified = vindex.vindex.verify(&row_values, &row_ksids)?;
            let mismatched: Vec<usize> = verify_rows
                .iter()
                .zip(verified)
                .filter(|(_, ok)| !ok)
                .map(|(row, _)| *row)
                .collect();
            if !mismatched.is_empty() {
                if !self.ignore() {
                    return Err(ExecutionError::VindexMismatch { rows: mismatched }.into());
                }
                warn!(table = %self.table.name, rows = ?mismatched, "dropping rows that fail vindex verification");
                for row in mismatched {
                    ksids[row] = None;
                }
            }
        }
        Ok(())
    }

    async fn execute_unsharded(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<QueryResult> {
        let mut bind_vars = bind_vars.clone();
        let insert_id = self.process_generate(vcursor, &mut bind_vars).await?;
        let keyspace = self.keyspace.name.as_str();
        let (shards, vars) = resolve_uniform(vcursor, keyspace, &[Destination::AllShards], &bind_vars).await?;
        expect_shard_count(keyspace, "InsertUnsharded", &shards, 1)?;
        let resolved = build_shard_queries(&self.query, shards, &vars, None, None)?.with_timeout(self.timeout(ctx));

        let autocommit = dml_autocommit(vcursor, 1, self.multi_shard_autocommit);
        let mut result = vcursor
            .execute_multi_shard(&resolved.shards, &resolved.queries, !autocommit, autocommit)
            .await?;
        if insert_id > 0 {
            result.insert_id = insert_id;
        }
        Ok(result)
    }

    async fn execute_sharded(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
    ) -> GateResult<QueryResult> {
        let mut bind_vars = bind_vars.clone();
        let insert_id = self.process_generate(vcursor, &mut bind_vars).await?;

        let mut ksids = self.process_primary(&bind_vars)?;
        for (index, vindex) in self.table.column_vindexes.iter().enumerate().skip(1) {
            let values = self.vindex_column_values(index, &bind_vars)?;
            if vindex.owned {
                self.process_owned(vindex, &values, &mut ksids)?;
            } else {
                self.process_unowned(vindex, &values, &mut ksids, &mut bind_vars)?;
            }
        }

        let destinations: Vec<Destination> = ksids
            .into_iter()
            .map(|ksid| ksid.map_or(Destination::None, Destination::KeyspaceId))
            .collect();
        let resolved = vcursor.resolve_destinations(&self.keyspace.name, &destinations).await?;
        if resolved.is_empty() {
            return Ok(QueryResult {
                insert_id,
                ..QueryResult::new()
            });
        }

        let mut queries = Vec::with_capacity(resolved.len());
        for rows in &resolved.indexes {
            let mids: Vec<&str> = rows.iter().filter_map(|r| self.mid.get(*r).map(String::as_str)).collect();
            let text = format!("{}{}{}", self.prefix, mids.join(", "), self.suffix);
            queries.push(BoundQuery::new(substitute(&text, &bind_vars)?, BindVars::new()).with_timeout(self.timeout(ctx)));
        }

        let autocommit = dml_autocommit(vcursor, resolved.len(), self.multi_shard_autocommit);
        debug!(table = %self.table.name, shards = resolved.len(), rows = self.mid.len(), autocommit, "insert execute");
        let mut result = vcursor
            .execute_multi_shard(&resolved.shards, &queries, !autocommit, autocommit)
            .await?;
        if insert_id > 0 {
            result.insert_id = insert_id;
        }
        Ok(result)
    }
}

#[async_trait]
impl Primitive for Insert {
    fn route_type(&self) -> &'static str {
        "Insert"
    }

    fn keyspace_name(&self) -> Option<&str> {
        Some(&self.keyspace.name)
    }

    fn table_name(&self) -> Option<&str> {
        Some(&self.table.name)
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
        if ctx.read_only {
            return Err(ExecutionError::ReadOnly("INSERT".to_string()).into());
        }
        match self.opcode {
            InsertOpcode::Unsharded => self.execute_unsharded(ctx, vcursor, bind_vars).await,
            InsertOpcode::Sharded | InsertOpcode::ShardedIgnore => self.execute_sharded(ctx, vcursor, bind_vars).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::EngineConfig;
    use crate::utils::error::GateError;
    use crate::vcursor::MockVcursor;
    use crate::vindexes::{NumericVindex, Vindex};

    const HIGH: u64 = 0x9000_0000_0000_0000;

    fn keyspace(name: &str, sharded: bool) -> Arc<Keyspace> {
        Arc::new(Keyspace {
            name: name.to_string(),
            sharded,
        })
    }

    fn numeric(name: &str) -> Arc<dyn Vindex> {
        Arc::new(NumericVindex::new(name))
    }

    fn user_table(secondary_owned: Option<bool>) -> Arc<Table> {
        let mut table = Table::new("user", keyspace("user", true));
        table.column_vindexes.push(ColumnVindex {
            columns: vec!["id".to_string()],
            vindex: numeric("user_index"),
            owned: true,
        });
        if let Some(owned) = secondary_owned {
            table.column_vindexes.push(ColumnVindex {
                columns: vec!["shadow".to_string()],
                vindex: numeric("shadow_index"),
                owned,
            });
        }
        Arc::new(table)
    }

    fn mock() -> MockVcursor {
        MockVcursor::from_config(&EngineConfig::default()).unwrap()
    }

    fn list(values: Vec<Value>) -> PlanValue {
        PlanValue::List(values.into_iter().map(PlanValue::Value).collect())
    }

    #[tokio::test]
    async fn test_rows_split_by_shard_in_one_round_trip() {
        let vcursor = mock();
        let insert = Insert::new_sharded(
            InsertOpcode::Sharded,
            user_table(None),
            "insert into user(id, name) values ",
            vec!["(1, 'a')".to_string(), format!("({}, 'b')", HIGH), "(2, 'c')".to_string()],
            "",
            vec![list(vec![Value::Integer(1), Value::Unsigned(HIGH), Value::Integer(2)])],
        );

        insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec![
                "user/-80: insert into user(id, name) values (1, 'a'), (2, 'c')".to_string(),
                format!("user/80-: insert into user(id, name) values ({}, 'b')", HIGH),
            ]
        );
        assert_eq!(vcursor.round_trips(), 1);
        assert!(vcursor.executed().await.iter().all(|q| q.rollback_on_error));
    }

    #[tokio::test]
    async fn test_sequence_fills_null_ids() {
        let vcursor = mock();
        vcursor.set_sequence("user_seq", 100);
        let insert = Insert::new_sharded(
            InsertOpcode::Sharded,
            user_table(None),
            "insert into user(id) values ",
            vec!["(:__seq0)".to_string(), "(:__seq1)".to_string(), "(:__seq2)".to_string()],
            "",
            vec![PlanValue::List(vec![
                PlanValue::Key("__seq0".to_string()),
                PlanValue::Key("__seq1".to_string()),
                PlanValue::Key("__seq2".to_string()),
            ])],
        )
        .with_generate(Generate {
            keyspace: keyspace("main", false),
            sequence: "user_seq".to_string(),
            values: list(vec![Value::Null, Value::Integer(7), Value::Null]),
        });

        let result = insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(result.insert_id, 100);
        let sql = vcursor.executed_sql().await;
        assert_eq!(sql[0], "main/0: select next 2 values from user_seq");
        assert_eq!(sql[1], "user/-80: insert into user(id) values (100), (7), (101)");
    }

    #[tokio::test]
    async fn test_null_primary_value_fails_unless_ignore() {
        let vcursor = mock();
        let build = |opcode| {
            Insert::new_sharded(
                opcode,
                user_table(None),
                "insert into user(id) values ",
                vec!["(null)".to_string(), "(4)".to_string()],
                "",
                vec![list(vec![Value::Null, Value::Integer(4)])],
            )
        };

        match build(InsertOpcode::Sharded)
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
        {
            Err(GateError::Routing(RoutingError::VindexMapping(msg))) => assert!(msg.contains("NULL")),
            other => panic!("Expected vindex mapping error, got {:?}", other),
        }

        build(InsertOpcode::ShardedIgnore)
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec!["user/-80: insert into user(id) values (4)"]
        );
    }

    #[tokio::test]
    async fn test_unmappable_row_skipped_by_insert_ignore() {
        let vcursor = mock();
        let build = |opcode| {
            Insert::new_sharded(
                opcode,
                user_table(None),
                "insert into user(id) values ",
                vec!["('abc')".to_string(), "(4)".to_string()],
                "",
                vec![list(vec![Value::Text("abc".to_string()), Value::Integer(4)])],
            )
        };

        match build(InsertOpcode::Sharded)
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
        {
            Err(GateError::Routing(RoutingError::VindexMapping(msg))) => {
                assert_eq!(msg, "user_index: could not parse value abc as a number")
            }
            other => panic!("Expected vindex mapping error, got {:?}", other),
        }
        assert!(vcursor.executed().await.is_empty());

        build(InsertOpcode::ShardedIgnore)
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec!["user/-80: insert into user(id) values (4)"]
        );
    }

    #[tokio::test]
    async fn test_unmappable_owned_value_skipped_by_insert_ignore() {
        let vcursor = mock();
        let insert = Insert::new_sharded(
            InsertOpcode::ShardedIgnore,
            user_table(Some(true)),
            "insert into user(id, shadow) values ",
            vec!["(1, 'x')".to_string(), "(2, 3)".to_string()],
            "",
            vec![
                list(vec![Value::Integer(1), Value::Integer(2)]),
                list(vec![Value::Text("x".to_string()), Value::Integer(3)]),
            ],
        );

        insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec!["user/-80: insert into user(id, shadow) values (2, 3)"]
        );
    }

    #[tokio::test]
    async fn test_query_timeout_reaches_vcursor() {
        let vcursor = mock();
        let insert = Insert::new_sharded(
            InsertOpcode::Sharded,
            user_table(None),
            "insert into user(id) values ",
            vec!["(1)".to_string()],
            "",
            vec![list(vec![Value::Integer(1)])],
        )
        .with_query_timeout(Duration::from_millis(250));

        insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(vcursor.executed().await[0].timeout, Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_unowned_vindex_reverse_maps_and_verifies() {
        let vcursor = mock();
        let mid = vec!["(1, :_shadow_0)".to_string(), "(2, 99)".to_string()];
        let values = vec![
            list(vec![Value::Integer(1), Value::Integer(2)]),
            list(vec![Value::Null, Value::Integer(99)]),
        ];

        let strict = Insert::new_sharded(
            InsertOpcode::Sharded,
            user_table(Some(false)),
            "insert into user(id, shadow) values ",
            mid.clone(),
            "",
            values.clone(),
        );
        match strict
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
        {
            Err(GateError::Execution(ExecutionError::VindexMismatch { rows })) => assert_eq!(rows, vec![1]),
            other => panic!("Expected vindex mismatch, got {:?}", other),
        }

        let lenient = Insert::new_sharded(
            InsertOpcode::ShardedIgnore,
            user_table(Some(false)),
            "insert into user(id, shadow) values ",
            mid,
            "",
            values,
        );
        lenient
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(
            vcursor.executed_sql().await,
            vec!["user/-80: insert into user(id, shadow) values (1, 1)"]
        );
    }

    #[tokio::test]
    async fn test_owned_vindex_requires_value() {
        let vcursor = mock();
        let insert = Insert::new_sharded(
            InsertOpcode::Sharded,
            user_table(Some(true)),
            "insert into user(id, shadow) values ",
            vec!["(1, null)".to_string()],
            "",
            vec![list(vec![Value::Integer(1)]), list(vec![Value::Null])],
        );
        assert!(insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unsharded_insert_with_sequence() {
        let vcursor = mock();
        let main = keyspace("main", false);
        let table = Arc::new(Table::new("music", Arc::clone(&main)));
        let insert = Insert::new_unsharded(main.clone(), table, "insert into music(id) values (:__seq0)")
            .with_generate(Generate {
                keyspace: main,
                sequence: "music_seq".to_string(),
                values: list(vec![Value::Null]),
            });

        let result = insert
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), false)
            .await
            .unwrap();
        assert_eq!(result.insert_id, 1);
        assert_eq!(
            vcursor.executed_sql().await.last().unwrap(),
            "main/0: insert into music(id) values (1)"
        );
    }

    #[tokio::test]
    async fn test_read_only_insert() {
        let vcursor = mock();
        let insert = Insert::new_unsharded(
            keyspace("main", false),
            Arc::new(Table::new("t", keyspace("main", false))),
            "insert into t values (1)",
        );
        let ctx = ExecContext::new().read_only();
        assert!(matches!(
            insert.execute(&ctx, &vcursor, &BindVars::new(), false).await,
            Err(GateError::Execution(ExecutionError::ReadOnly(_)))
        ));
    }
}
