//! Shard-resolution helpers shared by the routing operators.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::primitive::ResolvedShardQuery;
use crate::sql::bind::{rename_tables, substitute};
use crate::utils::error::{GateError, GateResult, RoutingError};
use crate::utils::types::{BindValue, BindVars, BoundQuery, Value};
use crate::vcursor::{Destination, ResolvedDestinations, ResolvedShard, Vcursor};
use crate::vindexes::Vindex;

/// Map vindex values to destinations; failures other than routing errors become `VindexMapping`
pub fn map_values(vindex: &Arc<dyn Vindex>, values: &[Value]) -> GateResult<Vec<Destination>> {
    let destinations = vindex.map(values).map_err(|err| match err {
        GateError::Routing(_) => err,
        other => RoutingError::VindexMapping(format!("{}: {}", vindex.name(), other)).into(),
    })?;
    if destinations.len() != values.len() {
        return Err(RoutingError::VindexMapping(format!(
            "{} returned {} destinations for {} values",
            vindex.name(),
            destinations.len(),
            values.len()
        ))
        .into());
    }
    Ok(destinations)
}

/// Resolve destinations and give every shard the same bind variables
pub async fn resolve_uniform(
    vcursor: &dyn Vcursor,
    keyspace: &str,
    destinations: &[Destination],
    bind_vars: &BindVars,
) -> GateResult<(Vec<ResolvedShard>, Vec<BindVars>)> {
    let resolved = vcursor.resolve_destinations(keyspace, destinations).await?;
    let vars = vec![bind_vars.clone(); resolved.len()];
    Ok((resolved.shards, vars))
}

/// Resolve one destination per value and bind, per shard, only the values routed there.
///
/// The values land in `__vals` as a tuple, in their input order.
pub async fn resolve_with_values(
    vcursor: &dyn Vcursor,
    keyspace: &str,
    destinations: &[Destination],
    values: &[Value],
    bind_vars: &BindVars,
) -> GateResult<(Vec<ResolvedShard>, Vec<BindVars>)> {
    let ResolvedDestinations { shards, indexes } = vcursor.resolve_destinations(keyspace, destinations).await?;
    let vars = indexes
        .iter()
        .map(|positions| {
            let mut shard_vars = bind_vars.clone();
            let shard_values = positions.iter().filter_map(|i| values.get(*i).cloned()).collect();
            shard_vars.insert(VALS_BIND_VAR.to_string(), BindValue::Tuple(shard_values));
            shard_vars
        })
        .collect();
    Ok((shards, vars))
}

/// Bind variable carrying the IN-list values routed to one shard
pub const VALS_BIND_VAR: &str = "__vals";

/// Render the final per-shard query text.
///
/// `shard_renames` applies per shard name; `switch_table_map` applies to every shard after it.
pub fn build_shard_queries(
    sql: &str,
    shards: Vec<ResolvedShard>,
    bind_vars: &[BindVars],
    shard_renames: Option<&HashMap<String, HashMap<String, String>>>,
    switch_table_map: Option<&HashMap<String, String>>,
) -> GateResult<ResolvedShardQuery> {
    let mut queries = Vec::with_capacity(shards.len());
    for (shard, vars) in shards.iter().zip(bind_vars) {
        let mut text = substitute(sql, vars)?;
        if let Some(renames) = shard_renames.and_then(|r| r.get(&shard.shard)) {
            text = rename_tables(&text, renames)?;
        }
        if let Some(map) = switch_table_map {
            text = rename_tables(&text, map)?;
        }
        queries.push(BoundQuery::new(text, BindVars::new()));
    }
    Ok(ResolvedShardQuery { shards, queries })
}

/// Fail unless exactly `expected` shards were resolved
pub fn expect_shard_count(keyspace: &str, opcode: &str, shards: &[ResolvedShard], expected: usize) -> GateResult<()> {
    if shards.len() != expected {
        return Err(RoutingError::UnexpectedShardCount {
            keyspace: keyspace.to_string(),
            opcode: opcode.to_string(),
            expected,
            actual: shards.len(),
        }
        .into());
    }
    Ok(())
}

/// Whether a write may commit shard by shard in one round trip
pub fn dml_autocommit(vcursor: &dyn Vcursor, shard_count: usize, multi_shard_autocommit: bool) -> bool {
    (shard_count == 1 || multi_shard_autocommit) && vcursor.autocommit_approval()
}
