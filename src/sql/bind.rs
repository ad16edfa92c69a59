//! Query-text rewriting applied just before a query crosses the vcursor boundary.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::utils::error::{ExecutionError, GateError, GateResult};
use crate::utils::types::{BindValue, BindVars};

fn placeholder_regex() -> GateResult<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    // quoted strings are matched first so placeholders inside them are left alone
    REGEX
        .get_or_init(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|(::?)([A-Za-z_][A-Za-z0-9_]*)"#).ok())
        .as_ref()
        .ok_or_else(|| GateError::Internal("failed to compile placeholder pattern".to_string()))
}

/// Replace `:name` and `::name` placeholders with literals from `bind_vars`.
///
/// `:name` expects a single value and `::name` a tuple rendered as `(a, b, ...)`.
/// Every missing variable is reported, not only the first.
pub fn substitute(sql: &str, bind_vars: &BindVars) -> GateResult<String> {
    let mut missing = Vec::new();
    let mut mismatched = None;

    let rewritten = placeholder_regex()?.replace_all(sql, |caps: &Captures| {
        let (prefix, name) = match (caps.get(1), caps.get(2)) {
            (Some(prefix), Some(name)) => (prefix.as_str(), name.as_str()),
            _ => return caps[0].to_string(),
        };
        match (prefix, bind_vars.get(name)) {
            (":", Some(BindValue::Single(value))) => value.to_sql_literal(),
            ("::", Some(BindValue::Tuple(values))) => {
                let items: Vec<String> = values.iter().map(|v| v.to_sql_literal()).collect();
                format!("({})", items.join(", "))
            }
            (_, Some(_)) => {
                mismatched.get_or_insert_with(|| name.to_string());
                caps[0].to_string()
            }
            (_, None) => {
                missing.push(name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ExecutionError::MissingBindVariable(missing.join(", ")).into());
    }
    if let Some(name) = mismatched {
        return Err(GateError::Internal(format!(
            "bind variable {} does not match its placeholder kind",
            name
        )));
    }
    Ok(rewritten.into_owned())
}

/// Rename whole-word table identifiers, e.g. to point a shard at a physical table
pub fn rename_tables(sql: &str, switch_table_map: &HashMap<String, String>) -> GateResult<String> {
    let mut rewritten = sql.to_string();
    for (from, to) in switch_table_map {
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(from)))
            .map_err(|e| GateError::Internal(format!("invalid table name {}: {}", from, e)))?;
        rewritten = pattern.replace_all(&rewritten, to.as_str()).into_owned();
    }
    Ok(rewritten)
}
