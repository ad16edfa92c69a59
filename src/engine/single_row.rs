use async_trait::async_trait;

use crate::engine::primitive::*;
use crate::utils::error::GateResult;
use crate::utils::types::{BindVars, QueryResult, Row};
use crate::vcursor::{BoxedRowStream, MemoryStream, Vcursor};

/// One row with no columns, the input of a SELECT without a FROM clause
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleRow;

fn single_row() -> QueryResult {
    let mut result = QueryResult::new();
    result.rows.push(Row::new(Vec::new()));
    result
}

#[async_trait]
impl Primitive for SingleRow {
    fn route_type(&self) -> &'static str {
        "SingleRow"
    }

    async fn execute(
        &self,
        _ctx: &ExecContext,
        _vcursor: &dyn Vcursor,
        _bind_vars: &BindVars,
        _want_fields: bool,
    ) -> GateResult<QueryResult> {
        Ok(single_row())
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        Some(self)
    }
}

#[async_trait]
impl StreamPrimitive for SingleRow {
    async fn stream_execute(
        &self,
        _ctx: &ExecContext,
        _vcursor: &dyn Vcursor,
        _bind_vars: &BindVars,
        _want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        Ok(MemoryStream::boxed(single_row(), 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::EngineConfig;
    use crate::vcursor::MockVcursor;

    #[tokio::test]
    async fn test_one_empty_row_without_shard_access() {
        let vcursor = MockVcursor::from_config(&EngineConfig::default()).unwrap();
        let result = SingleRow
            .execute(&ExecContext::new(), &vcursor, &BindVars::new(), true)
            .await
            .unwrap();
        assert_eq!(result.rows, vec![Row::new(Vec::new())]);
        assert!(result.columns.is_empty());
        assert!(vcursor.executed().await.is_empty());
        assert!(!SingleRow.needs_transaction());
    }
}
