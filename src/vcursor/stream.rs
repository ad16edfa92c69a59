use async_trait::async_trait;
use std::collections::VecDeque;

use crate::utils::error::{GateResult, VcursorError};
use crate::utils::types::{ColumnMetadata, QueryResult, Row};

/// Pull-based sequence of result batches.
///
/// A stream is advanced by one caller at a time. `close` releases the stream and every stream it
/// wraps; closing twice is a no-op, while fetching after close fails.
#[async_trait]
pub trait RowStream: Send {
    /// Next batch of rows, or `None` once the stream is exhausted.
    /// Fields are only filled in on the first batch, and only when asked for.
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>>;

    async fn close(&mut self) -> GateResult<()>;
}

pub type BoxedRowStream = Box<dyn RowStream>;

/// Stream over an already materialized result
#[derive(Debug)]
pub struct MemoryStream {
    columns: Vec<ColumnMetadata>,
    rows: VecDeque<Row>,
    batch_size: usize,
    started: bool,
    closed: bool,
}

impl MemoryStream {
    pub fn new(result: QueryResult, batch_size: usize) -> Self {
        Self {
            columns: result.columns,
            rows: result.rows.into(),
            batch_size: batch_size.max(1),
            started: false,
            closed: false,
        }
    }

    pub fn boxed(result: QueryResult, batch_size: usize) -> BoxedRowStream {
        Box::new(Self::new(result, batch_size))
    }
}

#[async_trait]
impl RowStream for MemoryStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        let first = !self.started;
        self.started = true;
        if self.rows.is_empty() && !(first && want_fields && !self.columns.is_empty()) {
            return Ok(None);
        }

        let take = self.batch_size.min(self.rows.len());
        let mut batch = QueryResult::new();
        batch.rows = self.rows.drain(..take).collect();
        if first && want_fields {
            batch.columns = self.columns.clone();
        }
        Ok(Some(batch))
    }

    async fn close(&mut self) -> GateResult<()> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}

/// Row-at-a-time view over a stream, remembering the fields of its first batch
pub struct RowCursor {
    stream: BoxedRowStream,
    buffer: VecDeque<Row>,
    columns: Option<Vec<ColumnMetadata>>,
    exhausted: bool,
}

impl RowCursor {
    pub fn new(stream: BoxedRowStream) -> Self {
        Self {
            stream,
            buffer: VecDeque::new(),
            columns: None,
            exhausted: false,
        }
    }

    /// Fields reported by the first batch, fetching it if needed
    pub async fn columns(&mut self) -> GateResult<Vec<ColumnMetadata>> {
        if self.columns.is_none() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.columns.clone().unwrap_or_default())
    }

    pub async fn next_row(&mut self) -> GateResult<Option<Row>> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn fill(&mut self) -> GateResult<()> {
        match self.stream.fetch(self.columns.is_none()).await? {
            Some(batch) => {
                if self.columns.is_none() {
                    self.columns = Some(batch.columns);
                }
                self.buffer.extend(batch.rows);
            }
            None => self.exhausted = true,
        }
        Ok(())
    }

    pub async fn close(&mut self) -> GateResult<()> {
        self.buffer.clear();
        self.exhausted = true;
        self.stream.close().await
    }
}

/// Drain a stream into one result
pub async fn collect_stream(stream: &mut BoxedRowStream, want_fields: bool) -> GateResult<QueryResult> {
    let mut result = QueryResult::new();
    let mut first = true;
    while let Some(batch) = stream.fetch(want_fields && first).await? {
        first = false;
        result.append(batch);
    }
    stream.close().await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::types::{DataType, Value};

    fn result(rows: i64) -> QueryResult {
        let mut result = QueryResult::with_columns(vec![ColumnMetadata::new("id", DataType::Integer)]);
        result.rows = (0..rows).map(|i| Row::new(vec![Value::Integer(i)])).collect();
        result
    }

    #[tokio::test]
    async fn test_memory_stream_batches() {
        let mut stream = MemoryStream::new(result(5), 2);

        let first = stream.fetch(true).await.unwrap().unwrap();
        assert_eq!(first.columns.len(), 1);
        assert_eq!(first.rows.len(), 2);

        let second = stream.fetch(true).await.unwrap().unwrap();
        assert!(second.columns.is_empty());
        assert_eq!(second.rows.len(), 2);

        assert_eq!(stream.fetch(true).await.unwrap().unwrap().rows.len(), 1);
        assert!(stream.fetch(true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_still_reports_fields() {
        let mut stream = MemoryStream::new(result(0), 10);
        let first = stream.fetch(true).await.unwrap().unwrap();
        assert_eq!(first.columns[0].name, "id");
        assert!(first.rows.is_empty());
        assert!(stream.fetch(true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let mut stream = MemoryStream::new(result(3), 10);
        stream.close().await.unwrap();
        stream.close().await.unwrap();
        match stream.fetch(false).await {
            Err(crate::utils::error::GateError::Vcursor(VcursorError::StreamClosed)) => {}
            other => panic!("Expected closed stream error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_row_cursor() {
        let mut cursor = RowCursor::new(MemoryStream::boxed(result(3), 2));
        assert_eq!(cursor.columns().await.unwrap().len(), 1);
        let mut seen = Vec::new();
        while let Some(row) = cursor.next_row().await.unwrap() {
            seen.push(row.values[0].clone());
        }
        assert_eq!(seen, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_stream() {
        let mut stream = MemoryStream::boxed(result(4), 3);
        let collected = collect_stream(&mut stream, true).await.unwrap();
        assert_eq!(collected.rows.len(), 4);
        assert_eq!(collected.columns.len(), 1);
    }
}
