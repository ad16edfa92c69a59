use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::engine::comparator::{OrderByParams, RowComparator, SortedRow};
use crate::utils::error::{GateResult, VcursorError};
use crate::utils::types::QueryResult;
use crate::vcursor::{BoxedRowStream, RowCursor, RowStream};

/// Drains shard streams one after another, in shard order
pub struct SequentialStream {
    streams: Vec<BoxedRowStream>,
    current: usize,
    fields_sent: bool,
    truncate: usize,
    closed: bool,
}

impl SequentialStream {
    pub fn new(streams: Vec<BoxedRowStream>, truncate: usize) -> Self {
        Self {
            streams,
            current: 0,
            fields_sent: false,
            truncate,
            closed: false,
        }
    }
}

#[async_trait]
impl RowStream for SequentialStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        while self.current < self.streams.len() {
            let ask_fields = want_fields && !self.fields_sent;
            match self.streams[self.current].fetch(ask_fields).await? {
                Some(mut batch) => {
                    if !ask_fields {
                        batch.columns.clear();
                    }
                    self.fields_sent |= ask_fields && !batch.columns.is_empty();
                    return Ok(Some(batch.truncate_columns(self.truncate)));
                }
                None => {
                    self.streams[self.current].close().await?;
                    self.current += 1;
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_err = None;
        for stream in &mut self.streams {
            if let Err(err) = stream.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// K-way merge of individually sorted shard streams.
///
/// The heap holds one row per shard; after a row is handed out only its shard is read again.
pub struct MergeSortStream {
    cursors: Vec<RowCursor>,
    heap: BinaryHeap<Reverse<SortedRow>>,
    comparator: Arc<RowComparator>,
    batch_size: usize,
    truncate: usize,
    started: bool,
    closed: bool,
}

impl MergeSortStream {
    pub fn new(streams: Vec<BoxedRowStream>, order_by: Vec<OrderByParams>, batch_size: usize, truncate: usize) -> Self {
        Self {
            cursors: streams.into_iter().map(RowCursor::new).collect(),
            heap: BinaryHeap::new(),
            comparator: Arc::new(RowComparator::new(order_by)),
            batch_size: batch_size.max(1),
            truncate,
            started: false,
            closed: false,
        }
    }

    async fn refill(&mut self, source: usize) -> GateResult<()> {
        if let Some(row) = self.cursors[source].next_row().await? {
            self.heap.push(Reverse(SortedRow::new(row, source, &self.comparator)));
        }
        Ok(())
    }
}

#[async_trait]
impl RowStream for MergeSortStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        let mut batch = QueryResult::new();
        let first = !self.started;
        if first {
            self.started = true;
            for source in 0..self.cursors.len() {
                let columns = self.cursors[source].columns().await?;
                if batch.columns.is_empty() {
                    batch.columns = columns;
                }
                self.refill(source).await?;
            }
            if !want_fields {
                batch.columns.clear();
            }
        }

        while batch.rows.len() < self.batch_size {
            let Some(Reverse(next)) = self.heap.pop() else {
                break;
            };
            self.refill(next.source).await?;
            batch.rows.push(next.row);
        }
        self.comparator.finish()?;

        if batch.rows.is_empty() && batch.columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch.truncate_columns(self.truncate)))
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.heap.clear();
        let mut first_err = None;
        for cursor in &mut self.cursors {
            if let Err(err) = cursor.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Applies a per-batch transformation to an inner stream
pub struct MapStream<F> {
    inner: BoxedRowStream,
    map: F,
}

impl<F> MapStream<F>
where
    F: FnMut(QueryResult) -> GateResult<QueryResult> + Send,
{
    pub fn new(inner: BoxedRowStream, map: F) -> Self {
        Self { inner, map }
    }
}

#[async_trait]
impl<F> RowStream for MapStream<F>
where
    F: FnMut(QueryResult) -> GateResult<QueryResult> + Send,
{
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        match self.inner.fetch(want_fields).await? {
            Some(batch) => Ok(Some((self.map)(batch)?)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> GateResult<()> {
        self.inner.close().await
    }
}
