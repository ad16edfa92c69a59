use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt;

use crate::engine::primitive::*;
use crate::utils::error::{ExecutionError, GateResult, VcursorError};
use crate::utils::types::{BindVars, ColumnMetadata, DataType, QueryResult, Row, Value};
use crate::vcursor::{BoxedRowStream, RowStream, Vcursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOpcode {
    /// Folds the per-shard partial counts
    Count,
    Sum,
    Min,
    Max,
    /// Counts changes of a value the input is sorted by within each group
    CountDistinct,
    SumDistinct,
}

impl AggregateOpcode {
    fn is_distinct(self) -> bool {
        matches!(self, AggregateOpcode::CountDistinct | AggregateOpcode::SumDistinct)
    }
}

impl fmt::Display for AggregateOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateOpcode::Count => "count",
            AggregateOpcode::Sum => "sum",
            AggregateOpcode::Min => "min",
            AggregateOpcode::Max => "max",
            AggregateOpcode::CountDistinct => "count_distinct",
            AggregateOpcode::SumDistinct => "sum_distinct",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateParams {
    pub opcode: AggregateOpcode,
    /// Offset of the aggregated column in the input row
    pub col: usize,
    pub alias: String,
}

impl AggregateParams {
    pub fn new(opcode: AggregateOpcode, col: usize, alias: &str) -> Self {
        Self {
            opcode,
            col,
            alias: alias.to_string(),
        }
    }
}

/// Group-by over an input already sorted by the group keys.
///
/// Rows with equal keys arrive next to each other, so only the group in progress is held.
#[derive(Debug)]
pub struct OrderedAggregate {
    pub aggregates: Vec<AggregateParams>,
    /// Offsets of the GROUP BY columns
    pub keys: Vec<usize>,
    pub truncate_column_count: usize,
    pub input: Box<dyn Primitive>,
}

impl OrderedAggregate {
    pub fn new(aggregates: Vec<AggregateParams>, keys: Vec<usize>, input: Box<dyn Primitive>) -> Self {
        Self {
            aggregates,
            keys,
            truncate_column_count: 0,
            input,
        }
    }

    pub fn with_truncate(mut self, count: usize) -> Self {
        self.truncate_column_count = count;
        self
    }

    fn folder(&self) -> GroupFolder {
        GroupFolder::new(self.aggregates.clone(), self.keys.clone())
    }
}

/// Aggregated columns take their alias; a distinct count is always an integer
fn convert_fields(aggregates: &[AggregateParams], mut columns: Vec<ColumnMetadata>) -> Vec<ColumnMetadata> {
    for aggregate in aggregates {
        if let Some(column) = columns.get_mut(aggregate.col) {
            if aggregate.opcode == AggregateOpcode::CountDistinct {
                column.data_type = DataType::Integer;
            }
            if !aggregate.alias.is_empty() {
                column.name = aggregate.alias.clone();
            }
        }
    }
    columns
}

/// Folding state for the group in progress
#[derive(Debug)]
struct GroupFolder {
    aggregates: Vec<AggregateParams>,
    keys: Vec<usize>,
    current: Option<Row>,
    /// Last value seen per distinct aggregate in the current group
    last_distinct: Vec<Option<Value>>,
    seen_rows: bool,
}

impl GroupFolder {
    fn new(aggregates: Vec<AggregateParams>, keys: Vec<usize>) -> Self {
        let last_distinct = vec![None; aggregates.len()];
        Self {
            aggregates,
            keys,
            current: None,
            last_distinct,
            seen_rows: false,
        }
    }

    /// Fold one input row, returning the previous group when this row starts a new one
    fn push(&mut self, row: Row) -> GateResult<Option<Row>> {
        self.seen_rows = true;
        let same_group = match &self.current {
            Some(current) => self.same_keys(current, &row)?,
            None => false,
        };
        if same_group {
            self.fold(row)?;
            return Ok(None);
        }
        let finished = self.current.take();
        self.start(row)?;
        Ok(finished)
    }

    /// The group in progress, or the identity row for a keyless aggregate over no rows
    fn finish(&mut self, width: usize) -> Option<Row> {
        if let Some(current) = self.current.take() {
            return Some(current);
        }
        if self.seen_rows || !self.keys.is_empty() {
            return None;
        }
        self.seen_rows = true;
        let width = self
            .aggregates
            .iter()
            .map(|a| a.col + 1)
            .fold(width, usize::max);
        let mut values = vec![Value::Null; width];
        for aggregate in &self.aggregates {
            if matches!(aggregate.opcode, AggregateOpcode::Count | AggregateOpcode::CountDistinct) {
                values[aggregate.col] = Value::Integer(0);
            }
        }
        Some(Row::new(values))
    }

    fn same_keys(&self, current: &Row, row: &Row) -> GateResult<bool> {
        for key in &self.keys {
            let (left, right) = column_pair(current, row, *key)?;
            if left.null_safe_compare(right)? != Ordering::Equal {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn start(&mut self, mut row: Row) -> GateResult<()> {
        for (index, aggregate) in self.aggregates.iter().enumerate() {
            let value = column(&row, aggregate.col)?.clone();
            self.last_distinct[index] = None;
            let initial = match aggregate.opcode {
                AggregateOpcode::CountDistinct if value.is_null() => Value::Integer(0),
                AggregateOpcode::CountDistinct => Value::Integer(1),
                _ => value.clone(),
            };
            if aggregate.opcode.is_distinct() && !value.is_null() {
                self.last_distinct[index] = Some(value);
            }
            row.values[aggregate.col] = initial;
        }
        self.current = Some(row);
        Ok(())
    }

    fn fold(&mut self, row: Row) -> GateResult<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        for (index, aggregate) in self.aggregates.iter().enumerate() {
            let (acc, value) = column_pair(current, &row, aggregate.col)?;
            let next = match aggregate.opcode {
                AggregateOpcode::Count | AggregateOpcode::Sum => acc.add(value)?,
                AggregateOpcode::Min => pick(acc, value, Ordering::Less)?,
                AggregateOpcode::Max => pick(acc, value, Ordering::Greater)?,
                AggregateOpcode::CountDistinct | AggregateOpcode::SumDistinct => {
                    if value.is_null() || self.last_distinct[index].as_ref() == Some(value) {
                        continue;
                    }
                    self.last_distinct[index] = Some(value.clone());
                    if aggregate.opcode == AggregateOpcode::CountDistinct {
                        acc.add(&Value::Integer(1))?
                    } else {
                        acc.add(value)?
                    }
                }
            };
            current.values[aggregate.col] = next;
        }
        Ok(())
    }
}

fn column(row: &Row, index: usize) -> GateResult<&Value> {
    row.get(index).ok_or_else(|| {
        ExecutionError::ColumnOutOfRange {
            index,
            width: row.values.len(),
        }
        .into()
    })
}

fn column_pair<'a>(left: &'a Row, right: &'a Row, index: usize) -> GateResult<(&'a Value, &'a Value)> {
    Ok((column(left, index)?, column(right, index)?))
}

/// MIN/MAX step; NULL never wins over a value
fn pick(acc: &Value, value: &Value, wanted: Ordering) -> GateResult<Value> {
    if value.is_null() {
        return Ok(acc.clone());
    }
    if acc.is_null() || value.null_safe_compare(acc)? == wanted {
        return Ok(value.clone());
    }
    Ok(acc.clone())
}

#[async_trait]
impl Primitive for OrderedAggregate {
    fn route_type(&self) -> &'static str {
        "OrderedAggregate"
    }

    fn keyspace_name(&self) -> Option<&str> {
        self.input.keyspace_name()
    }

    fn table_name(&self) -> Option<&str> {
        self.input.table_name()
    }

    fn inputs(&self) -> Vec<&dyn Primitive> {
        vec![self.input.as_ref()]
    }

    async fn execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<QueryResult> {
        // fields are needed to size the identity row even when the caller does not want them
        let input = self.input.execute(ctx, vcursor, bind_vars, true).await?;
        check_row_limit(vcursor, input.rows.len())?;

        let width = input.columns.len();
        let mut folder = self.folder();
        let mut result = QueryResult::new();
        if want_fields {
            result.columns = convert_fields(&self.aggregates, input.columns);
        }
        for row in input.rows {
            if let Some(group) = folder.push(row)? {
                result.rows.push(group);
            }
        }
        result.rows.extend(folder.finish(width));
        result.rows_affected = result.rows.len() as u64;
        Ok(result.truncate_columns(self.truncate_column_count))
    }

    fn as_streaming(&self) -> Option<&dyn StreamPrimitive> {
        self.input.as_streaming().map(|_| self as &dyn StreamPrimitive)
    }
}

#[async_trait]
impl StreamPrimitive for OrderedAggregate {
    async fn stream_execute(
        &self,
        ctx: &ExecContext,
        vcursor: &dyn Vcursor,
        bind_vars: &BindVars,
        want_fields: bool,
    ) -> GateResult<BoxedRowStream> {
        let inner = require_streaming(self.input.as_ref())?
            .stream_execute(ctx, vcursor, bind_vars, true)
            .await?;
        Ok(Box::new(AggregateStream {
            inner,
            folder: self.folder(),
            want_fields,
            width: None,
            fields: self.aggregates.clone(),
            truncate: self.truncate_column_count,
            exhausted: false,
            closed: false,
        }))
    }
}

/// Emits each group as soon as the first row of the next one arrives
struct AggregateStream {
    inner: BoxedRowStream,
    folder: GroupFolder,
    want_fields: bool,
    width: Option<usize>,
    fields: Vec<AggregateParams>,
    truncate: usize,
    exhausted: bool,
    closed: bool,
}

#[async_trait]
impl RowStream for AggregateStream {
    async fn fetch(&mut self, want_fields: bool) -> GateResult<Option<QueryResult>> {
        if self.closed {
            return Err(VcursorError::StreamClosed.into());
        }
        let mut out = QueryResult::new();
        loop {
            if self.exhausted {
                if out.rows.is_empty() && out.columns.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(out.truncate_columns(self.truncate)));
            }

            let first = self.width.is_none();
            match self.inner.fetch(first).await? {
                Some(batch) => {
                    if first {
                        self.width = Some(batch.columns.len());
                        if want_fields && self.want_fields {
                            out.columns = convert_fields(&self.fields, batch.columns);
                        }
                    }
                    for row in batch.rows {
                        if let Some(group) = self.folder.push(row)? {
                            out.rows.push(group);
                        }
                    }
                }
                None => {
                    self.exhausted = true;
                    self.inner.close().await?;
                    out.rows.extend(self.folder.finish(self.width.unwrap_or(0)));
                }
            }
            if !out.rows.is_empty() {
                return Ok(Some(out.truncate_columns(self.truncate)));
            }
        }
    }

    async fn close(&mut self) -> GateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }
}
