use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use crate::utils::error::{ExecutionError, GateError, GateResult};
use crate::utils::types::Row;

/// One ORDER BY key, as a column offset into the row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByParams {
    pub col: usize,
    pub desc: bool,
}

impl OrderByParams {
    pub fn asc(col: usize) -> Self {
        Self { col, desc: false }
    }

    pub fn desc(col: usize) -> Self {
        Self { col, desc: true }
    }
}

/// Row ordering over a list of keys.
///
/// Sort routines need a total order and cannot return errors, so the first comparison failure
/// is parked here and every later comparison reports `Equal`. Callers must check `finish` once
/// they are done sorting.
#[derive(Debug)]
pub struct RowComparator {
    params: Vec<OrderByParams>,
    error: Mutex<Option<GateError>>,
}

impl RowComparator {
    pub fn new(params: Vec<OrderByParams>) -> Self {
        Self {
            params,
            error: Mutex::new(None),
        }
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        if self.failed() {
            return Ordering::Equal;
        }
        for param in &self.params {
            let (left, right) = match (a.get(param.col), b.get(param.col)) {
                (Some(left), Some(right)) => (left, right),
                _ => {
                    let width = a.values.len().min(b.values.len());
                    self.record(ExecutionError::ColumnOutOfRange { index: param.col, width }.into());
                    return Ordering::Equal;
                }
            };
            match left.null_safe_compare(right) {
                Ok(Ordering::Equal) => continue,
                Ok(order) if param.desc => return order.reverse(),
                Ok(order) => return order,
                Err(err) => {
                    self.record(err);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    }

    /// Sort rows in place, surfacing any comparison failure
    pub fn sort(&self, rows: &mut [Row]) -> GateResult<()> {
        rows.sort_by(|a, b| self.compare(a, b));
        self.finish()
    }

    /// Take the parked comparison error, if any
    pub fn finish(&self) -> GateResult<()> {
        let mut slot = self.error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn failed(&self) -> bool {
        self.error
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    fn record(&self, err: GateError) {
        let mut slot = self.error.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }
}

/// A row tagged with where it came from, ordered by a shared comparator
#[derive(Debug)]
pub(crate) struct SortedRow {
    pub row: Row,
    pub source: usize,
    comparator: Arc<RowComparator>,
}

impl SortedRow {
    pub fn new(row: Row, source: usize, comparator: &Arc<RowComparator>) -> Self {
        Self {
            row,
            source,
            comparator: Arc::clone(comparator),
        }
    }
}

impl PartialEq for SortedRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortedRow {}

impl PartialOrd for SortedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&self.row, &other.row)
            // ties keep source order so merges are stable
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Keep only the `k` smallest rows seen, in a max-heap bounded to `k` entries
#[derive(Debug)]
pub(crate) struct TopK {
    heap: BinaryHeap<SortedRow>,
    limit: Option<usize>,
    comparator: Arc<RowComparator>,
    seen: usize,
}

impl TopK {
    pub fn new(comparator: Arc<RowComparator>, limit: Option<usize>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            limit,
            comparator,
            seen: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn push(&mut self, row: Row) {
        let entry = SortedRow::new(row, self.seen, &self.comparator);
        self.seen += 1;
        match self.limit {
            Some(0) => {}
            Some(limit) if self.heap.len() >= limit => {
                if let Some(mut largest) = self.heap.peek_mut() {
                    if entry < *largest {
                        *largest = entry;
                    }
                }
            }
            _ => self.heap.push(entry),
        }
    }

    /// Retained rows in ascending order
    pub fn into_sorted(self) -> GateResult<Vec<Row>> {
        let rows = self.heap.into_sorted_vec().into_iter().map(|entry| entry.row).collect();
        self.comparator.finish()?;
        Ok(rows)
    }
}
