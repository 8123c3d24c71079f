//! Ordered merge over several paginated update-log tables.
//!
//! Each table is read in ascending log-id order, one page at a time. The
//! head row of every table with remaining rows sits in a min-heap; each
//! call to [`MultiQueryCursor::next`] pops the smallest id, so the
//! merged stream is globally ordered by log id. Log ids come from a single
//! generator shared by all tables, so two heads with the same id, or a
//! table whose ids do not strictly increase, mean corrupted id generation
//! and raise [`SourceError::OrderingViolation`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use tracing::debug;

use dbsync_storage::Transaction;
use dbsync_types::Row;

use crate::error::SourceError;

/// One paginated, ascending query over a log table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorQuery {
    pub table: String,
    pub order_column: String,
}

impl CursorQuery {
    pub fn new(table: impl Into<String>, order_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            order_column: order_column.into(),
        }
    }
}

#[derive(Debug)]
struct SourceState {
    query: CursorQuery,
    /// Rows not yet handed out, fetched or not
    remaining: u64,
    /// Offset of the next page to fetch
    offset: u64,
    page: VecDeque<Row>,
    last_id: Option<i64>,
}

impl SourceState {
    fn row_id(&self, row: &Row) -> Result<i64, SourceError> {
        row.get(&self.query.order_column)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| SourceError::InvalidRow {
                table: self.query.table.clone(),
                message: format!("missing or non-integer {}", self.query.order_column),
            })
    }
}

/// Merges N ascending log-table queries into one ordered stream.
#[derive(Debug)]
pub struct MultiQueryCursor {
    sources: Vec<SourceState>,
    heads: BinaryHeap<Reverse<(i64, usize)>>,
    page_size: usize,
    started: bool,
    /// Source whose head must be refilled before the next selection
    refill: Option<usize>,
    current: Option<(usize, Row)>,
}

impl MultiQueryCursor {
    /// Build a cursor from queries paired with their remaining row counts.
    pub fn new(queries: Vec<(CursorQuery, u64)>, page_size: usize) -> Self {
        let sources = queries
            .into_iter()
            .map(|(query, remaining)| SourceState {
                query,
                remaining,
                offset: 0,
                page: VecDeque::new(),
                last_id: None,
            })
            .collect();
        Self {
            sources,
            heads: BinaryHeap::new(),
            page_size: page_size.max(1),
            started: false,
            refill: None,
            current: None,
        }
    }

    /// Count the rows of every queried table and build a cursor over them.
    pub async fn open(
        tx: &mut dyn Transaction,
        queries: Vec<CursorQuery>,
        page_size: usize,
    ) -> Result<Self, SourceError> {
        let mut counted = Vec::with_capacity(queries.len());
        for query in queries {
            let count = tx.count_rows(&query.table).await?;
            debug!(table = %query.table, rows = count, "Counted log rows");
            counted.push((query, count));
        }
        Ok(Self::new(counted, page_size))
    }

    /// Advance to the next row in merged order. Returns false once every
    /// source is exhausted.
    pub async fn next(&mut self, tx: &mut dyn Transaction) -> Result<bool, SourceError> {
        if !self.started {
            self.started = true;
            for idx in 0..self.sources.len() {
                self.push_head(tx, idx).await?;
            }
        } else if let Some(idx) = self.refill.take() {
            self.push_head(tx, idx).await?;
        }

        let Some(Reverse((id, idx))) = self.heads.pop() else {
            self.current = None;
            return Ok(false);
        };
        if let Some(Reverse((other_id, other_idx))) = self.heads.peek() {
            if *other_id == id {
                return Err(SourceError::OrderingViolation(format!(
                    "log id {} present in both {} and {}",
                    id, self.sources[idx].query.table, self.sources[*other_idx].query.table
                )));
            }
        }

        let source = &mut self.sources[idx];
        let row = source.page.pop_front().ok_or_else(|| {
            SourceError::IllegalState(format!("no buffered row for {}", source.query.table))
        })?;
        source.remaining = source.remaining.saturating_sub(1);
        source.last_id = Some(id);
        self.refill = Some(idx);
        self.current = Some((idx, row));
        Ok(true)
    }

    /// Ensure the source's next row is buffered and offer it as a candidate.
    async fn push_head(&mut self, tx: &mut dyn Transaction, idx: usize) -> Result<(), SourceError> {
        let page_size = self.page_size;
        let source = &mut self.sources[idx];
        if source.remaining == 0 {
            source.page.clear();
            return Ok(());
        }

        if source.page.is_empty() {
            let limit = page_size.min(source.remaining as usize);
            let rows = tx
                .fetch_page(
                    &source.query.table,
                    &source.query.order_column,
                    source.offset,
                    limit,
                )
                .await?;
            debug!(
                table = %source.query.table,
                offset = source.offset,
                fetched = rows.len(),
                "Fetched log page"
            );
            if rows.is_empty() {
                // Rows counted at open time vanished
                source.remaining = 0;
                return Ok(());
            }
            source.offset += rows.len() as u64;
            source.page.extend(rows);
        }

        let Some(head) = source.page.front() else {
            return Ok(());
        };
        let id = source.row_id(head)?;
        if let Some(last) = source.last_id {
            if id <= last {
                return Err(SourceError::OrderingViolation(format!(
                    "log id {} in {} does not follow {}",
                    id, source.query.table, last
                )));
            }
        }
        self.heads.push(Reverse((id, idx)));
        Ok(())
    }

    /// The row selected by the last successful [`MultiQueryCursor::next`].
    pub fn current(&self) -> Result<&Row, SourceError> {
        self.current
            .as_ref()
            .map(|(_, row)| row)
            .ok_or_else(|| SourceError::IllegalState("cursor is not positioned on a row".into()))
    }

    /// Table of the current row.
    pub fn current_table(&self) -> Result<&str, SourceError> {
        self.current_source()
            .map(|idx| self.sources[idx].query.table.as_str())
    }

    /// Index, in query order, of the current row's source.
    pub fn current_source(&self) -> Result<usize, SourceError> {
        self.current
            .as_ref()
            .map(|(idx, _)| *idx)
            .ok_or_else(|| SourceError::IllegalState("cursor is not positioned on a row".into()))
    }

    /// Shift the next page offset of `table` by `delta`. Call with a
    /// negative delta after deleting rows of `table` that were already
    /// handed out, so later pages start at the right row.
    pub fn adjust_position(&mut self, table: &str, delta: i64) -> Result<(), SourceError> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.query.table == table)
            .ok_or_else(|| SourceError::IllegalState(format!("unknown cursor table {}", table)))?;
        source.offset = source.offset.saturating_add_signed(delta);
        debug!(table, delta, offset = source.offset, "Adjusted cursor position");
        Ok(())
    }
}
