// src/rows.rs

use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use tracing::trace;

use crate::cells::{CellChannel, CellQuery, CellStream, CellWriter};
use crate::error::Result;
use crate::types::{Cell, Row};

pub type RowStream = BoxStream<'static, Result<Row>>;

/// Row range of a row or record read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RowQuery {
    pub min_row: Option<u32>,
    pub max_row: Option<u32>,
}

impl RowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_row(mut self, row: u32) -> Self {
        self.min_row = Some(row);
        self
    }

    pub fn max_row(mut self, row: u32) -> Self {
        self.max_row = Some(row);
        self
    }
}

impl From<RowQuery> for CellQuery {
    fn from(q: RowQuery) -> Self {
        CellQuery {
            min_row: q.min_row,
            max_row: q.max_row,
            ..CellQuery::default()
        }
    }
}

/// Folds a row-major cell sequence into rows. A row is released as soon as a cell
/// with another row key shows up, and the last one on `finish`. Relies on cells of
/// one row being contiguous; it never sorts.
#[derive(Debug, Default)]
pub struct RowGrouper {
    current: Option<Row>,
}

impl RowGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one cell; returns the previous row if this cell starts a new one.
    pub fn push(&mut self, cell: Cell) -> Option<Row> {
        let (row, col) = cell.key;
        let boundary = self.current.as_ref().is_some_and(|r| r.key != row);
        let flushed = if boundary { self.current.take() } else { None };
        self.current
            .get_or_insert_with(|| Row::new(row))
            .value
            .insert(col, cell.value);
        flushed
    }

    pub fn finish(&mut self) -> Option<Row> {
        self.current.take()
    }
}

struct Grouping {
    cells: CellStream,
    grouper: RowGrouper,
    done: bool,
}

#[derive(Clone)]
pub struct RowChannel {
    cells: CellChannel,
}

impl RowChannel {
    pub(crate) fn new(cells: CellChannel) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &CellChannel {
        &self.cells
    }

    /// Read rows in server order. The first error ends the stream.
    pub fn read(&self, query: RowQuery) -> RowStream {
        let state = Grouping {
            cells: self.cells.read(query.into()),
            grouper: RowGrouper::new(),
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match state.cells.next().await {
                    Some(Ok(cell)) => {
                        if let Some(row) = state.grouper.push(cell) {
                            trace!(row = row.key, cols = row.value.len(), "row");
                            return Some((Ok(row), state));
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        state.done = true;
                        return state.grouper.finish().map(|row| (Ok(row), state));
                    }
                }
            }
        })
        .boxed()
    }

    pub fn write(&self) -> RowWriter {
        RowWriter {
            cells: self.cells.write(),
        }
    }
}

/// Write side of the row channel; every column of a row becomes one cell.
pub struct RowWriter {
    cells: CellWriter,
}

impl RowWriter {
    pub async fn send(&mut self, row: Row) -> Result<()> {
        let key = row.key;
        for (col, value) in row.value {
            self.cells
                .send(Cell {
                    key: (key, col),
                    value,
                })
                .await?;
        }
        Ok(())
    }

    pub async fn finish(self) -> Result<()> {
        self.cells.finish().await
    }

    pub fn abort(&mut self) {
        self.cells.abort();
    }
}
