//! Streaming access to a cells-feed spreadsheet as cells, rows or header-keyed records.

pub mod cells;
pub mod config;
pub mod error;
pub mod records;
pub mod rows;
pub mod token;
pub mod types;
pub mod worksheet;

pub use cells::{CellChannel, CellQuery, CellStream, CellWriter};
pub use config::WorksheetConfig;
pub use error::{Error, Result};
pub use records::{Header, HeaderField, RecordChannel, RecordStream, RecordWriter};
pub use rows::{RowChannel, RowGrouper, RowQuery, RowStream, RowWriter};
pub use token::{StaticToken, Token, TokenProvider};
pub use types::{Cell, Record, Row, Value};
pub use worksheet::Worksheet;
