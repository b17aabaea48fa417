// src/records.rs

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::rows::{RowChannel, RowQuery, RowWriter};
use crate::types::{Record, Row};

pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Row 1 is the header; records start below it.
const FIRST_RECORD_ROW: u32 = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    pub name: String,
    pub col: u32,
}

/// Column-to-field-name mapping, in column order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    /// Every non-empty cell of `row` names the field stored in its column.
    pub fn from_row(row: &Row) -> Self {
        let fields = row
            .value
            .iter()
            .filter_map(|(col, value)| {
                value.as_ref().map(|v| HeaderField {
                    name: v.to_string(),
                    col: *col,
                })
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Name the row's values. Fields whose column the row lacks are left out, and
    /// columns outside the header are dropped.
    pub fn project(&self, row: &Row) -> Record {
        let mut record = Record::new(row.key);
        for field in &self.fields {
            if let Some(value) = row.value.get(&field.col) {
                record.value.insert(field.name.clone(), value.clone());
            }
        }
        record
    }

    /// One column per header field; fields missing from the record become `None`,
    /// which clears the cell when written.
    pub fn unproject(&self, record: &Record) -> Row {
        let mut row = Row::new(record.key);
        for field in &self.fields {
            let value = record.value.get(&field.name).cloned().flatten();
            row.value.insert(field.col, value);
        }
        row
    }
}

/// Record view of a worksheet.
///
/// The header is read from row 1 the first time it is needed and then kept for the
/// life of this channel and its clones. A missing header is not remembered: the next
/// caller reads row 1 again. Callers sharing one channel are expected to use it
/// sequentially; the cache itself is an async once-cell so concurrent first reads
/// wait for a single derivation.
#[derive(Clone)]
pub struct RecordChannel {
    rows: RowChannel,
    header: Arc<OnceCell<Header>>,
}

impl RecordChannel {
    pub(crate) fn new(rows: RowChannel) -> Self {
        Self {
            rows,
            header: Arc::new(OnceCell::new()),
        }
    }

    pub fn rows(&self) -> &RowChannel {
        &self.rows
    }

    /// The cached header, if one has been read.
    pub fn cached_header(&self) -> Option<&Header> {
        self.header.get()
    }

    pub async fn header(&self) -> Result<&Header> {
        self.header
            .get_or_try_init(|| derive_header(&self.rows))
            .await
    }

    /// Read records from row 2 on; a lower `min_row` is raised to 2. The header is
    /// looked up when the first row arrives, and the first error ends the stream
    /// without pulling another row.
    pub fn read(&self, query: RowQuery) -> RecordStream {
        let min_row = query.min_row.unwrap_or(0).max(FIRST_RECORD_ROW);
        let rows = self.rows.read(RowQuery {
            min_row: Some(min_row),
            ..query
        });

        stream::unfold(
            (rows, self.clone(), false),
            |(mut rows, channel, failed)| async move {
                if failed {
                    return None;
                }
                let item = match rows.next().await? {
                    Ok(row) => channel.header().await.map(|header| header.project(&row)),
                    Err(e) => Err(e),
                };
                let failed = item.is_err();
                Some((item, (rows, channel, failed)))
            },
        )
        .boxed()
    }

    pub fn write(&self) -> RecordWriter {
        RecordWriter {
            rows: self.rows.write(),
            records: self.clone(),
        }
    }
}

#[instrument(level = "debug", skip(rows))]
async fn derive_header(rows: &RowChannel) -> Result<Header> {
    let mut first = rows.read(RowQuery::new().min_row(1).max_row(1));
    let row = first.try_next().await?.ok_or(Error::HeaderMissing)?;
    let header = Header::from_row(&row);
    if header.is_empty() {
        return Err(Error::HeaderMissing);
    }
    debug!(fields = header.fields.len(), "header derived");
    Ok(header)
}

/// Write side of the record channel.
pub struct RecordWriter {
    rows: RowWriter,
    records: RecordChannel,
}

impl RecordWriter {
    /// Write one record through the header. If no header can be found the whole
    /// batch is aborted and nothing reaches the store.
    pub async fn send(&mut self, record: Record) -> Result<()> {
        let row = match self.records.header().await {
            Ok(header) => header.unproject(&record),
            Err(e) => {
                self.rows.abort();
                return Err(e);
            }
        };
        self.rows.send(row).await
    }

    pub async fn finish(self) -> Result<()> {
        self.rows.finish().await
    }

    pub fn abort(&mut self) {
        self.rows.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn header() -> Header {
        Header::from_row(&Row::new(1).with(1, "name").with(2, "twitter"))
    }

    #[test]
    fn test_header_from_row_keeps_columns() {
        let header = Header::from_row(&Row::new(1).with(2, "b").with(5, 3.0));
        assert_eq!(
            header.fields(),
            &[
                HeaderField {
                    name: "b".into(),
                    col: 2
                },
                HeaderField {
                    name: "3".into(),
                    col: 5
                },
            ]
        );
    }

    #[test]
    fn test_project_drops_and_omits() {
        let row = Row::new(7).with(1, "Jed").with(9, "stray");
        let record = header().project(&row);
        assert_eq!(record, Record::new(7).with("name", "Jed"));
    }

    #[test]
    fn test_unproject_emits_every_header_column() {
        let record = Record::new(3).with("twitter", "@jed").with("extra", 1.0);
        let row = header().unproject(&record);
        assert_eq!(row.key, 3);
        assert_eq!(row.value.len(), 2);
        assert_eq!(row.value[&1], None);
        assert_eq!(row.value[&2], Some(Value::from("@jed")));
    }
}
