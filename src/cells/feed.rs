// src/cells/feed.rs

//! Incremental decoding of the JSON cells feed. Entries are handed out one at a time
//! as the parser reaches them, so neither the body nor the cell list is held whole.

use bytes::{Buf, Bytes};
use futures::StreamExt;
use reqwest::Response;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::io::{self, BufReader, Read};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use super::CellStream;
use crate::error::{Error, Result};
use crate::types::{Cell, Value};

/// Body chunks queued between the socket and the parser.
const CHUNK_BUFFER: usize = 4;

#[derive(Deserialize)]
struct Entry {
    #[serde(rename = "gs$cell")]
    cell: RawCell,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCell {
    row: Index,
    col: Index,
    #[serde(default)]
    input_value: Option<String>,
    #[serde(default)]
    numeric_value: Option<String>,
}

/// The feed encodes coordinates as strings; tolerate plain numbers too.
#[derive(Deserialize)]
#[serde(untagged)]
enum Index {
    Text(String),
    Number(u32),
}

impl Index {
    fn get(&self, what: &str) -> Result<u32> {
        match self {
            Index::Number(n) if *n > 0 => Ok(*n),
            Index::Text(s) => match s.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(Error::MalformedFeed(format!("bad {} {:?}", what, s))),
            },
            Index::Number(n) => Err(Error::MalformedFeed(format!("bad {} {}", what, n))),
        }
    }
}

impl RawCell {
    fn into_cell(self) -> Result<Cell> {
        let row = self.row.get("row")?;
        let col = self.col.get("col")?;

        let numeric = self
            .numeric_value
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.trim().parse::<f64>().ok());

        let value = match numeric {
            Some(n) => Some(Value::Number(n)),
            None => self.input_value.map(Value::Text),
        };

        Ok(Cell {
            key: (row, col),
            value,
        })
    }
}

struct Walk<F> {
    emit: F,
    cells: usize,
    stopped: bool,
    failure: Option<Error>,
}

impl<F: FnMut(Cell) -> bool> Walk<F> {
    /// Returns false once the walk must end.
    fn accept(&mut self, raw: RawCell) -> bool {
        match raw.into_cell() {
            Ok(cell) => {
                self.cells += 1;
                trace!(row = cell.row(), col = cell.col(), "feed entry");
                self.stopped = !(self.emit)(cell);
            }
            Err(e) => self.failure = Some(e),
        }
        !self.stopped && self.failure.is_none()
    }
}

fn halt<E: de::Error>() -> E {
    E::custom("feed walk halted")
}

/// The document root; only its `feed` member is read.
struct DocumentSeed<'a, F>(&'a mut Walk<F>);

impl<'de, F: FnMut(Cell) -> bool> DeserializeSeed<'de> for DocumentSeed<'_, F> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<(), D::Error> {
        d.deserialize_map(self)
    }
}

impl<'de, F: FnMut(Cell) -> bool> Visitor<'de> for DocumentSeed<'_, F> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a cells feed document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let walk = self.0;
        let mut seen = false;
        while let Some(key) = map.next_key::<String>()? {
            if key == "feed" {
                map.next_value_seed(FeedSeed(&mut *walk))?;
                seen = true;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        if !seen {
            return Err(de::Error::missing_field("feed"));
        }
        Ok(())
    }
}

/// The `feed` object. An empty worksheet has no `entry` key at all.
struct FeedSeed<'a, F>(&'a mut Walk<F>);

impl<'de, F: FnMut(Cell) -> bool> DeserializeSeed<'de> for FeedSeed<'_, F> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<(), D::Error> {
        d.deserialize_map(self)
    }
}

impl<'de, F: FnMut(Cell) -> bool> Visitor<'de> for FeedSeed<'_, F> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a feed object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let walk = self.0;
        while let Some(key) = map.next_key::<String>()? {
            if key == "entry" {
                map.next_value_seed(EntriesSeed(&mut *walk))?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

struct EntriesSeed<'a, F>(&'a mut Walk<F>);

impl<'de, F: FnMut(Cell) -> bool> DeserializeSeed<'de> for EntriesSeed<'_, F> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, d: D) -> std::result::Result<(), D::Error> {
        d.deserialize_seq(self)
    }
}

impl<'de, F: FnMut(Cell) -> bool> Visitor<'de> for EntriesSeed<'_, F> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of feed entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        while let Some(entry) = seq.next_element::<Entry>()? {
            if !self.0.accept(entry.cell) {
                return Err(halt());
            }
        }
        Ok(())
    }
}

/// Walk a JSON cells feed read from `reader`, handing each cell to `emit` in server
/// order as soon as its entry is decoded. `emit` returns false to stop early, which
/// is not an error. Returns how many cells were decoded.
pub fn parse_feed<R, F>(reader: R, emit: F) -> Result<usize>
where
    R: Read,
    F: FnMut(Cell) -> bool,
{
    let mut walk = Walk {
        emit,
        cells: 0,
        stopped: false,
        failure: None,
    };
    let mut de = serde_json::Deserializer::from_reader(reader);
    let outcome = DocumentSeed(&mut walk)
        .deserialize(&mut de)
        .and_then(|()| de.end());

    if let Some(e) = walk.failure.take() {
        return Err(e);
    }
    match outcome {
        Ok(()) => Ok(walk.cells),
        Err(_) if walk.stopped => Ok(walk.cells),
        Err(e) => Err(e.into()),
    }
}

/// Blocking `Read` over body chunks arriving on a channel. A transport error is kept
/// so it can be reported as such rather than as a parse failure.
struct ChunkReader {
    chunks: mpsc::Receiver<reqwest::Result<Bytes>>,
    current: Bytes,
    failure: Option<reqwest::Error>,
}

impl ChunkReader {
    fn new(chunks: mpsc::Receiver<reqwest::Result<Bytes>>) -> Self {
        Self {
            chunks,
            current: Bytes::new(),
            failure: None,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.current.has_remaining() {
            match self.chunks.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => {
                    let err = io::Error::new(io::ErrorKind::Other, e.to_string());
                    self.failure = Some(e);
                    return Err(err);
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.remaining());
        self.current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

/// Decode a feed response while it downloads.
///
/// A task pumps body chunks off the connection into a short queue; a blocking thread
/// parses them and hands cells back through a channel of `buffer` slots. A slow
/// consumer therefore pauses the parser, which in turn stops draining the connection.
/// Dropping the stream stops both.
pub(crate) fn stream_feed(resp: Response, buffer: usize) -> CellStream {
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
    let (cell_tx, cell_rx) = mpsc::channel(buffer);

    tokio::spawn(async move {
        let body = resp.bytes_stream();
        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let failed = chunk.is_err();
            if chunk_tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });

    tokio::task::spawn_blocking(move || {
        let mut body = ChunkReader::new(chunk_rx);
        let walked = parse_feed(BufReader::new(&mut body), |cell| {
            cell_tx.blocking_send(Ok(cell)).is_ok()
        });
        match walked {
            Ok(cells) => debug!(cells, "read cells"),
            Err(e) => {
                let e = body.failure.take().map(Error::from).unwrap_or(e);
                let _ = cell_tx.blocking_send(Err(e));
            }
        }
    });

    ReceiverStream::new(cell_rx).boxed()
}
