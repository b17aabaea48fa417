// src/cells/mod.rs

//! The leaf channel: individually addressed cells against the remote feed.

pub mod batch;
pub mod feed;

use futures::{
    future,
    stream::{self, BoxStream},
    Stream, StreamExt, TryStreamExt,
};
use reqwest::{Body, Method, Response};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, trace};

use crate::error::{Error, Result};
use crate::types::Cell;
use crate::worksheet::{check_status, Transport};
use batch::BatchBody;

pub type CellStream = BoxStream<'static, Result<Cell>>;

/// Range and emptiness options of a cell read. Each field maps to exactly one feed
/// query parameter; unset, zero and `false` fields are left off the query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellQuery {
    pub min_row: Option<u32>,
    pub max_row: Option<u32>,
    pub min_col: Option<u32>,
    pub max_col: Option<u32>,
    pub return_empty: bool,
}

impl CellQuery {
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

    pub fn min_col(mut self, col: u32) -> Self {
        self.min_col = Some(col);
        self
    }

    pub fn max_col(mut self, col: u32) -> Self {
        self.max_col = Some(col);
        self
    }

    pub fn return_empty(mut self, yes: bool) -> Self {
        self.return_empty = yes;
        self
    }

    /// Query parameters, `alt=json` first.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("alt", "json".to_string())];
        let bounds = [
            ("min-row", self.min_row),
            ("max-row", self.max_row),
            ("min-col", self.min_col),
            ("max-col", self.max_col),
        ];
        for (name, bound) in bounds {
            if let Some(n) = bound.filter(|n| *n > 0) {
                params.push((name, n.to_string()));
            }
        }
        if self.return_empty {
            params.push(("return-empty", "true".to_string()));
        }
        params
    }
}

#[derive(Clone)]
pub struct CellChannel {
    transport: Arc<Transport>,
}

impl CellChannel {
    pub(crate) fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Lazily read cells in server order. Nothing happens until the stream is polled;
    /// then a token is fetched and a single GET is issued. Cells are yielded as the
    /// response body is decoded.
    pub fn read(&self, query: CellQuery) -> CellStream {
        let transport = self.transport.clone();
        let buffer = transport.config.read_buffer;
        stream::once(async move { open_feed(&transport, query).await })
            .map_ok(move |resp| feed::stream_feed(resp, buffer))
            .try_flatten()
            .boxed()
    }

    /// Open a batch writer. The token fetch starts right away; cells sent to the
    /// writer are streamed into one POST that completes on `finish`.
    pub fn write(&self) -> CellWriter {
        let (tx, rx) = mpsc::channel(self.transport.config.write_buffer);
        let (abort_tx, abort_rx) = oneshot::channel();
        let task = tokio::spawn(post_batch(self.transport.clone(), rx, abort_rx));
        CellWriter {
            tx: Some(tx),
            abort: Some(abort_tx),
            task: Some(task),
        }
    }

    /// Blank every non-empty cell of the worksheet in one batch. Returns how many
    /// cells were cleared.
    pub async fn clear(&self) -> Result<usize> {
        let mut cells = self.read(CellQuery::new());
        let mut writer = self.write();
        let mut cleared = 0;
        while let Some(cell) = cells.next().await {
            let cell = match cell {
                Ok(cell) => cell,
                Err(e) => {
                    writer.abort();
                    return Err(e);
                }
            };
            writer.send(Cell::empty(cell.row(), cell.col())).await?;
            cleared += 1;
        }
        writer.finish().await?;
        debug!(cleared, "cleared worksheet");
        Ok(cleared)
    }
}

#[instrument(level = "debug", skip(transport))]
async fn open_feed(transport: &Transport, query: CellQuery) -> Result<Response> {
    let url = transport.config.feed_url()?;
    let resp = transport
        .authorized(Method::GET, url)
        .await?
        .query(&query.params())
        .send()
        .await?;
    check_status(resp)
}

/// Resolves once an abort has been signalled. A sender dropped without signalling
/// means the batch closes normally, so that never resolves.
async fn abort_requested(signal: &mut Option<oneshot::Receiver<()>>) {
    if let Some(rx) = signal.as_mut() {
        let requested = rx.await.is_ok();
        *signal = None;
        if requested {
            return;
        }
    }
    future::pending::<()>().await
}

/// Ends `body` with an error as soon as an abort is signalled, even while buffered
/// entries are still pending. The connection then drops mid-body and the batch is
/// never closed, so the store has nothing to apply.
fn abortable(
    body: BoxStream<'static, Result<String>>,
    signal: oneshot::Receiver<()>,
) -> impl Stream<Item = Result<String>> {
    stream::unfold((body, Some(signal)), |(mut body, mut signal)| async move {
        tokio::select! {
            biased;
            _ = abort_requested(&mut signal) => {
                debug!("batch aborted");
                Some((Err(Error::Aborted), (stream::empty().boxed(), None)))
            }
            item = body.next() => item.map(|item| (item, (body, signal))),
        }
    })
}

#[instrument(level = "debug", skip(transport, rx, abort))]
async fn post_batch(
    transport: Arc<Transport>,
    rx: mpsc::Receiver<Cell>,
    abort: oneshot::Receiver<()>,
) -> Result<()> {
    let url = transport.config.batch_url()?;
    let request = transport.authorized(Method::POST, url).await?;

    let batch = BatchBody::new(&transport.config);
    let open = batch.open()?;
    let close = batch.close()?;
    let sent = Arc::new(AtomicUsize::new(0));

    let entries = {
        let sent = sent.clone();
        ReceiverStream::new(rx).map(move |cell| {
            sent.fetch_add(1, Ordering::Relaxed);
            trace!(row = cell.row(), col = cell.col(), "batch entry");
            batch.entry(&cell)
        })
    };
    let body = stream::once(future::ready(Ok(open)))
        .chain(entries)
        .chain(stream::once(future::ready(Ok(close))))
        .boxed();

    let resp = request
        .header("Content-Type", "application/atom+xml")
        .body(Body::wrap_stream(abortable(body, abort)))
        .send()
        .await?;
    check_status(resp)?;

    info!(cells = sent.load(Ordering::Relaxed), "batch posted");
    Ok(())
}

/// Write side of the cell channel. Send cells, then `finish` to close the batch and
/// learn whether the store accepted it. Dropping the writer closes the batch too,
/// but the outcome is lost.
pub struct CellWriter {
    tx: Option<mpsc::Sender<Cell>>,
    abort: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl CellWriter {
    /// Queue one cell. Waits while the buffer is full. If the request has already
    /// ended, returns the error that ended it.
    pub async fn send(&mut self, cell: Cell) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::WriterClosed)?;
        if tx.send(cell).await.is_ok() {
            return Ok(());
        }
        self.tx = None;
        match self.join().await {
            Err(e) => Err(e),
            Ok(()) => Err(Error::WriterClosed),
        }
    }

    /// Forward every cell of a stream, stopping at the first error.
    pub async fn send_all<S>(&mut self, cells: S) -> Result<()>
    where
        S: Stream<Item = Result<Cell>>,
    {
        futures::pin_mut!(cells);
        while let Some(cell) = cells.next().await {
            self.send(cell?).await?;
        }
        Ok(())
    }

    /// Close the batch and wait for the store's answer.
    pub async fn finish(mut self) -> Result<()> {
        self.tx = None;
        self.abort = None;
        self.join().await
    }

    /// Cancel the batch without closing it. Entries already on the wire are cut off
    /// before the closing tag, so the store applies none of them. Later calls on the
    /// writer fail with `WriterClosed`.
    pub fn abort(&mut self) {
        // signal before dropping the sender, or the body would close normally
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Err(Error::WriterClosed),
        }
    }
}
