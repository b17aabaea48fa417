// src/worksheet.rs

use hyper::ext::ReasonPhrase;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::{
    cells::CellChannel,
    config::WorksheetConfig,
    error::{Error, Result},
    records::RecordChannel,
    rows::RowChannel,
    token::TokenProvider,
};

/// Handle on one worksheet. Cheap to clone; every view shares the same client,
/// config and token provider.
#[derive(Clone)]
pub struct Worksheet {
    inner: Arc<Transport>,
}

impl Worksheet {
    pub fn new(config: WorksheetConfig, token: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_client(Client::new(), config, token)
    }

    pub fn with_client(
        client: Client,
        config: WorksheetConfig,
        token: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Transport {
                client,
                config,
                token,
            }),
        })
    }

    pub fn config(&self) -> &WorksheetConfig {
        &self.inner.config
    }

    pub fn cells(&self) -> CellChannel {
        CellChannel::new(self.inner.clone())
    }

    pub fn rows(&self) -> RowChannel {
        RowChannel::new(self.cells())
    }

    /// A record view with its own header cache. Keep the returned channel around to
    /// avoid re-reading the header.
    pub fn records(&self) -> RecordChannel {
        RecordChannel::new(self.rows())
    }
}

/// Shared request plumbing beneath the cell channel.
pub(crate) struct Transport {
    pub(crate) client: Client,
    pub(crate) config: WorksheetConfig,
    token: Arc<dyn TokenProvider>,
}

impl Transport {
    /// Fetch a token and start a request carrying the feed headers.
    pub(crate) async fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self
            .token
            .get()
            .await
            .map_err(Error::Auth)?;
        debug!(%method, %url, "authorized request");
        Ok(self
            .client
            .request(method, url)
            .header("GData-Version", "3.0")
            .header("If-Match", "*")
            .header("Authorization", token.authorization()))
    }
}

/// Reject any status of 300 or above.
pub(crate) fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.as_u16() >= 300 {
        let phrase = resp.extensions().get::<ReasonPhrase>();
        let reason = status_reason(status, phrase.map(ReasonPhrase::as_bytes));
        warn!(url = %resp.url(), status = status.as_u16(), %reason, "request rejected");
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            reason,
        });
    }
    Ok(resp)
}

/// The phrase the server sent wins; hyper only records it when it differs from the
/// standard one, so fall back to that, then to nothing.
fn status_reason(status: StatusCode, phrase: Option<&[u8]>) -> String {
    match phrase {
        Some(bytes) => String::from_utf8_lossy(bytes).trim().to_string(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}
