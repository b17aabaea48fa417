#![allow(dead_code)]

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;
use sheetstream::{StaticToken, Token, Worksheet, WorksheetConfig};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, Respond, ResponseTemplate,
};

pub const SPREADSHEET: &str = "sheet-under-test";
pub const FEED_PATH: &str = "/feeds/cells/sheet-under-test/od6/private/full";
pub const BATCH_PATH: &str = "/feeds/cells/sheet-under-test/od6/private/full/batch";
pub const ACCESS_TOKEN: &str = "test-token";

pub fn init_logging() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// In-memory worksheet speaking just enough of the cells feed protocol: a JSON GET
/// honoring the row/col bounds and an Atom batch POST of cell updates.
#[derive(Clone, Default)]
pub struct FakeSheet {
    cells: Arc<Mutex<BTreeMap<(u32, u32), String>>>,
}

impl FakeSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, cells: &[((u32, u32), &str)]) {
        let mut guard = self.cells.lock().unwrap();
        for (key, value) in cells {
            guard.insert(*key, value.to_string());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<(u32, u32), String> {
        self.cells.lock().unwrap().clone()
    }

    fn feed(&self, url: &Url) -> serde_json::Value {
        let bound = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<u32>().ok())
        };
        let (min_row, max_row) = (bound("min-row"), bound("max-row"));
        let (min_col, max_col) = (bound("min-col"), bound("max-col"));

        let entries: Vec<_> = self
            .cells
            .lock()
            .unwrap()
            .iter()
            .filter(|((row, col), _)| {
                min_row.map_or(true, |m| *row >= m)
                    && max_row.map_or(true, |m| *row <= m)
                    && min_col.map_or(true, |m| *col >= m)
                    && max_col.map_or(true, |m| *col <= m)
            })
            .map(|((row, col), value)| {
                let mut cell = json!({
                    "row": row.to_string(),
                    "col": col.to_string(),
                    "inputValue": value,
                    "$t": value,
                });
                if value.parse::<f64>().is_ok() {
                    cell["numericValue"] = json!(value);
                }
                json!({ "gs$cell": cell })
            })
            .collect();

        if entries.is_empty() {
            json!({ "feed": { "id": { "$t": FEED_PATH } } })
        } else {
            json!({ "feed": { "entry": entries } })
        }
    }

    fn apply_batch(&self, body: &[u8]) -> Result<usize, String> {
        let text = std::str::from_utf8(body).map_err(|e| e.to_string())?;
        let mut reader = Reader::from_str(text);
        let mut updates = Vec::new();
        let mut closed = false;

        loop {
            match reader.read_event().map_err(|e| e.to_string())? {
                Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"gs:cell" => {
                    let (mut row, mut col, mut input) = (None, None, None);
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| e.to_string())?;
                        let value = attr.unescape_value().map_err(|e| e.to_string())?;
                        match attr.key.as_ref() {
                            b"row" => row = value.parse::<u32>().ok(),
                            b"col" => col = value.parse::<u32>().ok(),
                            b"inputValue" => input = Some(value.into_owned()),
                            _ => {}
                        }
                    }
                    match (row, col, input) {
                        (Some(r), Some(c), Some(v)) => updates.push(((r, c), v)),
                        _ => return Err("incomplete gs:cell".into()),
                    }
                }
                Event::End(e) if e.name().as_ref() == b"feed" => closed = true,
                Event::Eof => break,
                _ => {}
            }
        }
        if !closed {
            return Err("batch feed never closed".into());
        }

        let count = updates.len();
        let mut guard = self.cells.lock().unwrap();
        for (key, value) in updates {
            if value.is_empty() {
                guard.remove(&key);
            } else {
                guard.insert(key, value);
            }
        }
        Ok(count)
    }
}

impl Respond for FakeSheet {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match request.method.as_str() {
            "GET" => ResponseTemplate::new(200).set_body_json(self.feed(&request.url)),
            "POST" => match self.apply_batch(&request.body) {
                Ok(_) => ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/atom+xml")
                    .set_body_string("<feed xmlns=\"http://www.w3.org/2005/Atom\"/>"),
                Err(e) => ResponseTemplate::new(400).set_body_string(e),
            },
            _ => ResponseTemplate::new(405),
        }
    }
}

/// Start a mock server backed by `fake`, requiring the test token on every request.
pub async fn serve(fake: &FakeSheet) -> MockServer {
    let server = MockServer::start().await;
    let auth = format!("Bearer {}", ACCESS_TOKEN);

    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .and(header("Authorization", auth.as_str()))
        .and(header("GData-Version", "3.0"))
        .respond_with(fake.clone())
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(BATCH_PATH))
        .and(header("Authorization", auth.as_str()))
        .and(header("Content-Type", "application/atom+xml"))
        .and(header("If-Match", "*"))
        .respond_with(fake.clone())
        .mount(&server)
        .await;

    server
}

pub fn config_for(server: &MockServer) -> WorksheetConfig {
    WorksheetConfig::new(SPREADSHEET).endpoint(server.uri())
}

pub fn worksheet(server: &MockServer) -> Worksheet {
    Worksheet::new(
        config_for(server),
        Arc::new(StaticToken::new(Token::bearer(ACCESS_TOKEN))),
    )
    .unwrap()
}

/// GET requests the server has seen whose query asks for `max-row=1`, i.e. header reads.
pub async fn header_reads(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .filter(|r| r.url.query_pairs().any(|(k, v)| k == "max-row" && v == "1"))
        .count()
}

/// Batch POSTs the server received in full.
pub async fn post_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .count()
}

pub async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}
