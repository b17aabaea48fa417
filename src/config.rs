// src/config.rs

use serde::Deserialize;
use std::{fs, path::Path};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "spreadsheets.google.com";
pub const DEFAULT_WORKSHEET_ID: &str = "od6";
const DEFAULT_WRITE_BUFFER: usize = 64;
const DEFAULT_READ_BUFFER: usize = 64;

/// Where a worksheet lives and how to talk to it.
///
/// `host` names the store in per-cell identity URLs. `endpoint` is where requests are
/// actually sent and defaults to `https://{host}`; override it to point at a proxy or a
/// local fake.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WorksheetConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_worksheet_id")]
    pub worksheet_id: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cells buffered by a writer before `send` waits on the upload.
    #[serde(default = "default_write_buffer")]
    pub write_buffer: usize,
    /// Cells decoded ahead of the reader before parsing pauses.
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
}

fn default_worksheet_id() -> String {
    DEFAULT_WORKSHEET_ID.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_write_buffer() -> usize {
    DEFAULT_WRITE_BUFFER
}

fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

impl WorksheetConfig {
    pub fn new(spreadsheet_id: impl Into<String>) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            worksheet_id: default_worksheet_id(),
            host: default_host(),
            endpoint: None,
            write_buffer: DEFAULT_WRITE_BUFFER,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    pub fn worksheet_id(mut self, id: impl Into<String>) -> Self {
        self.worksheet_id = id.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn write_buffer(mut self, cells: usize) -> Self {
        self.write_buffer = cells;
        self
    }

    pub fn read_buffer(mut self, cells: usize) -> Self {
        self.read_buffer = cells;
        self
    }

    /// Load a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(Error::Config("spreadsheet_id is empty".into()));
        }
        if self.worksheet_id.trim().is_empty() {
            return Err(Error::Config("worksheet_id is empty".into()));
        }
        if self.write_buffer == 0 {
            return Err(Error::Config("write_buffer must be at least 1".into()));
        }
        if self.read_buffer == 0 {
            return Err(Error::Config("read_buffer must be at least 1".into()));
        }
        Ok(())
    }

    /// `/feeds/cells/{spreadsheet}/{worksheet}/private/full`
    pub fn feed_path(&self) -> String {
        format!(
            "/feeds/cells/{}/{}/private/full",
            self.spreadsheet_id, self.worksheet_id
        )
    }

    fn base_url(&self) -> Result<Url> {
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}", self.host),
        };
        Ok(Url::parse(&base)?)
    }

    pub fn feed_url(&self) -> Result<Url> {
        Ok(self.base_url()?.join(&self.feed_path())?)
    }

    pub fn batch_url(&self) -> Result<Url> {
        Ok(self.base_url()?.join(&format!("{}/batch", self.feed_path()))?)
    }

    /// Canonical identity of the whole feed, as it appears in batch bodies.
    pub fn feed_id(&self) -> String {
        format!("https://{}{}", self.host, self.feed_path())
    }

    /// Canonical identity of one cell: `https://{host}{path}/R{row}C{col}`.
    pub fn cell_id(&self, row: u32, col: u32) -> String {
        format!("{}/R{}C{}", self.feed_id(), row, col)
    }
}
