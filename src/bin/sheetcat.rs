use anyhow::{bail, Context, Result};
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use sheetstream::{
    CellQuery, RowQuery, StaticToken, Token, Worksheet, WorksheetConfig,
};
use std::{env, io::Write, sync::Arc};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Print every item of a view as one JSON object per line.
async fn dump<T, S>(items: S) -> Result<usize>
where
    T: Serialize,
    S: Stream<Item = sheetstream::Result<T>>,
{
    futures::pin_mut!(items);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0;
    while let Some(item) = items.try_next().await? {
        serde_json::to_writer(&mut out, &item)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(log_level.parse().unwrap_or(Level::INFO.into())),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(config_path) = args.get(1) else {
        bail!("usage: sheetcat <config.yaml> [cells|rows|records]");
    };
    let view = args.get(2).map(String::as_str).unwrap_or("records");

    let config = WorksheetConfig::from_yaml_file(config_path)?;
    let token = Token {
        token_type: env::var("SHEET_TOKEN_TYPE").unwrap_or_else(|_| "Bearer".to_string()),
        access_token: env::var("SHEET_ACCESS_TOKEN").context("SHEET_ACCESS_TOKEN is not set")?,
    };
    let sheet = Worksheet::new(config, Arc::new(StaticToken::new(token)))?;

    info!(spreadsheet = %sheet.config().spreadsheet_id, view, "reading");
    let count = match view {
        "cells" => dump(sheet.cells().read(CellQuery::new())).await?,
        "rows" => dump(sheet.rows().read(RowQuery::new())).await?,
        "records" => dump(sheet.records().read(RowQuery::new())).await?,
        other => bail!("unknown view {:?}; expected cells, rows or records", other),
    };
    info!(count, "done");
    Ok(())
}
