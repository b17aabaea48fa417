// src/cells/batch.rs

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;

use crate::config::WorksheetConfig;
use crate::error::{Error, Result};
use crate::types::Cell;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const BATCH_NS: &str = "http://schemas.google.com/gdata/batch";
const GS_NS: &str = "http://schemas.google.com/spreadsheets/2006";

fn xml_err(e: impl Display) -> Error {
    Error::Xml(e.to_string())
}

/// Serializes a batch update body piece by piece, so it can be streamed:
/// `open`, then one `entry` per cell, then `close`. Attribute and text values are
/// escaped by the writer.
#[derive(Clone, Debug)]
pub struct BatchBody {
    config: WorksheetConfig,
}

impl BatchBody {
    pub fn new(config: &WorksheetConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// `<feed …namespaces…><id>{feed}</id>` with the root left open.
    pub fn open(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", ATOM_NS));
        feed.push_attribute(("xmlns:batch", BATCH_NS));
        feed.push_attribute(("xmlns:gs", GS_NS));
        writer.write_event(Event::Start(feed)).map_err(xml_err)?;
        write_text_element(&mut writer, "id", &self.config.feed_id())?;

        finish(writer)
    }

    pub fn entry(&self, cell: &Cell) -> Result<String> {
        let (row, col) = cell.key;
        let input = cell
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();

        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Start(BytesStart::new("entry")))
            .map_err(xml_err)?;

        let mut op = BytesStart::new("batch:operation");
        op.push_attribute(("type", "update"));
        writer.write_event(Event::Empty(op)).map_err(xml_err)?;

        write_text_element(&mut writer, "id", &self.config.cell_id(row, col))?;

        let mut gs_cell = BytesStart::new("gs:cell");
        gs_cell.push_attribute(("row", row.to_string().as_str()));
        gs_cell.push_attribute(("col", col.to_string().as_str()));
        gs_cell.push_attribute(("inputValue", input.as_str()));
        writer.write_event(Event::Empty(gs_cell)).map_err(xml_err)?;

        writer
            .write_event(Event::End(BytesEnd::new("entry")))
            .map_err(xml_err)?;
        finish(writer)
    }

    pub fn close(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::End(BytesEnd::new("feed")))
            .map_err(xml_err)?;
        finish(writer)
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_err)?;
    Ok(())
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn body() -> BatchBody {
        BatchBody::new(&WorksheetConfig::new("key"))
    }

    #[test]
    fn test_open_declares_namespaces_and_feed_id() {
        let open = body().open().unwrap();
        assert!(open.starts_with(
            r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:batch="http://schemas.google.com/gdata/batch" xmlns:gs="http://schemas.google.com/spreadsheets/2006">"#
        ));
        assert!(open.ends_with(
            "<id>https://spreadsheets.google.com/feeds/cells/key/od6/private/full</id>"
        ));
        assert!(!open.contains("</feed>"));
    }

    #[test]
    fn test_entry_layout() {
        let entry = body().entry(&Cell::new(2, 3, 1.5)).unwrap();
        assert_eq!(
            entry,
            concat!(
                "<entry>",
                r#"<batch:operation type="update"/>"#,
                "<id>https://spreadsheets.google.com/feeds/cells/key/od6/private/full/R2C3</id>",
                r#"<gs:cell row="2" col="3" inputValue="1.5"/>"#,
                "</entry>"
            )
        );
    }

    #[test]
    fn test_entry_id_follows_configured_host() {
        let config = WorksheetConfig::new("key")
            .worksheet_id("ws2")
            .host("sheets.example.test");
        let entry = BatchBody::new(&config).entry(&Cell::new(4, 1, "x")).unwrap();
        assert!(entry.contains(&format!("<id>{}</id>", config.cell_id(4, 1))));
        assert!(entry.contains("<id>https://sheets.example.test/feeds/cells/key/ws2/private/full/R4C1</id>"));
    }

    #[test]
    fn test_empty_value_clears() {
        let entry = body().entry(&Cell::empty(1, 1)).unwrap();
        assert!(entry.contains(r#"inputValue="""#));
    }

    #[test]
    fn test_values_are_escaped() {
        let cell = Cell {
            key: (1, 1),
            value: Some(Value::from(r#"a "quoted" <b> & c"#)),
        };
        let entry = body().entry(&cell).unwrap();
        assert!(entry.contains(r#"inputValue="a &quot;quoted&quot; &lt;b&gt; &amp; c""#));
    }

    #[test]
    fn test_close() {
        assert_eq!(body().close().unwrap(), "</feed>");
    }
}
