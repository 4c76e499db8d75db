//! DBLP XML parser using quick-xml
//!
//! Streaming parser for the `dblp.xml` release dump. Every second-level
//! element of `<dblp>` is one record; its element name is the category.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::dtd::EntityTable;
use crate::record::{AccessClassification, ExternalLink, Record, RecordTree};

/// Parse result with record and drop counts
#[derive(Debug, Default)]
pub struct ParseResult {
    pub tree: RecordTree,
    /// Records without a usable `key`/`mdate`
    pub dropped: usize,
}

/// Parse a decompressed release file. `dtd` is the co-located schema used
/// for named entities; without it only predefined entities resolve.
pub fn parse_release_file(xml_path: &Path, dtd: Option<&Path>) -> Result<ParseResult> {
    let entities = match dtd {
        Some(path) => EntityTable::from_dtd_file(path)?,
        None => EntityTable::new(),
    };
    log::debug!(
        "Parsing {} ({} entities)",
        xml_path.display(),
        entities.len()
    );
    let file = File::open(xml_path)
        .with_context(|| format!("Failed to open {}", xml_path.display()))?;
    parse_dblp_xml(BufReader::with_capacity(1 << 20, file), &entities)
        .with_context(|| format!("Failed to parse {}", xml_path.display()))
}

/// Parse DBLP XML from any buffered reader.
pub fn parse_dblp_xml<R: BufRead>(input: R, entities: &EntityTable) -> Result<ParseResult> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut result = ParseResult::default();
    let mut in_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if !in_root => {
                if e.name().as_ref() != b"dblp" {
                    anyhow::bail!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    );
                }
                in_root = true;
            }
            Event::Empty(e) if !in_root => {
                if e.name().as_ref() != b"dblp" {
                    anyhow::bail!(
                        "unexpected root element <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    );
                }
                break;
            }
            Event::Start(e) => {
                let category = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let header = RecordHeader::from_start(&e);
                match parse_record(&mut reader, &category, header, entities)? {
                    Some(record) => result.tree.push(&category, record),
                    None => result.dropped += 1,
                }
            }
            // self-closing record: attributes only
            Event::Empty(e) => {
                let category = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match RecordHeader::from_start(&e).into_record(&category) {
                    Some(record) => result.tree.push(&category, record),
                    None => result.dropped += 1,
                }
            }
            Event::End(e) if e.name().as_ref() == b"dblp" => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if result.dropped > 0 {
        log::warn!("Dropped {} records without key/mdate", result.dropped);
    }
    Ok(result)
}

/// Attributes of a record element
struct RecordHeader {
    key: Option<String>,
    mdate: Option<String>,
    publtype: Option<String>,
}

impl RecordHeader {
    fn from_start(e: &BytesStart) -> Self {
        let mut header = Self {
            key: None,
            mdate: None,
            publtype: None,
        };
        for attr in e.attributes().flatten() {
            let value = attr_value(&attr);
            match attr.key.as_ref() {
                b"key" => header.key = Some(value),
                b"mdate" => header.mdate = Some(value),
                b"publtype" => header.publtype = Some(value),
                _ => {}
            }
        }
        header
    }

    /// `None` when the key is missing or the mdate does not parse.
    fn into_record(self, category: &str) -> Option<Record> {
        let key = self.key.as_deref().filter(|k| !k.is_empty());
        let modified = self.mdate.as_deref().and_then(parse_mdate);
        let (Some(key), Some(modified)) = (key, modified) else {
            log::debug!(
                "Dropping <{category}> record (key={:?}, mdate={:?})",
                self.key,
                self.mdate
            );
            return None;
        };
        let mut record = Record::new(key, modified);
        record.publtype = self.publtype;
        Some(record)
    }
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute) -> String {
    attr.unescape_value()
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned())
}

/// `YYYY-MM-DD` → midnight of that day
pub fn parse_mdate(s: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Consume one record element. Returns `None` (after skipping to its end)
/// when the record lacks a key or a parseable mdate.
fn parse_record<R: BufRead>(
    reader: &mut Reader<R>,
    category: &str,
    header: RecordHeader,
    entities: &EntityTable,
) -> Result<Option<Record>> {
    let Some(mut record) = header.into_record(category) else {
        skip_element(reader, category.as_bytes())?;
        return Ok(None);
    };

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                let link_type = if name == b"ee" {
                    e.attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"type")
                        .map(|a| attr_value(&a))
                } else {
                    None
                };
                let text = read_text_content(reader, &name, entities)?;
                assign_field(&mut record, &name, text, link_type.as_deref());
            }
            Event::End(e) if e.name().as_ref() == category.as_bytes() => break,
            Event::Eof => anyhow::bail!("unexpected EOF inside <{category}>"),
            _ => {}
        }
        buf.clear();
    }

    Ok(Some(record))
}

fn assign_field(record: &mut Record, name: &[u8], text: String, link_type: Option<&str>) {
    match name {
        b"author" => record.authors.push(text),
        b"editor" => record.editors.push(text),
        b"title" => record.title = Some(text),
        b"year" => record.year = text.parse().ok(),
        b"journal" | b"booktitle" => {
            if record.venue.is_none() {
                record.venue = Some(text);
            }
        }
        b"pages" => record.pages = Some(text),
        b"volume" => record.volume = Some(text),
        b"number" => record.number = Some(text),
        b"url" => record.url = Some(text),
        b"ee" => record.external_links.push(ExternalLink {
            text,
            access_type: link_type.and_then(AccessClassification::from_link_type),
        }),
        other => record
            .fields
            .entry(String::from_utf8_lossy(other).into_owned())
            .or_default()
            .push(text),
    }
}

fn skip_element<R: BufRead>(reader: &mut Reader<R>, end_tag: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

/// Read text content of an element, flattening nested markup (`<i>`, `<sub>`)
fn read_text_content<R: BufRead>(
    reader: &mut Reader<R>,
    end_tag: &[u8],
    entities: &EntityTable,
) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 1;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&entities.decode(&String::from_utf8_lossy(&e))),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::Start(_) => depth += 1,
            Event::End(e) => {
                depth -= 1;
                if depth == 0 && e.name().as_ref() == end_tag {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(text.trim().to_string())
}
