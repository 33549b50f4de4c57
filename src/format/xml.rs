//! XML document parser built on the `quick-xml` event reader.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{DocumentParser, Framing};
use crate::error::{MTConnectError, MTConnectResult};
use crate::types::{
    Asset, AssetsDocument, Category, DataItem, Device, DeviceStream, DevicesDocument,
    DocumentFormat, DocumentKind, ErrorDocument, ErrorEntry, Header, Observation,
    StreamsDocument,
};
use crate::utils::constants::UNAVAILABLE;

/// Parser for `application/xml` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlParser;

impl DocumentParser for XmlParser {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Xml
    }

    fn parse_devices(&self, body: &[u8]) -> MTConnectResult<DevicesDocument> {
        let mut reader = reader(body);
        expect_root(&mut reader, DocumentKind::Devices)?;

        let mut doc = DevicesDocument::default();
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => match local_name(&e).as_str() {
                    "Header" => doc.header = header(&e)?,
                    "Device" | "Agent" => {
                        let mut attrs = attributes(&e)?;
                        doc.devices.push(Device {
                            id: attrs.remove("id").unwrap_or_default(),
                            name: attrs.remove("name").unwrap_or_default(),
                            uuid: attrs.remove("uuid"),
                            data_items: Vec::new(),
                        });
                    }
                    "DataItem" => {
                        let item = data_item(&e)?;
                        if let Some(device) = doc.devices.last_mut() {
                            device.data_items.push(item);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(doc)
    }

    fn parse_streams(&self, body: &[u8]) -> MTConnectResult<StreamsDocument> {
        let mut reader = reader(body);
        expect_root(&mut reader, DocumentKind::Streams)?;

        let mut doc = StreamsDocument::default();
        let mut category: Option<Category> = None;
        let mut open: Option<OpenObservation> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    if let Some(current) = open.as_mut() {
                        current.depth += 1;
                        continue;
                    }
                    let name = local_name(&e);
                    match category {
                        Some(cat) => open = Some(OpenObservation::new(observation(&e, &name, cat)?)),
                        None => open_container(&e, &name, &mut doc, &mut category)?,
                    }
                }
                Event::Empty(e) => {
                    if open.is_some() {
                        continue;
                    }
                    let name = local_name(&e);
                    match category {
                        Some(cat) => push_observation(&mut doc, observation(&e, &name, cat)?),
                        None => open_container(&e, &name, &mut doc, &mut category)?,
                    }
                }
                Event::Text(t) => {
                    if let Some(current) = open.as_mut() {
                        if current.depth == 0 && current.capture_text {
                            current.observation.value.push_str(&t.unescape()?);
                        }
                    }
                }
                Event::End(e) => {
                    if let Some(current) = open.as_mut() {
                        if current.depth > 0 {
                            current.depth -= 1;
                        } else if let Some(done) = open.take() {
                            push_observation(&mut doc, done.finish());
                        }
                        continue;
                    }
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if Category::from_name(&name).is_some() {
                        category = None;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(doc)
    }

    fn parse_assets(&self, body: &[u8]) -> MTConnectResult<AssetsDocument> {
        let mut reader = reader(body);
        expect_root(&mut reader, DocumentKind::Assets)?;

        let mut doc = AssetsDocument::default();
        let mut in_assets = false;
        loop {
            let start = reader.buffer_position() as usize;
            match reader.read_event()? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    if name == "Header" {
                        doc.header = header(&e)?;
                        reader.read_to_end(e.name())?;
                    } else if !in_assets && name == "Assets" {
                        in_assets = true;
                    } else if in_assets {
                        let mut asset = asset(&e, &name)?;
                        reader.read_to_end(e.name())?;
                        asset.content = raw_slice(body, start, reader.buffer_position() as usize);
                        doc.assets.push(asset);
                    }
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    if name == "Header" {
                        doc.header = header(&e)?;
                    } else if in_assets {
                        let mut asset = asset(&e, &name)?;
                        asset.content = raw_slice(body, start, reader.buffer_position() as usize);
                        doc.assets.push(asset);
                    }
                }
                Event::End(e) => {
                    if e.local_name().as_ref() == b"Assets" {
                        in_assets = false;
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(doc)
    }

    fn parse_error(&self, body: &[u8]) -> MTConnectResult<ErrorDocument> {
        let mut reader = reader(body);
        expect_root(&mut reader, DocumentKind::Error)?;

        let mut doc = ErrorDocument::default();
        let mut current: Option<ErrorEntry> = None;
        loop {
            match reader.read_event()? {
                Event::Start(e) => match local_name(&e).as_str() {
                    "Header" => doc.header = header(&e)?,
                    "Error" => current = Some(error_entry(&e)?),
                    _ => {}
                },
                Event::Empty(e) => match local_name(&e).as_str() {
                    "Header" => doc.header = header(&e)?,
                    "Error" => doc.errors.push(error_entry(&e)?),
                    _ => {}
                },
                Event::Text(t) => {
                    if let Some(entry) = current.as_mut() {
                        entry.message.push_str(&t.unescape()?);
                    }
                }
                Event::End(e) => {
                    if e.local_name().as_ref() == b"Error" {
                        if let Some(entry) = current.take() {
                            doc.errors.push(entry);
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(doc)
    }

    fn framing(&self) -> Framing {
        Framing::xml_streams()
    }
}

/// An observation element whose closing tag has not been read yet.
struct OpenObservation {
    observation: Observation,
    depth: usize,
    capture_text: bool,
}

impl OpenObservation {
    fn new(observation: Observation) -> Self {
        // Condition text is a message, not the value.
        let capture_text = observation.category != Category::Condition;
        Self {
            observation,
            depth: 0,
            capture_text,
        }
    }

    fn finish(self) -> Observation {
        self.observation
    }
}

fn reader(body: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);
    reader
}

/// Reads up to the root element and checks its name.
fn expect_root(reader: &mut Reader<&[u8]>, kind: DocumentKind) -> MTConnectResult<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(&e);
                if name == kind.root_name() {
                    return Ok(());
                }
                return Err(MTConnectError::Decode(format!(
                    "expected {kind} document, found <{name}>"
                )));
            }
            Event::Eof => {
                return Err(MTConnectError::Decode(format!(
                    "expected {kind} document, found no root element"
                )))
            }
            _ => {}
        }
    }
}

fn open_container(
    e: &BytesStart<'_>,
    name: &str,
    doc: &mut StreamsDocument,
    category: &mut Option<Category>,
) -> MTConnectResult<()> {
    match name {
        "Header" => doc.header = header(e)?,
        "DeviceStream" => {
            let mut attrs = attributes(e)?;
            doc.streams.push(DeviceStream {
                name: attrs.remove("name").unwrap_or_default(),
                uuid: attrs.remove("uuid"),
                observations: Vec::new(),
            });
        }
        other => *category = Category::from_name(other),
    }
    Ok(())
}

fn push_observation(doc: &mut StreamsDocument, observation: Observation) {
    if doc.streams.is_empty() {
        doc.streams.push(DeviceStream::default());
    }
    if let Some(stream) = doc.streams.last_mut() {
        stream.observations.push(observation);
    }
}

fn observation(e: &BytesStart<'_>, name: &str, category: Category) -> MTConnectResult<Observation> {
    let mut attrs = attributes(e)?;
    let sequence = parse_u64(&attrs, "sequence")?;
    let timestamp = attrs.get("timestamp").and_then(|t| parse_time(t));

    let (observation_type, value) = if category == Category::Condition {
        // <Normal type="TEMPERATURE"/>: the element is the level, `type` the kind.
        let level = if name == "Unavailable" {
            UNAVAILABLE.to_string()
        } else {
            name.to_ascii_uppercase()
        };
        (attrs.remove("type").unwrap_or_else(|| name.to_string()), level)
    } else {
        (name.to_string(), String::new())
    };

    Ok(Observation {
        data_item_id: attrs.remove("dataItemId").unwrap_or_default(),
        name: attrs.remove("name"),
        category,
        observation_type,
        sequence,
        timestamp,
        value,
        asset_type: attrs.remove("assetType"),
    })
}

fn data_item(e: &BytesStart<'_>) -> MTConnectResult<DataItem> {
    let mut attrs = attributes(e)?;
    Ok(DataItem {
        id: attrs.remove("id").unwrap_or_default(),
        name: attrs.remove("name"),
        category: attrs
            .get("category")
            .and_then(|c| Category::from_name(c))
            .unwrap_or_default(),
        data_type: attrs.remove("type").unwrap_or_default(),
        sub_type: attrs.remove("subType"),
    })
}

fn asset(e: &BytesStart<'_>, name: &str) -> MTConnectResult<Asset> {
    let mut attrs = attributes(e)?;
    Ok(Asset {
        asset_id: attrs.remove("assetId").unwrap_or_default(),
        asset_type: name.to_string(),
        timestamp: attrs.get("timestamp").and_then(|t| parse_time(t)),
        device_uuid: attrs.remove("deviceUuid"),
        removed: attrs.get("removed").is_some_and(|v| v == "true"),
        content: String::new(),
    })
}

fn error_entry(e: &BytesStart<'_>) -> MTConnectResult<ErrorEntry> {
    let mut attrs = attributes(e)?;
    Ok(ErrorEntry {
        error_code: attrs.remove("errorCode").unwrap_or_default(),
        message: String::new(),
    })
}

fn header(e: &BytesStart<'_>) -> MTConnectResult<Header> {
    let mut attrs = attributes(e)?;
    Ok(Header {
        instance_id: parse_u64(&attrs, "instanceId")?,
        sender: attrs.remove("sender").unwrap_or_default(),
        version: attrs.remove("version").unwrap_or_default(),
        creation_time: attrs.get("creationTime").and_then(|t| parse_time(t)),
        buffer_size: parse_u64(&attrs, "bufferSize")?,
        first_sequence: parse_u64(&attrs, "firstSequence")?,
        last_sequence: parse_u64(&attrs, "lastSequence")?,
        next_sequence: parse_u64(&attrs, "nextSequence")?,
        asset_buffer_size: parse_u64(&attrs, "assetBufferSize")?,
        asset_count: parse_u64(&attrs, "assetCount")?,
    })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> MTConnectResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

/// Missing attributes read as zero.
fn parse_u64(attrs: &HashMap<String, String>, key: &str) -> MTConnectResult<u64> {
    match attrs.get(key) {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| {
            MTConnectError::Decode(format!("attribute '{key}' is not an unsigned integer: '{raw}'"))
        }),
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn raw_slice(body: &[u8], start: usize, end: usize) -> String {
    let end = end.min(body.len());
    let start = start.min(end);
    String::from_utf8_lossy(&body[start..end]).trim().to_string()
}
