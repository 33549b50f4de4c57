//! JSON document parser.
//!
//! Reads the documents an Agent serves with `documentFormat=json`. Two
//! layouts are in use and both are accepted:
//!
//! - version 1 wraps each child in a single-key object inside an array:
//!   `"Events": [{"Availability": {...}}]`
//! - version 2 groups children by element name:
//!   `"Events": {"Availability": [{...}]}`
//!
//! Every document must carry a `Header`; a body without one is not an
//! MTConnect document and fails with [`MTConnectError::Decode`].

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{DocumentParser, Framing};
use crate::error::{MTConnectError, MTConnectResult};
use crate::types::{
    Asset, AssetsDocument, Category, DataItem, Device, DeviceStream, DevicesDocument,
    DocumentFormat, DocumentKind, ErrorDocument, ErrorEntry, Header, Observation,
    StreamsDocument,
};
use crate::utils::constants::UNAVAILABLE;

type Object = Map<String, Value>;

/// Parser for `application/json` documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl DocumentParser for JsonParser {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Json
    }

    fn parse_devices(&self, body: &[u8]) -> MTConnectResult<DevicesDocument> {
        let value: Value = serde_json::from_slice(body)?;
        let root = root(&value, DocumentKind::Devices)?;

        let mut devices = Vec::new();
        for (name, device) in entries(root.get("Devices")) {
            if name != "Device" && name != "Agent" {
                continue;
            }
            let Some(device) = device.as_object() else {
                continue;
            };
            let mut data_items = Vec::new();
            collect_data_items(device, &mut data_items);
            devices.push(Device {
                id: text(device, "id").unwrap_or_default(),
                name: text(device, "name").unwrap_or_default(),
                uuid: text(device, "uuid"),
                data_items,
            });
        }

        Ok(DevicesDocument {
            header: header(root, DocumentKind::Devices)?,
            devices,
        })
    }

    fn parse_streams(&self, body: &[u8]) -> MTConnectResult<StreamsDocument> {
        let value: Value = serde_json::from_slice(body)?;
        let root = root(&value, DocumentKind::Streams)?;

        let mut streams = Vec::new();
        for device in children(root, "Streams", "DeviceStream") {
            let mut observations = Vec::new();
            for component in children(device, "ComponentStreams", "ComponentStream") {
                for (container, category) in [
                    ("Samples", Category::Sample),
                    ("Events", Category::Event),
                    ("Condition", Category::Condition),
                ] {
                    for (name, body) in entries(component.get(container)) {
                        if let Some(body) = body.as_object() {
                            observations.push(observation(name, body, category)?);
                        }
                    }
                }
            }
            streams.push(DeviceStream {
                name: text(device, "name").unwrap_or_default(),
                uuid: text(device, "uuid"),
                observations,
            });
        }

        Ok(StreamsDocument {
            header: header(root, DocumentKind::Streams)?,
            streams,
        })
    }

    fn parse_assets(&self, body: &[u8]) -> MTConnectResult<AssetsDocument> {
        let value: Value = serde_json::from_slice(body)?;
        let root = root(&value, DocumentKind::Assets)?;

        let mut assets = Vec::new();
        for (name, body) in entries(root.get("Assets")) {
            let Some(fields) = body.as_object() else {
                continue;
            };
            let mut wrapped = Object::new();
            wrapped.insert(name.to_string(), body.clone());
            assets.push(Asset {
                asset_id: text(fields, "assetId").unwrap_or_default(),
                asset_type: name.to_string(),
                timestamp: time(fields, "timestamp"),
                device_uuid: text(fields, "deviceUuid"),
                removed: text(fields, "removed").is_some_and(|v| v == "true"),
                content: Value::Object(wrapped).to_string(),
            });
        }

        Ok(AssetsDocument {
            header: header(root, DocumentKind::Assets)?,
            assets,
        })
    }

    fn parse_error(&self, body: &[u8]) -> MTConnectResult<ErrorDocument> {
        let value: Value = serde_json::from_slice(body)?;
        let root = root(&value, DocumentKind::Error)?;

        let errors = children(root, "Errors", "Error")
            .into_iter()
            .map(|entry| ErrorEntry {
                error_code: text(entry, "errorCode").unwrap_or_default(),
                message: text(entry, "value")
                    .or_else(|| text(entry, "message"))
                    .unwrap_or_default(),
            })
            .collect();

        Ok(ErrorDocument {
            header: header(root, DocumentKind::Error)?,
            errors,
        })
    }

    fn framing(&self) -> Framing {
        Framing::JsonObjects
    }
}

fn root(value: &Value, kind: DocumentKind) -> MTConnectResult<&Object> {
    value
        .get(kind.root_name())
        .and_then(Value::as_object)
        .ok_or_else(|| MTConnectError::Decode(format!("expected {kind} document, root key missing")))
}

fn header(root: &Object, kind: DocumentKind) -> MTConnectResult<Header> {
    let header = root
        .get("Header")
        .and_then(Value::as_object)
        .ok_or_else(|| MTConnectError::Decode(format!("{kind} document has no Header")))?;
    Ok(Header {
        instance_id: number(header, "instanceId")?,
        sender: text(header, "sender").unwrap_or_default(),
        version: text(header, "version").unwrap_or_default(),
        creation_time: time(header, "creationTime"),
        buffer_size: number(header, "bufferSize")?,
        first_sequence: number(header, "firstSequence")?,
        last_sequence: number(header, "lastSequence")?,
        next_sequence: number(header, "nextSequence")?,
        asset_buffer_size: number(header, "assetBufferSize")?,
        asset_count: number(header, "assetCount")?,
    })
}

/// Named children of a collection in either layout, in document order.
///
/// `[{"A": x}, {"B": y}]` and `{"A": [x], "B": y}` both yield `("A", x)`
/// and `("B", y)`.
fn entries(collection: Option<&Value>) -> Vec<(&str, &Value)> {
    let mut out = Vec::new();
    match collection {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(wrapper) = item.as_object() {
                    out.extend(wrapper.iter().map(|(name, body)| (name.as_str(), body)));
                }
            }
        }
        Some(Value::Object(groups)) => {
            for (name, group) in groups {
                match group {
                    Value::Array(items) => out.extend(items.iter().map(|body| (name.as_str(), body))),
                    body => out.push((name.as_str(), body)),
                }
            }
        }
        _ => {}
    }
    out
}

/// Objects named `singular`, found either inside the `plural` collection or
/// directly under `parent`.
fn children<'a>(parent: &'a Object, plural: &str, singular: &str) -> Vec<&'a Object> {
    let mut out: Vec<&Object> = entries(parent.get(plural))
        .into_iter()
        .filter(|(name, _)| *name == singular)
        .filter_map(|(_, body)| body.as_object())
        .collect();
    match parent.get(singular) {
        Some(Value::Array(items)) => out.extend(items.iter().filter_map(Value::as_object)),
        Some(Value::Object(body)) => out.push(body),
        _ => {}
    }
    out
}

fn collect_data_items(component: &Object, out: &mut Vec<DataItem>) {
    for item in children(component, "DataItems", "DataItem") {
        out.push(DataItem {
            id: text(item, "id").unwrap_or_default(),
            name: text(item, "name"),
            category: text(item, "category")
                .and_then(|c| Category::from_name(&c))
                .unwrap_or_default(),
            data_type: text(item, "type").unwrap_or_default(),
            sub_type: text(item, "subType"),
        });
    }
    for (_, child) in entries(component.get("Components")) {
        if let Some(child) = child.as_object() {
            collect_data_items(child, out);
        }
    }
}

fn observation(name: &str, body: &Object, category: Category) -> MTConnectResult<Observation> {
    let (observation_type, value) = if category == Category::Condition {
        // {"Fault": {"type": "LOAD", ...}}: the key is the level, `type` the kind.
        let level = if name == "Unavailable" {
            UNAVAILABLE.to_string()
        } else {
            name.to_ascii_uppercase()
        };
        (text(body, "type").unwrap_or_else(|| name.to_string()), level)
    } else {
        let value = match body.get("value") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        (name.to_string(), value)
    };

    Ok(Observation {
        data_item_id: text(body, "dataItemId").unwrap_or_default(),
        name: text(body, "name"),
        category,
        observation_type,
        sequence: number(body, "sequence")?,
        timestamp: time(body, "timestamp"),
        value,
        asset_type: text(body, "assetType"),
    })
}

/// Unsigned integer field; numbers and numeric strings are accepted, a
/// missing field reads as zero.
fn number(object: &Object, key: &str) -> MTConnectResult<u64> {
    let invalid = |raw: &Value| {
        MTConnectError::Decode(format!("field '{key}' is not an unsigned integer: {raw}"))
    };
    let Some(raw) = object.get(key) else {
        return Ok(0);
    };
    match raw {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_u64().ok_or_else(|| invalid(raw)),
        Value::String(s) => s.trim().parse().map_err(|_| invalid(raw)),
        _ => Err(invalid(raw)),
    }
}

fn text(object: &Object, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn time(object: &Object, key: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text(object, key)?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAMS_V2: &str = r#"{
      "MTConnectStreams": {
        "jsonVersion": 2,
        "schemaVersion": "2.2",
        "Header": {"creationTime": "2024-03-01T10:00:00Z", "sender": "agent", "instanceId": 1709287200,
                   "version": "2.2.0.16", "bufferSize": 131072, "firstSequence": 50, "lastSequence": 200, "nextSequence": 201},
        "Streams": {
          "DeviceStream": [{
            "name": "VMC-3Axis",
            "uuid": "vmc-001",
            "ComponentStream": [
              {"component": "Device", "componentId": "d1",
               "Events": {
                 "Availability": [{"dataItemId": "avail", "timestamp": "2024-03-01T09:59:00Z", "sequence": 120, "value": "AVAILABLE"}],
                 "AssetChanged": [{"dataItemId": "d1_asset_chg", "timestamp": "2024-03-01T09:59:30Z", "sequence": 150, "assetType": "CuttingTool", "value": "tool-42"}]
               }},
              {"component": "Linear", "componentId": "x1", "name": "X",
               "Samples": {"Position": [{"dataItemId": "Xpos", "timestamp": "2024-03-01T09:59:50Z", "sequence": 152, "subType": "ACTUAL", "value": 12.5}]},
               "Condition": {"Fault": [{"dataItemId": "Xload", "timestamp": "2024-03-01T09:59:52Z", "sequence": 154, "type": "LOAD", "value": "Overload"}]}}
            ]
          }]
        }
      }
    }"#;

    const STREAMS_V1: &str = r#"{
      "MTConnectStreams": {
        "Header": {"instanceId": "1709287200", "firstSequence": "50", "nextSequence": "201", "lastSequence": "200"},
        "Streams": [{"DeviceStream": {
          "name": "VMC-3Axis", "uuid": "vmc-001",
          "ComponentStreams": [{"ComponentStream": {
            "component": "Device", "componentId": "d1",
            "Events": [
              {"Availability": {"dataItemId": "avail", "sequence": "120", "value": "AVAILABLE"}},
              {"AssetRemoved": {"dataItemId": "d1_asset_rem", "sequence": "151", "value": "tool-7"}}
            ],
            "Condition": [{"Normal": {"dataItemId": "Xtemp", "sequence": "153", "type": "TEMPERATURE"}}]
          }}]
        }}]
      }
    }"#;

    #[test]
    fn parses_agent_streams_v2() {
        let doc = JsonParser.parse_streams(STREAMS_V2.as_bytes()).unwrap();
        assert_eq!(doc.header.instance_id, 1709287200);
        assert_eq!(doc.header.first_sequence, 50);
        assert_eq!(doc.header.next_sequence, 201);
        assert!(doc.header.creation_time.is_some());

        let stream = &doc.streams[0];
        assert_eq!(stream.name, "VMC-3Axis");
        assert_eq!(stream.uuid.as_deref(), Some("vmc-001"));
        assert_eq!(stream.observations.len(), 4);

        let changed = stream.observations.iter().find(|o| o.is_asset_changed()).unwrap();
        assert_eq!(changed.value, "tool-42");
        assert_eq!(changed.asset_type.as_deref(), Some("CuttingTool"));

        let position = stream.observations.iter().find(|o| o.category == Category::Sample).unwrap();
        assert_eq!(position.value, "12.5");
        assert_eq!(position.sequence, 152);

        let fault = stream.observations.iter().find(|o| o.category == Category::Condition).unwrap();
        assert_eq!(fault.observation_type, "LOAD");
        assert_eq!(fault.value, "FAULT");
        assert_eq!(doc.max_sequence(), Some(154));
    }

    #[test]
    fn parses_agent_streams_v1() {
        let doc = JsonParser.parse_streams(STREAMS_V1.as_bytes()).unwrap();
        assert_eq!(doc.header.instance_id, 1709287200);
        assert_eq!(doc.header.next_sequence, 201);

        let observations = &doc.streams[0].observations;
        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].value, "AVAILABLE");
        assert!(observations[1].is_asset_removed());
        assert_eq!(observations[1].sequence, 151);
        assert_eq!(observations[2].value, "NORMAL");
    }

    #[test]
    fn body_without_header_is_a_decode_error() {
        for body in [
            r#"{"MTConnectStreams": {"nonsense": true}}"#,
            r#"{"MTConnectStreams": {"header": {"instanceId": 3}, "streams": []}}"#,
        ] {
            assert!(
                matches!(JsonParser.parse_streams(body.as_bytes()), Err(MTConnectError::Decode(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn non_numeric_sequence_is_a_decode_error() {
        let body = r#"{"MTConnectStreams": {"Header": {"instanceId": "x"}}}"#;
        assert!(matches!(
            JsonParser.parse_streams(body.as_bytes()),
            Err(MTConnectError::Decode(_))
        ));
    }

    #[test]
    fn wrong_root_is_a_decode_error() {
        let body = br#"{"MTConnectError": {"Header": {"instanceId": 1}, "Errors": [{"Error": {"errorCode": "OUT_OF_RANGE", "value": "'from' must be greater than 49"}}]}}"#;
        assert!(matches!(
            JsonParser.parse_streams(body),
            Err(MTConnectError::Decode(_))
        ));
        let doc = JsonParser.parse_error(body).unwrap();
        assert_eq!(doc.header.instance_id, 1);
        assert_eq!(doc.errors[0].error_code, "OUT_OF_RANGE");
        assert_eq!(doc.errors[0].message, "'from' must be greater than 49");
    }

    #[test]
    fn parses_devices_with_nested_components() {
        let body = r#"{
          "MTConnectDevices": {
            "Header": {"instanceId": 7, "assetCount": 3},
            "Devices": {
              "Agent": [{"id": "agent_1", "name": "Agent", "uuid": "agent-uuid",
                         "DataItems": {"DataItem": [{"id": "agent_avail", "type": "AVAILABILITY", "category": "EVENT"}]}}],
              "Device": [{"id": "d1", "name": "VMC-3Axis", "uuid": "vmc-001",
                "DataItems": {"DataItem": [{"id": "d1_asset_chg", "type": "ASSET_CHANGED", "category": "EVENT"}]},
                "Components": {"Axes": [{"id": "a1",
                  "Components": {"Linear": [{"id": "x1", "name": "X",
                    "DataItems": {"DataItem": [{"id": "Xpos", "type": "POSITION", "subType": "ACTUAL", "category": "SAMPLE"}]}}]}}]}}]
            }
          }
        }"#;
        let doc = JsonParser.parse_devices(body.as_bytes()).unwrap();
        assert_eq!(doc.header.asset_count, 3);
        assert_eq!(doc.devices.len(), 2);
        let device = doc.device("vmc-001").unwrap();
        assert_eq!(device.data_items.len(), 2);
        assert_eq!(device.data_items[1].category, Category::Sample);
        assert_eq!(device.data_items[1].sub_type.as_deref(), Some("ACTUAL"));
    }

    #[test]
    fn parses_assets_and_keeps_raw_content() {
        let body = r#"{
          "MTConnectAssets": {
            "Header": {"instanceId": 7, "assetCount": 2},
            "Assets": [
              {"CuttingTool": {"assetId": "tool-42", "deviceUuid": "vmc-001", "timestamp": "2024-03-01T09:59:30Z",
                               "CuttingToolLifeCycle": {"ToolLife": [{"type": "MINUTES", "value": 12}]}}},
              {"File": {"assetId": "f-1", "removed": true}}
            ]
          }
        }"#;
        let doc = JsonParser.parse_assets(body.as_bytes()).unwrap();
        assert_eq!(doc.assets.len(), 2);
        let tool = &doc.assets[0];
        assert_eq!(tool.asset_id, "tool-42");
        assert_eq!(tool.asset_type, "CuttingTool");
        assert!(tool.timestamp.is_some());
        assert!(tool.content.starts_with(r#"{"CuttingTool":"#));
        assert!(tool.content.contains("ToolLife"));
        assert!(doc.assets[1].removed);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(
            JsonParser.parse_devices(b"{\"MTConnectDevices\": "),
            Err(MTConnectError::Decode(_))
        ));
    }
}
