//! MTConnect document types.
//!
//! A deliberately small model of the four response documents an Agent
//! produces: `MTConnectDevices` (probe), `MTConnectStreams` (current and
//! sample), `MTConnectAssets` and `MTConnectError`. Only the fields the client
//! engine reads are typed; asset bodies are kept as raw serialized text.
//!
//! The types derive serde (camelCase fields) so decoded documents can be
//! stored or forwarded. That shape is the crate's own; the Agent's JSON
//! envelope is read by [`crate::format::JsonParser`]. Every document requires
//! its `header`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MTConnectError;
use crate::utils::constants::{ASSET_CHANGED, ASSET_REMOVED, UNAVAILABLE};

// ============================================================================
// Enums
// ============================================================================

/// Serialization format requested from the Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// `application/xml`, the protocol default.
    #[default]
    Xml,
    /// `application/json`.
    Json,
}

impl DocumentFormat {
    /// Value of the `documentFormat` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Xml => "xml",
            DocumentFormat::Json => "json",
        }
    }

    /// MIME type sent in the `Accept` header.
    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::Xml => "application/xml",
            DocumentFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = MTConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(DocumentFormat::Xml),
            "json" | "json-cppagent" => Ok(DocumentFormat::Json),
            other => Err(MTConnectError::InvalidConfig(format!(
                "unsupported document format '{other}'"
            ))),
        }
    }
}

/// Category of a data item / observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Continuously variable value (`Samples` container).
    Sample,
    /// Discrete value (`Events` container).
    #[default]
    Event,
    /// Health state (`Condition` container).
    Condition,
}

impl Category {
    /// Maps the XML container element (`Samples`, `Events`, `Condition`) or
    /// the `category` attribute to a category.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Samples" | "SAMPLE" => Some(Category::Sample),
            "Events" | "EVENT" => Some(Category::Event),
            "Condition" | "CONDITION" => Some(Category::Condition),
            _ => None,
        }
    }
}

/// Kind of document, used in decode errors and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// `MTConnectDevices`.
    Devices,
    /// `MTConnectStreams`.
    Streams,
    /// `MTConnectAssets`.
    Assets,
    /// `MTConnectError`.
    Error,
}

impl DocumentKind {
    /// Root element name of this document kind.
    pub fn root_name(&self) -> &'static str {
        match self {
            DocumentKind::Devices => "MTConnectDevices",
            DocumentKind::Streams => "MTConnectStreams",
            DocumentKind::Assets => "MTConnectAssets",
            DocumentKind::Error => "MTConnectError",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_name())
    }
}

// ============================================================================
// Header
// ============================================================================

/// The `Header` element shared by every response document.
///
/// `first_sequence`, `last_sequence` and `next_sequence` describe the Agent's
/// retention buffer at the time the document was produced; `instance_id`
/// changes whenever the Agent restarts and loses that buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Header {
    /// Agent instance identity.
    pub instance_id: u64,
    /// Sender host name.
    pub sender: String,
    /// Agent protocol version.
    pub version: String,
    /// Document creation time.
    pub creation_time: Option<DateTime<Utc>>,
    /// Size of the observation buffer.
    pub buffer_size: u64,
    /// Oldest sequence still retained.
    pub first_sequence: u64,
    /// Newest sequence assigned.
    pub last_sequence: u64,
    /// Sequence the next observation will receive.
    pub next_sequence: u64,
    /// Size of the asset buffer.
    pub asset_buffer_size: u64,
    /// Assets currently held.
    pub asset_count: u64,
}

impl Header {
    /// Returns `true` if `sequence` lies within `[first_sequence, next_sequence]`.
    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.first_sequence && sequence <= self.next_sequence
    }
}

// ============================================================================
// Probe
// ============================================================================

/// Response of a `probe` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesDocument {
    /// Document header.
    pub header: Header,
    /// Devices described by the Agent.
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl DevicesDocument {
    /// Looks a device up by name or UUID.
    pub fn device(&self, key: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.name == key || d.uuid.as_deref() == Some(key))
    }
}

/// A device and the data items it exposes, flattened across components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    /// Element id.
    pub id: String,
    /// Device name.
    pub name: String,
    /// Device UUID.
    pub uuid: Option<String>,
    /// Data items of the device and all of its components.
    pub data_items: Vec<DataItem>,
}

/// A data item definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataItem {
    /// Data item id, referenced by observations.
    pub id: String,
    /// Optional name.
    pub name: Option<String>,
    /// Category.
    pub category: Category,
    /// Type, e.g. `AVAILABILITY` or `ASSET_CHANGED`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Optional sub type.
    pub sub_type: Option<String>,
}

// ============================================================================
// Streams
// ============================================================================

/// Response of a `current` or `sample` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamsDocument {
    /// Document header.
    pub header: Header,
    /// One batch per device.
    #[serde(default)]
    pub streams: Vec<DeviceStream>,
}

impl StreamsDocument {
    /// Highest observation sequence in the document.
    pub fn max_sequence(&self) -> Option<u64> {
        self.streams.iter().filter_map(DeviceStream::max_sequence).max()
    }

    /// Total number of observations across all devices.
    pub fn observation_count(&self) -> usize {
        self.streams.iter().map(|s| s.observations.len()).sum()
    }
}

/// Observations of a single device, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceStream {
    /// Device name.
    pub name: String,
    /// Device UUID.
    pub uuid: Option<String>,
    /// Observations, in the order the Agent wrote them.
    pub observations: Vec<Observation>,
}

/// An ordered, read-only batch of observations scoped to one device.
pub type ObservationBatch = DeviceStream;

impl DeviceStream {
    /// Highest sequence number in the batch.
    pub fn max_sequence(&self) -> Option<u64> {
        self.observations.iter().map(|o| o.sequence).max()
    }
}

/// A single observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Observation {
    /// Id of the data item that produced the observation.
    pub data_item_id: String,
    /// Optional data item name.
    pub name: Option<String>,
    /// Category.
    pub category: Category,
    /// Observation type in element form, e.g. `Availability` or `AssetChanged`.
    #[serde(rename = "type")]
    pub observation_type: String,
    /// Agent-assigned sequence number.
    pub sequence: u64,
    /// Observation timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Value as text; `UNAVAILABLE` when the Agent has no value.
    pub value: String,
    /// Asset type for `AssetChanged` / `AssetRemoved` observations.
    pub asset_type: Option<String>,
}

impl Observation {
    /// Returns `true` if the value is the protocol's no-value sentinel.
    pub fn is_unavailable(&self) -> bool {
        self.value == UNAVAILABLE
    }

    /// Returns `true` for `AssetChanged` observations.
    pub fn is_asset_changed(&self) -> bool {
        is_type(&self.observation_type, ASSET_CHANGED)
    }

    /// Returns `true` for `AssetRemoved` observations.
    pub fn is_asset_removed(&self) -> bool {
        is_type(&self.observation_type, ASSET_REMOVED)
    }
}

/// Compares an observation type against its element-form name, also
/// accepting the data item form (`ASSET_CHANGED`).
fn is_type(observed: &str, element_name: &str) -> bool {
    if observed == element_name {
        return true;
    }
    let mut upper = String::with_capacity(element_name.len() + 4);
    for (i, c) in element_name.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            upper.push('_');
        }
        upper.push(c.to_ascii_uppercase());
    }
    observed == upper
}

// ============================================================================
// Assets
// ============================================================================

/// Response of an `assets` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsDocument {
    /// Document header.
    pub header: Header,
    /// Assets returned.
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// An asset. The body is kept in its serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    /// Asset id.
    pub asset_id: String,
    /// Asset type, e.g. `CuttingTool`.
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Last change time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Owning device.
    pub device_uuid: Option<String>,
    /// Whether the asset has been removed.
    pub removed: bool,
    /// Raw serialized asset element.
    pub content: String,
}

// ============================================================================
// Errors
// ============================================================================

/// An `MTConnectError` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDocument {
    /// Document header.
    pub header: Header,
    /// Error entries.
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
}

/// One error reported by the Agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorEntry {
    /// Error code, e.g. `OUT_OF_RANGE`.
    pub error_code: String,
    /// Human readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(kind: &str, value: &str, sequence: u64) -> Observation {
        Observation {
            observation_type: kind.to_string(),
            value: value.to_string(),
            sequence,
            ..Default::default()
        }
    }

    #[test]
    fn format_round_trips_through_str() {
        assert_eq!("XML".parse::<DocumentFormat>().unwrap(), DocumentFormat::Xml);
        assert_eq!("json".parse::<DocumentFormat>().unwrap(), DocumentFormat::Json);
        assert!("yaml".parse::<DocumentFormat>().is_err());
        assert_eq!(DocumentFormat::Json.content_type(), "application/json");
    }

    #[test]
    fn header_range_is_inclusive() {
        let header = Header {
            first_sequence: 50,
            next_sequence: 200,
            ..Default::default()
        };
        assert!(header.contains(50));
        assert!(header.contains(200));
        assert!(!header.contains(49));
        assert!(!header.contains(201));
    }

    #[test]
    fn documents_require_a_header() {
        assert!(serde_json::from_str::<StreamsDocument>(r#"{"nonsense": true}"#).is_err());
        let doc: StreamsDocument =
            serde_json::from_str(r#"{"header": {"instanceId": 3, "nextSequence": 11}}"#).unwrap();
        assert_eq!(doc.header.instance_id, 3);
        assert!(doc.streams.is_empty());
    }

    #[test]
    fn asset_type_matching_accepts_both_forms() {
        assert!(obs("AssetChanged", "t1", 1).is_asset_changed());
        assert!(obs("ASSET_CHANGED", "t1", 1).is_asset_changed());
        assert!(obs("AssetRemoved", "t1", 1).is_asset_removed());
        assert!(!obs("Availability", "AVAILABLE", 1).is_asset_changed());
    }

    #[test]
    fn max_sequence_spans_devices() {
        let doc = StreamsDocument {
            header: Header::default(),
            streams: vec![
                DeviceStream {
                    name: "a".into(),
                    observations: vec![obs("X", "1", 12), obs("X", "2", 9)],
                    ..Default::default()
                },
                DeviceStream {
                    name: "b".into(),
                    observations: vec![obs("X", "3", 15)],
                    ..Default::default()
                },
            ],
        };
        assert_eq!(doc.max_sequence(), Some(15));
        assert_eq!(doc.observation_count(), 3);
        assert_eq!(StreamsDocument::default().max_sequence(), None);
    }
}
