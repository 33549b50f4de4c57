//! Document formats: the pluggable "bytes → typed document" capability.
//!
//! A [`DocumentParser`] decodes the four MTConnect response documents for one
//! wire format and tells the streaming reader how documents are delimited on
//! a chunked stream ([`Framing`]). Two parsers ship with the crate:
//!
//! - [`XmlParser`] for `application/xml` (the protocol default)
//! - [`JsonParser`] for `application/json`
//!
//! Custom parsers can be injected through
//! [`ClientBuilder::with_parser`](crate::builders::ClientBuilder::with_parser).

mod json;
mod xml;

use std::sync::Arc;

pub use json::JsonParser;
pub use xml::XmlParser;

use crate::error::MTConnectResult;
use crate::types::{
    AssetsDocument, DevicesDocument, DocumentFormat, ErrorDocument, StreamsDocument,
};
use crate::utils::constants::{ERROR_CLOSE_TAG, STREAMS_CLOSE_TAG, XML_DECLARATION};

/// Decodes MTConnect documents of one wire format.
///
/// Each method either returns the typed document or fails; callers fall back
/// to [`parse_error`](Self::parse_error) when the expected shape does not
/// decode.
pub trait DocumentParser: Send + Sync {
    /// The wire format this parser reads.
    fn format(&self) -> DocumentFormat;

    /// Decode an `MTConnectDevices` (probe) document.
    fn parse_devices(&self, body: &[u8]) -> MTConnectResult<DevicesDocument>;

    /// Decode an `MTConnectStreams` (current / sample) document.
    fn parse_streams(&self, body: &[u8]) -> MTConnectResult<StreamsDocument>;

    /// Decode an `MTConnectAssets` document.
    fn parse_assets(&self, body: &[u8]) -> MTConnectResult<AssetsDocument>;

    /// Decode an `MTConnectError` document.
    fn parse_error(&self, body: &[u8]) -> MTConnectResult<ErrorDocument>;

    /// How streams documents are delimited on a chunked stream.
    fn framing(&self) -> Framing;
}

/// Returns the built-in parser for `format`.
pub fn parser_for(format: DocumentFormat) -> Arc<dyn DocumentParser> {
    match format {
        DocumentFormat::Xml => Arc::new(XmlParser),
        DocumentFormat::Json => Arc::new(JsonParser),
    }
}

/// A start/end marker pair delimiting one document type on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPair {
    /// Text that opens a document (inclusive).
    pub start: String,
    /// Text that closes a document (inclusive).
    pub end: String,
}

impl MarkerPair {
    /// Create a marker pair.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Document delimiting strategy for a chunked stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Documents open with a pair's start marker and close with the same
    /// pair's end marker. The first pair is the expected document, the
    /// second the error document.
    Markers(Vec<MarkerPair>),
    /// Documents are top-level JSON objects, delimited by brace depth.
    JsonObjects,
}

impl Framing {
    /// Markers for an XML sample stream: streams documents and error
    /// documents, both opened by the XML declaration.
    pub fn xml_streams() -> Self {
        Framing::Markers(vec![
            MarkerPair::new(XML_DECLARATION, STREAMS_CLOSE_TAG),
            MarkerPair::new(XML_DECLARATION, ERROR_CLOSE_TAG),
        ])
    }
}
