//! Protocol constants shared by the parsers and the client engine.

/// Value an Agent reports when a data item has no value.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Element name of asset change observations.
pub const ASSET_CHANGED: &str = "AssetChanged";

/// Element name of asset removal observations.
pub const ASSET_REMOVED: &str = "AssetRemoved";

/// Declaration that opens every XML document on a stream.
pub const XML_DECLARATION: &str = "<?xml";

/// Closing tag of a streams document.
pub const STREAMS_CLOSE_TAG: &str = "</MTConnectStreams>";

/// Closing tag of an error document.
pub const ERROR_CLOSE_TAG: &str = "</MTConnectError>";

/// Default upper bound on text buffered while waiting for a document to
/// complete (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Largest slice of a received chunk decoded and framed at a time (1 MiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;
