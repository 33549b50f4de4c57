//! Reading framed documents from a long-lived streaming response.

use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt;

use super::framer::DocumentFramer;
use super::transport::ByteStream;
use crate::error::{MTConnectError, MTConnectResult};
use crate::format::Framing;
use crate::utils::constants::MAX_CHUNK_SIZE;

/// Incremental UTF-8 decoding that carries an incomplete multi-byte sequence
/// over to the next chunk instead of failing on it.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `chunk` (prefixed by any carried-over bytes). Invalid sequences
    /// are replaced with U+FFFD.
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Bytes waiting for the rest of their character.
    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Pulls complete documents out of one streaming connection.
///
/// Each chunk read races the watchdog; any chunk, heartbeat included, rearms
/// it. Chunks are decoded and framed at most [`MAX_CHUNK_SIZE`] bytes at a
/// time. The reader is single-use: a reconnect builds a new one, discarding the
/// unconsumed text of the old connection.
pub struct StreamReader {
    body: ByteStream,
    framer: DocumentFramer,
    decoder: Utf8Decoder,
    watchdog: Duration,
    chunk_size: usize,
    ready: VecDeque<String>,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("framer", &self.framer)
            .field("watchdog", &self.watchdog)
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl StreamReader {
    /// Wrap an accepted streaming body.
    pub fn new(body: ByteStream, framing: Framing, max_frame_size: usize, watchdog: Duration) -> Self {
        Self {
            body,
            framer: DocumentFramer::new(framing, max_frame_size),
            decoder: Utf8Decoder::default(),
            watchdog,
            chunk_size: MAX_CHUNK_SIZE,
            ready: VecDeque::new(),
        }
    }

    /// Wait for the next complete document.
    ///
    /// Returns `None` when the Agent closes the stream.
    ///
    /// # Errors
    ///
    /// [`MTConnectError::Timeout`] if no chunk arrives within the watchdog
    /// interval, [`MTConnectError::FrameTooLarge`] if an unclosed document
    /// outgrows the frame limit, or the transport's error for a broken read.
    pub async fn next_document(&mut self) -> Option<MTConnectResult<String>> {
        loop {
            if let Some(document) = self.ready.pop_front() {
                return Some(Ok(document));
            }

            let chunk = match tokio::time::timeout(self.watchdog, self.body.next()).await {
                Err(_) => {
                    return Some(Err(MTConnectError::Timeout(format!(
                        "no data on stream for {:?}",
                        self.watchdog
                    ))))
                }
                Ok(None) => {
                    tracing::debug!(buffered = self.framer.buffered_len(), "stream closed by agent");
                    return None;
                }
                Ok(Some(Err(e))) => return Some(Err(e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if let Err(e) = self.feed(&chunk) {
                return Some(Err(e));
            }
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> MTConnectResult<()> {
        for slice in chunk.chunks(self.chunk_size) {
            let text = self.decoder.decode(slice);
            let documents = self.framer.feed(&text)?;
            self.ready.extend(documents);
        }
        Ok(())
    }
}
