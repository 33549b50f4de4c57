//! Incremental document framing for chunked streams.
//!
//! The Agent's sample stream is an unbounded sequence of complete documents
//! whose boundaries are unrelated to the HTTP chunk boundaries. A
//! [`DocumentFramer`] accumulates decoded text and hands back each document
//! once its closing marker has arrived.

use std::ops::Range;

use crate::error::{MTConnectError, MTConnectResult};
use crate::format::{Framing, MarkerPair};

/// Result of scanning the buffer for the next document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// A complete document occupies this byte range.
    Complete(Range<usize>),
    /// A document starts at this offset but has not closed yet.
    Partial(usize),
    /// No document start in the buffer.
    Nothing,
}

/// Finds the next document in `buffer` according to `framing`.
pub fn locate(framing: &Framing, buffer: &str) -> Located {
    match framing {
        Framing::Markers(pairs) => locate_markers(pairs, buffer),
        Framing::JsonObjects => locate_json_object(buffer),
    }
}

/// Earliest start marker wins; among pairs sharing that start, the earliest
/// end marker after it closes the document.
fn locate_markers(pairs: &[MarkerPair], buffer: &str) -> Located {
    let Some(start) = pairs
        .iter()
        .filter(|p| !p.start.is_empty())
        .filter_map(|p| buffer.find(p.start.as_str()))
        .min()
    else {
        return Located::Nothing;
    };

    let end = pairs
        .iter()
        .filter(|p| buffer[start..].starts_with(p.start.as_str()) && !p.end.is_empty())
        .filter_map(|p| {
            let from = start + p.start.len();
            buffer[from..]
                .find(p.end.as_str())
                .map(|offset| from + offset + p.end.len())
        })
        .min();

    match end {
        Some(end) => Located::Complete(start..end),
        None => Located::Partial(start),
    }
}

/// Brace-depth scan of the first top-level object, skipping braces inside
/// string literals.
fn locate_json_object(buffer: &str) -> Located {
    let Some(start) = buffer.find('{') else {
        return Located::Nothing;
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in buffer.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Located::Complete(start..start + offset + 1);
                }
            }
            _ => {}
        }
    }
    Located::Partial(start)
}

/// Accumulates stream text and extracts complete documents.
///
/// Text after the last extracted document is never discarded, whether or not
/// it contains a start marker yet. The retained text is bounded by
/// `max_buffer`; exceeding it fails the connection.
#[derive(Debug)]
pub struct DocumentFramer {
    framing: Framing,
    buffer: String,
    max_buffer: usize,
}

impl DocumentFramer {
    /// Create an empty framer.
    pub fn new(framing: Framing, max_buffer: usize) -> Self {
        Self {
            framing,
            buffer: String::new(),
            max_buffer,
        }
    }

    /// Append `text`, returning every document completed by it, in order.
    ///
    /// # Errors
    ///
    /// Returns [`MTConnectError::FrameTooLarge`] when the text left over after
    /// extraction exceeds the configured limit.
    pub fn feed(&mut self, text: &str) -> MTConnectResult<Vec<String>> {
        self.buffer.push_str(text);

        let mut documents = Vec::new();
        while let Some(document) = self.next_document() {
            documents.push(document);
        }

        if self.buffer.len() > self.max_buffer {
            return Err(MTConnectError::FrameTooLarge {
                size: self.buffer.len(),
                limit: self.max_buffer,
            });
        }
        Ok(documents)
    }

    /// Extract the next complete document, dropping it and everything before
    /// it from the buffer.
    pub fn next_document(&mut self) -> Option<String> {
        match locate(&self.framing, &self.buffer) {
            Located::Complete(range) => {
                let document = self.buffer[range.clone()].to_string();
                self.buffer.drain(..range.end);
                Some(document)
            }
            Located::Partial(_) | Located::Nothing => None,
        }
    }

    /// Bytes of text currently retained.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
