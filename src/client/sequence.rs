//! Tracking of the client's position in the Agent's sequence space.
//!
//! Every observation an Agent records gets a sequence number; the Agent keeps
//! a bounded buffer `[first_sequence, next_sequence)` of them and changes its
//! `instance_id` whenever it restarts and loses that buffer. The
//! [`SequenceTracker`] decides where the next `sample` request starts so that
//! a reconnect neither replays data from a previous Agent instance nor asks
//! for data the Agent has already discarded.

use chrono::{DateTime, Utc};

use crate::types::{Header, ObservationBatch, StreamsDocument};

/// The client's view of the Agent's sequence space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Instance id of the Agent the sequence refers to (0 = unknown).
    pub last_instance_id: u64,
    /// Last sequence position (0 = start of the Agent's buffer).
    pub last_sequence: u64,
    /// Time of the last successful exchange.
    pub last_response_at: Option<DateTime<Utc>>,
    /// Whether a streaming connection is currently open.
    pub stream_active: bool,
}

/// Where the first exchange of a session positions the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Only new data: start at the snapshot's `next_sequence`.
    #[default]
    Latest,
    /// Replay everything the Agent still retains.
    Buffer,
    /// Resume from a known position of a known Agent instance.
    Sequence {
        /// Instance the sequence belongs to.
        instance_id: u64,
        /// First sequence wanted.
        sequence: u64,
    },
}

/// Outcome of checking a streamed document's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCheck {
    /// Same Agent instance; keep going.
    Continue,
    /// The Agent restarted. The sequence has been reset and the session must
    /// resynchronize.
    InstanceChanged {
        /// Instance id before the change.
        previous: u64,
        /// New instance id.
        current: u64,
    },
}

/// Holds [`SyncState`] and applies the seeding and advancing rules.
///
/// Owned by a single worker; no internal locking.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    state: SyncState,
    start: StartPosition,
    seeded: bool,
    /// `last_sequence` has not been delivered yet, so `from` includes it.
    inclusive: bool,
    first_sequence: u64,
}

impl SequenceTracker {
    /// A tracker starting at the Agent's newest data.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker whose first exchange seeds from `start`.
    pub fn with_start(start: StartPosition) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// Current state.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Whether a snapshot has seeded the tracker yet.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Zero the state. The next snapshot seeds again using `start`.
    pub fn reset(&mut self) {
        let start = self.start;
        *self = Self::with_start(start);
    }

    /// Change the start position for the next seeding and forget the
    /// current position.
    pub fn restart_from(&mut self, start: StartPosition) {
        self.start = start;
        self.reset();
    }

    /// Apply a snapshot (`current`) header.
    ///
    /// Order: first-exchange seed, then instance check, then range check.
    pub fn seed_from_snapshot(&mut self, header: &Header) {
        if !self.seeded {
            match self.start {
                StartPosition::Latest => self.state.last_sequence = header.next_sequence,
                StartPosition::Buffer => self.state.last_sequence = header.first_sequence,
                StartPosition::Sequence {
                    instance_id,
                    sequence,
                } => {
                    self.state.last_instance_id = instance_id;
                    self.state.last_sequence = sequence;
                }
            }
            self.inclusive = true;
            self.seeded = true;
        }

        if self.state.last_instance_id != 0 && self.state.last_instance_id != header.instance_id {
            tracing::info!(
                previous = self.state.last_instance_id,
                current = header.instance_id,
                "agent instance changed, resetting sequence"
            );
            self.state.last_sequence = 0;
        }
        self.state.last_instance_id = header.instance_id;
        self.check_range(header);
    }

    /// Apply the header of a streamed or polled document.
    ///
    /// On an instance change the sequence is reset to 0 and the new instance
    /// adopted; the caller must resynchronize before using the document.
    pub fn observe_header(&mut self, header: &Header) -> HeaderCheck {
        let previous = self.state.last_instance_id;
        if previous != 0 && previous != header.instance_id {
            tracing::info!(previous, current = header.instance_id, "agent restarted mid-stream");
            self.state.last_sequence = 0;
            self.state.last_instance_id = header.instance_id;
            self.inclusive = true;
            self.first_sequence = header.first_sequence;
            return HeaderCheck::InstanceChanged {
                previous,
                current: header.instance_id,
            };
        }
        self.state.last_instance_id = header.instance_id;
        self.check_range(header);
        HeaderCheck::Continue
    }

    /// Move `last_sequence` to the highest sequence in `batch`, never
    /// backwards. Returns the new `last_sequence`.
    pub fn advance(&mut self, batch: &ObservationBatch) -> u64 {
        if let Some(max) = batch.max_sequence() {
            if max >= self.state.last_sequence {
                self.state.last_sequence = max;
                self.inclusive = false;
            }
        }
        self.state.last_sequence
    }

    /// [`advance`](Self::advance) over every device batch of a document.
    pub fn advance_document(&mut self, document: &StreamsDocument) -> u64 {
        for batch in &document.streams {
            self.advance(batch);
        }
        self.state.last_sequence
    }

    /// Record a successful exchange.
    pub fn record_response(&mut self, at: DateTime<Utc>) {
        self.state.last_response_at = Some(at);
    }

    /// Mark the streaming connection as open or closed.
    pub fn set_stream_active(&mut self, active: bool) {
        self.state.stream_active = active;
    }

    /// The `from` parameter of the next `sample` request.
    ///
    /// After a reset this is the first sequence the Agent still retains;
    /// after delivered data it is the sequence following the last one seen.
    pub fn next_from(&self) -> Option<u64> {
        match self.state.last_sequence {
            0 if self.first_sequence > 0 => Some(self.first_sequence),
            0 => None,
            last if self.inclusive => Some(last),
            last => Some(last + 1),
        }
    }

    fn check_range(&mut self, header: &Header) {
        self.first_sequence = header.first_sequence;
        if self.state.last_sequence != 0 && !header.contains(self.state.last_sequence) {
            tracing::warn!(
                last_sequence = self.state.last_sequence,
                first_sequence = header.first_sequence,
                next_sequence = header.next_sequence,
                "sequence outside agent buffer, resetting"
            );
            self.state.last_sequence = 0;
            self.inclusive = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceStream, Observation};

    fn header(instance_id: u64, first: u64, next: u64) -> Header {
        Header {
            instance_id,
            first_sequence: first,
            next_sequence: next,
            last_sequence: next.saturating_sub(1),
            ..Default::default()
        }
    }

    fn batch(sequences: &[u64]) -> ObservationBatch {
        DeviceStream {
            name: "mill".to_string(),
            uuid: None,
            observations: sequences
                .iter()
                .map(|&sequence| Observation {
                    sequence,
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn first_snapshot_seeds_next_sequence() {
        let mut tracker = SequenceTracker::new();
        tracker.seed_from_snapshot(&header(7, 1, 101));
        assert_eq!(tracker.state().last_sequence, 101);
        assert_eq!(tracker.state().last_instance_id, 7);
        assert_eq!(tracker.next_from(), Some(101));
    }

    #[test]
    fn buffer_start_seeds_first_sequence() {
        let mut tracker = SequenceTracker::with_start(StartPosition::Buffer);
        tracker.seed_from_snapshot(&header(7, 40, 101));
        assert_eq!(tracker.state().last_sequence, 40);
        assert_eq!(tracker.next_from(), Some(40));
    }

    #[test]
    fn explicit_start_for_other_instance_is_discarded() {
        let mut tracker = SequenceTracker::with_start(StartPosition::Sequence {
            instance_id: 3,
            sequence: 90,
        });
        tracker.seed_from_snapshot(&header(4, 1, 101));
        assert_eq!(tracker.state().last_sequence, 0);
        assert_eq!(tracker.state().last_instance_id, 4);
        assert_eq!(tracker.next_from(), Some(1));
    }

    #[test]
    fn advance_after_seed_excludes_delivered_sequence() {
        let mut tracker = SequenceTracker::new();
        tracker.seed_from_snapshot(&header(7, 1, 101));
        tracker.advance(&batch(&[101, 102]));
        assert_eq!(tracker.next_from(), Some(103));
    }

    #[test]
    fn mid_stream_restart_resets_to_new_buffer_start() {
        let mut tracker = SequenceTracker::new();
        tracker.seed_from_snapshot(&header(7, 1, 101));
        tracker.advance(&batch(&[150]));
        let check = tracker.observe_header(&header(8, 1, 20));
        assert_eq!(
            check,
            HeaderCheck::InstanceChanged {
                previous: 7,
                current: 8
            }
        );
        assert_eq!(tracker.state().last_sequence, 0);
        assert_eq!(tracker.next_from(), Some(1));
        assert_eq!(tracker.observe_header(&header(8, 1, 25)), HeaderCheck::Continue);
    }

    #[test]
    fn reset_keeps_start_position() {
        let mut tracker = SequenceTracker::with_start(StartPosition::Buffer);
        tracker.seed_from_snapshot(&header(7, 5, 101));
        tracker.reset();
        assert_eq!(*tracker.state(), SyncState::default());
        assert!(!tracker.is_seeded());
        tracker.seed_from_snapshot(&header(7, 6, 102));
        assert_eq!(tracker.state().last_sequence, 6);
    }
}
