//! Byte-wise frame disambiguator.
//!
//! [`Mpsm`] consumes the radio byte stream one byte at a time and recognises
//! frames of both protocols sharing it. It owns a 4-byte header scan ring and
//! fills a caller-provided [`Frame`]:
//! - `SeekingHeader`: slide each byte through the scan ring until the four
//!   bytes match the text signature or a valid structured header
//! - `ReadingTextLengthByte`: the byte after a text signature is its length
//! - `ReadingTextPayload` / `ReadingStructuredPayload`: collect exactly the
//!   declared number of bytes
//!
//! A mismatch drops only the oldest scanned byte, so a header that starts
//! inside a failed candidate is still found. A frame that stops arriving is
//! discarded once the payload timeout elapses.
//!
//! # Example
//!
//! ```
//! use radiolink::clock::ManualClock;
//! use radiolink::protocol::{Frame, FrameKind, Mpsm};
//! use std::sync::Arc;
//!
//! let mut mpsm = Mpsm::new(Arc::new(ManualClock::new()));
//! let mut frame = Frame::with_capacity(256);
//!
//! let bytes = [0x00, 0xE6, 0xE7, 0xE7, 0xE6, 0x05, b'H', b'e', b'l', b'l', b'o'];
//! let mut seen = Vec::new();
//! mpsm.feed(&mut frame, &bytes, |f| seen.push((f.kind(), f.payload_bytes())));
//!
//! assert_eq!(seen.len(), 1);
//! assert_eq!(seen[0].0, FrameKind::Text);
//! assert_eq!(&seen[0].1[..], b"Hello");
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::frame::{Frame, FrameKind};
use super::ring::FixedRing;
use super::wire_format::{
    classify_header, HeaderMatch, HEADER_SIZE, STRUCTURED_MAX_PAYLOAD, TEXT_MAX_PAYLOAD,
};
use crate::clock::SharedClock;
use crate::config::DEFAULT_PAYLOAD_TIMEOUT_MS;

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingHeader,
    ReadingTextLengthByte,
    ReadingTextPayload { expected: usize },
    ReadingStructuredPayload { expected: usize },
}

/// Result of processing one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Nothing to report yet.
    WaitingForMoreData,
    /// Four scanned bytes matched neither protocol; one was dropped.
    BadHeader,
    /// A declared length exceeded the protocol or buffer limit.
    BadLength,
    /// Structured header rejected because heartbeat sync has not happened.
    PrematureStructured,
    /// Text signature recognised.
    TextHeaderParsed,
    /// Text length byte accepted.
    TextLengthParsed,
    /// Structured header accepted.
    StructuredHeaderParsed,
    /// Payload overflowed the frame after validation; frame dropped.
    PossibleCorruption,
    /// The frame is complete.
    FrameReady(FrameKind),
}

/// Running counters, mainly for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MpsmStats {
    pub frames: u64,
    pub bad_headers: u64,
    pub bad_lengths: u64,
    pub premature: u64,
    pub corruptions: u64,
    pub timeouts: u64,
}

/// Set once the first fully valid heartbeat arrives.
///
/// Shared between the disambiguator (reader) and the router (writer).
#[derive(Debug, Clone, Default)]
pub struct SyncGate(Arc<AtomicBool>);

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Frame disambiguator (message parsing state machine).
pub struct Mpsm {
    state: State,
    scan: FixedRing<u8>,
    /// Clock reading when the current header completed.
    header_completed_ms: u64,
    payload_timeout_ms: u64,
    clock: SharedClock,
    sync: Option<SyncGate>,
    stats: MpsmStats,
}

impl Mpsm {
    /// Create a disambiguator with the default payload timeout.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: State::SeekingHeader,
            scan: FixedRing::with_capacity(HEADER_SIZE),
            header_completed_ms: 0,
            payload_timeout_ms: DEFAULT_PAYLOAD_TIMEOUT_MS,
            clock,
            sync: None,
            stats: MpsmStats::default(),
        }
    }

    /// Set the in-progress frame timeout.
    pub fn with_payload_timeout(mut self, timeout_ms: u64) -> Self {
        self.payload_timeout_ms = timeout_ms;
        self
    }

    /// Reject non-endpoint structured headers until `gate` is marked synced.
    pub fn with_sync_gate(mut self, gate: SyncGate) -> Self {
        self.sync = Some(gate);
        self
    }

    #[inline]
    pub fn stats(&self) -> MpsmStats {
        self.stats
    }

    /// True when no frame is in progress.
    #[inline]
    pub fn is_seeking_header(&self) -> bool {
        self.state == State::SeekingHeader
    }

    /// Bytes currently held in the header scan ring.
    #[inline]
    pub fn scanned_len(&self) -> usize {
        self.scan.len()
    }

    /// Drop all in-progress state.
    pub fn reset(&mut self, frame: &mut Frame) {
        self.state = State::SeekingHeader;
        self.scan.clear();
        frame.reset();
    }

    /// Process one byte.
    ///
    /// On `FrameReady` the frame holds the complete payload until the caller
    /// resets it; on `PossibleCorruption` it has already been reset.
    pub fn process(&mut self, frame: &mut Frame, byte: u8) -> ProcessStatus {
        if self.state != State::SeekingHeader {
            let elapsed = self.clock.now_ms().saturating_sub(self.header_completed_ms);
            if elapsed > self.payload_timeout_ms {
                tracing::debug!(
                    "Discarding {:?} frame after {} ms without completion",
                    frame.kind(),
                    elapsed
                );
                self.stats.timeouts += 1;
                self.reset(frame);
            }
        }

        match self.state {
            State::SeekingHeader => self.seek_header(frame, byte),
            State::ReadingTextLengthByte => self.read_text_length(frame, byte),
            State::ReadingTextPayload { expected }
            | State::ReadingStructuredPayload { expected } => {
                self.read_payload(frame, byte, expected)
            }
        }
    }

    /// Process a chunk, calling `on_frame` for each completed frame.
    ///
    /// Produces the same frames as calling [`process`](Self::process) byte by
    /// byte. The frame is reset after each callback.
    pub fn feed<F>(&mut self, frame: &mut Frame, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(&Frame),
    {
        for &byte in chunk {
            match self.process(frame, byte) {
                ProcessStatus::FrameReady(_) => {
                    on_frame(frame);
                    frame.reset();
                }
                ProcessStatus::PossibleCorruption => {
                    tracing::warn!("Possible corruption in frame payload, frame dropped");
                }
                _ => {}
            }
        }
    }

    fn seek_header(&mut self, frame: &mut Frame, byte: u8) -> ProcessStatus {
        if self.scan.is_full() {
            self.scan.dequeue();
        }
        // Cannot fail: a slot was just freed.
        let _ = self.scan.enqueue(byte);

        if !self.scan.is_full() {
            return ProcessStatus::WaitingForMoreData;
        }

        let mut header = [0u8; HEADER_SIZE];
        self.scan.straighten_into(&mut header);

        match classify_header(&header) {
            HeaderMatch::Text => {
                frame.begin(FrameKind::Text, header);
                self.scan.clear();
                self.header_completed_ms = self.clock.now_ms();
                self.state = State::ReadingTextLengthByte;
                ProcessStatus::TextHeaderParsed
            }
            HeaderMatch::Structured(parsed) => {
                let expected = parsed.payload_len();
                if expected > STRUCTURED_MAX_PAYLOAD || expected > frame.capacity() {
                    self.stats.bad_lengths += 1;
                    return ProcessStatus::BadLength;
                }
                let synced = self.sync.as_ref().map_or(true, SyncGate::is_synced);
                if !synced && !parsed.is_endpoint_class() {
                    self.stats.premature += 1;
                    self.scan.dequeue();
                    return ProcessStatus::PrematureStructured;
                }

                frame.begin(FrameKind::Structured, header);
                self.scan.clear();
                self.header_completed_ms = self.clock.now_ms();
                if expected == 0 {
                    self.stats.frames += 1;
                    return ProcessStatus::FrameReady(FrameKind::Structured);
                }
                self.state = State::ReadingStructuredPayload { expected };
                ProcessStatus::StructuredHeaderParsed
            }
            HeaderMatch::None => {
                self.scan.dequeue();
                self.stats.bad_headers += 1;
                ProcessStatus::BadHeader
            }
        }
    }

    fn read_text_length(&mut self, frame: &mut Frame, byte: u8) -> ProcessStatus {
        let expected = byte as usize;
        if expected > TEXT_MAX_PAYLOAD || expected > frame.capacity() {
            // Protocols share no header bytes, so a bad length byte can only
            // be the first byte of the next header.
            self.stats.bad_lengths += 1;
            self.state = State::SeekingHeader;
            frame.reset();
            self.scan.clear();
            let _ = self.scan.enqueue(byte);
            return ProcessStatus::BadLength;
        }
        if expected == 0 {
            self.state = State::SeekingHeader;
            self.stats.frames += 1;
            return ProcessStatus::FrameReady(FrameKind::Text);
        }
        self.state = State::ReadingTextPayload { expected };
        ProcessStatus::TextLengthParsed
    }

    fn read_payload(&mut self, frame: &mut Frame, byte: u8, expected: usize) -> ProcessStatus {
        if !frame.push(byte) {
            self.stats.corruptions += 1;
            self.reset(frame);
            return ProcessStatus::PossibleCorruption;
        }
        if frame.len() == expected {
            self.state = State::SeekingHeader;
            self.stats.frames += 1;
            return ProcessStatus::FrameReady(frame.kind());
        }
        ProcessStatus::WaitingForMoreData
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::SeekingHeader => "SeekingHeader",
            State::ReadingTextLengthByte => "ReadingTextLengthByte",
            State::ReadingTextPayload { .. } => "ReadingTextPayload",
            State::ReadingStructuredPayload { .. } => "ReadingStructuredPayload",
        }
    }

    #[cfg(test)]
    fn force_state(&mut self, frame: &mut Frame, kind: FrameKind, expected: usize) {
        frame.begin(kind, [0; HEADER_SIZE]);
        self.header_completed_ms = self.clock.now_ms();
        self.state = match kind {
            FrameKind::Text => State::ReadingTextPayload { expected },
            _ => State::ReadingStructuredPayload { expected },
        };
    }
}
