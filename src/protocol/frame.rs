//! Frame buffer shared by the disambiguator and listeners.
//!
//! A [`Frame`] is allocated once by the Rx pump and reused for every frame:
//! the disambiguator fills it byte by byte, listeners borrow it for one
//! dispatch, and the pump resets it. Listeners that need the payload longer
//! copy it out with [`Frame::payload_bytes`].
//!
//! # Example
//!
//! ```
//! use radiolink::protocol::{build_text_frame, Frame, FrameKind, Mpsm, ProcessStatus};
//! use radiolink::clock::ManualClock;
//! use std::sync::Arc;
//!
//! let mut mpsm = Mpsm::new(Arc::new(ManualClock::new()));
//! let mut frame = Frame::with_capacity(256);
//!
//! let mut last = ProcessStatus::WaitingForMoreData;
//! for b in build_text_frame(b"Hello").unwrap() {
//!     last = mpsm.process(&mut frame, b);
//! }
//! assert_eq!(last, ProcessStatus::FrameReady(FrameKind::Text));
//! assert_eq!(frame.payload(), b"Hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    StructuredHeader, HEADER_SIZE, STRUCTURED_LENGTH_FIELD_MAX, TEXT_MAX_PAYLOAD, TEXT_SIGNATURE,
};
use crate::error::{LinkError, Result};

/// Which protocol a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Binary command / response / event frame.
    Structured,
    /// Direct message frame.
    Text,
    /// No header recognised yet, or the frame was reset.
    Invalid,
}

/// A single reusable frame: tag, header bytes and bounded payload.
#[derive(Debug)]
pub struct Frame {
    kind: FrameKind,
    header: [u8; HEADER_SIZE],
    payload: BytesMut,
    capacity: usize,
}

impl Frame {
    /// Create an empty frame whose payload can hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            kind: FrameKind::Invalid,
            header: [0; HEADER_SIZE],
            payload: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Raw header bytes as received.
    #[inline]
    pub fn header(&self) -> &[u8; HEADER_SIZE] {
        &self.header
    }

    /// Decoded header, for structured frames only.
    pub fn structured_header(&self) -> Option<StructuredHeader> {
        match self.kind {
            FrameKind::Structured => Some(StructuredHeader::decode(&self.header)),
            _ => None,
        }
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Copy the payload out so it can outlive this dispatch.
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.payload)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Maximum payload length.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start a new frame of `kind`, discarding any payload.
    pub(crate) fn begin(&mut self, kind: FrameKind, header: [u8; HEADER_SIZE]) {
        self.kind = kind;
        self.header = header;
        self.payload.clear();
    }

    /// Append one payload byte. Returns `false` when the frame is full.
    pub(crate) fn push(&mut self, byte: u8) -> bool {
        if self.payload.len() + 1 > self.capacity {
            return false;
        }
        self.payload.put_u8(byte);
        true
    }

    /// Clear tag, header and payload.
    pub fn reset(&mut self) {
        self.kind = FrameKind::Invalid;
        self.header = [0; HEADER_SIZE];
        self.payload.clear();
    }
}

/// Build a complete text frame.
///
/// The payload must not contain the signature byte values; that is a sender
/// constraint and is not checked here.
pub fn build_text_frame(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > TEXT_MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge {
            len: payload.len(),
            max: TEXT_MAX_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 1 + payload.len());
    buf.put_slice(&TEXT_SIGNATURE);
    buf.put_u8(payload.len() as u8);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Build a complete structured frame, overriding the header's length field
/// with the actual payload length.
pub fn build_structured_frame(header: StructuredHeader, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > STRUCTURED_LENGTH_FIELD_MAX {
        return Err(LinkError::PayloadTooLarge {
            len: payload.len(),
            max: STRUCTURED_LENGTH_FIELD_MAX,
        });
    }
    let header = StructuredHeader {
        payload_length: payload.len() as u16,
        ..header
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    Ok(buf.freeze())
}
