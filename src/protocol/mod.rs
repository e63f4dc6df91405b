//! Protocol module - wire format, framing, and the frame disambiguator.
//!
//! This module implements the byte-level side of the radio link:
//! - 4-byte header layouts for the text and structured protocols
//! - Fixed-capacity scan ring
//! - Reusable frame buffer with typed accessors
//! - Byte-wise disambiguator splitting the stream into frames
//! - Encoding of outbound endpoint commands and decoding of inbound messages

mod command;
mod disambiguator;
mod frame;
mod ring;
mod wire_format;

pub use command::{
    decode_inbound, encode_response, encode_send_endpoint, encode_set_transmit_size,
    encode_udp_data_event, endpoint_command, event_id, Inbound, INTERFACE_WIFI, MAX_CHUNK_LEN,
    NULL_ENDPOINT, RESULT_OK,
};
pub use disambiguator::{Mpsm, MpsmStats, ProcessStatus, SyncGate};
pub use frame::{build_structured_frame, build_text_frame, Frame, FrameKind};
pub use ring::FixedRing;
pub use wire_format::{
    class, classify_header, message_type, HeaderMatch, StructuredHeader, HEADER_SIZE,
    STRUCTURED_LENGTH_FIELD_MAX, STRUCTURED_MAX_PAYLOAD, TECHNOLOGY_WIFI, TEXT_MAX_PAYLOAD,
    TEXT_SIGNATURE,
};
