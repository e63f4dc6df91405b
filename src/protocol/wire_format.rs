//! Wire format of the two protocols sharing the radio byte stream.
//!
//! Text (direct message) frames:
//! ```text
//! ┌─────────────┬────────┬──────────────┐
//! │ E6 E7 E7 E6 │ len N  │ N bytes      │
//! │ 4 bytes     │ 1 byte │ (N <= 250)   │
//! └─────────────┴────────┴──────────────┘
//! ```
//!
//! Structured frames:
//! ```text
//! ┌──────────────────────────────┬──────────┬──────────┬──────────┐
//! │ type:1 | tech:4 | len_hi:3   │ len_lo   │ class id │ cmd id   │
//! │ byte 0                       │ byte 1   │ byte 2   │ byte 3   │
//! └──────────────────────────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! The text signature bytes never appear in a valid structured header, so a
//! byte that fails one signature can still start the other.

/// Length of both protocol headers.
pub const HEADER_SIZE: usize = 4;

/// Fixed text-protocol signature.
pub const TEXT_SIGNATURE: [u8; HEADER_SIZE] = [0xE6, 0xE7, 0xE7, 0xE6];

/// Largest text payload (255 minus signature minus length byte).
pub const TEXT_MAX_PAYLOAD: usize = 255 - HEADER_SIZE - 1;

/// Largest structured payload accepted by the disambiguator.
pub const STRUCTURED_MAX_PAYLOAD: usize = 1024;

/// Largest value the 11-bit structured length field can carry.
pub const STRUCTURED_LENGTH_FIELD_MAX: usize = 0x07FF;

/// Technology type carried by every header this link accepts.
pub const TECHNOLOGY_WIFI: u8 = 1;

/// Message type field values.
pub mod message_type {
    /// Command (outbound) or response (inbound).
    pub const COMMAND_RESPONSE: u8 = 0;
    /// Unsolicited event.
    pub const EVENT: u8 = 1;
}

/// Command class identifiers.
pub mod class {
    pub const SYSTEM: u8 = 0;
    pub const CONFIGURATION: u8 = 1;
    pub const WIFI: u8 = 2;
    pub const TCP_STACK: u8 = 3;
    pub const ENDPOINT: u8 = 4;
    pub const HARDWARE: u8 = 5;
    pub const PERSISTENT_STORE: u8 = 6;
    pub const I2C: u8 = 7;
    pub const WIRED_ETHERNET: u8 = 8;

    /// Highest class id a valid header may carry.
    pub const MAX: u8 = WIRED_ETHERNET;
}

/// Decoded structured-protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuredHeader {
    /// `message_type::COMMAND_RESPONSE` or `message_type::EVENT` when valid.
    pub message_type: u8,
    /// 4-bit technology field.
    pub technology: u8,
    /// Declared payload length (11 bits).
    pub payload_length: u16,
    /// Command class.
    pub class_id: u8,
    /// Command or event id within the class.
    pub command_id: u8,
}

impl StructuredHeader {
    /// Header for an outbound command.
    pub fn command(class_id: u8, command_id: u8, payload_length: u16) -> Self {
        Self {
            message_type: message_type::COMMAND_RESPONSE,
            technology: TECHNOLOGY_WIFI,
            payload_length,
            class_id,
            command_id,
        }
    }

    /// Header for an event (used by radio simulators and tests).
    pub fn event(class_id: u8, command_id: u8, payload_length: u16) -> Self {
        Self {
            message_type: message_type::EVENT,
            ..Self::command(class_id, command_id, payload_length)
        }
    }

    /// Decode the four header bytes. Any bit pattern decodes.
    #[inline]
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        let length_high = (buf[0] & 0x07) as u16;
        Self {
            message_type: buf[0] >> 7,
            technology: (buf[0] >> 3) & 0x0F,
            payload_length: buf[1] as u16 + (length_high << 8),
            class_id: buf[2],
            command_id: buf[3],
        }
    }

    /// Encode to the four header bytes.
    ///
    /// Bits above the 11-bit length field are dropped.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let length_high = ((self.payload_length >> 8) & 0x07) as u8;
        [
            ((self.message_type & 0x01) << 7) | ((self.technology & 0x0F) << 3) | length_high,
            (self.payload_length & 0xFF) as u8,
            self.class_id,
            self.command_id,
        ]
    }

    /// Field-level validity: Wi-Fi technology, a known message type and a
    /// bounded class id. Length is checked separately against buffer limits.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.technology == TECHNOLOGY_WIFI
            && (self.message_type == message_type::COMMAND_RESPONSE
                || self.message_type == message_type::EVENT)
            && self.class_id <= class::MAX
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload_length as usize
    }

    #[inline]
    pub fn is_event(&self) -> bool {
        self.message_type == message_type::EVENT
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.message_type == message_type::COMMAND_RESPONSE
    }

    /// Endpoint-class traffic is accepted before heartbeat sync.
    #[inline]
    pub fn is_endpoint_class(&self) -> bool {
        self.class_id == class::ENDPOINT
    }
}

/// Classification of four candidate header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    /// Exact match against the text signature.
    Text,
    /// Field predicates of the structured header hold.
    Structured(StructuredHeader),
    /// Neither.
    None,
}

/// Match four header bytes against both protocols.
pub fn classify_header(buf: &[u8; HEADER_SIZE]) -> HeaderMatch {
    if *buf == TEXT_SIGNATURE {
        return HeaderMatch::Text;
    }
    let header = StructuredHeader::decode(buf);
    if header.is_valid() {
        HeaderMatch::Structured(header)
    } else {
        HeaderMatch::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_max_payload() {
        assert_eq!(TEXT_MAX_PAYLOAD, 250);
        assert_eq!(HEADER_SIZE, 4);
    }

    #[test]
    fn test_header_bit_layout() {
        // event, wifi, length 0x123, endpoint class, id 1
        let header = StructuredHeader::event(class::ENDPOINT, 1, 0x123);
        let bytes = header.encode();

        assert_eq!(bytes[0], 0b1000_1001);
        assert_eq!(bytes[1], 0x23);
        assert_eq!(bytes[2], 4);
        assert_eq!(bytes[3], 1);

        let decoded = StructuredHeader::decode(&bytes);
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_len(), 0x123);
    }

    #[test]
    fn test_command_header_fields() {
        let header = StructuredHeader::command(class::ENDPOINT, 5, 3);
        assert_eq!(header.encode(), [0x08, 0x03, 0x04, 0x05]);
        assert!(header.is_response());
        assert!(!header.is_event());
        assert!(header.is_valid());
    }

    #[test]
    fn test_length_uses_eleven_bits() {
        let bytes = [0x0F, 0xFF, 0x00, 0x00];
        let header = StructuredHeader::decode(&bytes);
        assert_eq!(header.technology, TECHNOLOGY_WIFI);
        assert_eq!(header.payload_len(), STRUCTURED_LENGTH_FIELD_MAX);
    }

    #[test]
    fn test_invalid_technology() {
        // technology 2
        let header = StructuredHeader::decode(&[0x10, 0x00, 0x00, 0x00]);
        assert!(!header.is_valid());
    }

    #[test]
    fn test_class_id_bound() {
        let mut bytes = StructuredHeader::command(class::MAX, 0, 0).encode();
        assert!(StructuredHeader::decode(&bytes).is_valid());

        bytes[2] = class::MAX + 1;
        assert!(!StructuredHeader::decode(&bytes).is_valid());
    }

    #[test]
    fn test_classify_header() {
        assert_eq!(classify_header(&TEXT_SIGNATURE), HeaderMatch::Text);

        let bytes = StructuredHeader::event(class::WIFI, 22, 2).encode();
        assert!(matches!(classify_header(&bytes), HeaderMatch::Structured(h) if h.command_id == 22));

        assert_eq!(classify_header(&[0xFF, 0xFF, 0xFF, 0xFF]), HeaderMatch::None);
    }

    #[test]
    fn test_signature_bytes_never_form_structured_header() {
        // 0xE6 / 0xE7 carry technology 0xC, never Wi-Fi
        for b in [0xE6u8, 0xE7] {
            let header = StructuredHeader::decode(&[b, 0, 0, 0]);
            assert!(!header.is_valid());
        }
    }
}
