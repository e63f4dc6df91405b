//! Structured commands sent to the radio and the inbound messages the link
//! reacts to.
//!
//! Only the endpoint commands used for downlink are encoded here. Inbound
//! frames are decoded into [`Inbound`]; anything the link does not consume is
//! kept as `OtherResponse` / `OtherEvent` so listeners can still see it.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::build_structured_frame;
use super::wire_format::{class, StructuredHeader};
use crate::error::{LinkError, Result};

/// Routing endpoint meaning "nowhere".
pub const NULL_ENDPOINT: u8 = 31;

/// Largest data chunk carried by one send command.
pub const MAX_CHUNK_LEN: usize = 255;

/// Result code for a successful command.
pub const RESULT_OK: u16 = 0;

/// Hardware interface id of the Wi-Fi radio in signal quality events.
pub const INTERFACE_WIFI: u8 = 0;

/// Endpoint class command ids.
pub mod endpoint_command {
    /// Send data to an endpoint.
    pub const SEND: u8 = 0x00;
    /// Announce the size of the next UDP datagram.
    pub const SET_TRANSMIT_SIZE: u8 = 0x05;
}

/// Event ids consumed by the link.
pub mod event_id {
    /// Endpoint class: the radio could not parse our command.
    pub const ENDPOINT_SYNTAX_ERROR: u8 = 0x04;
    /// Wi-Fi class: signal quality report.
    pub const SIGNAL_QUALITY: u8 = 0x16;
    /// TCP stack class: UDP datagram received.
    pub const UDP_DATA: u8 = 0x05;
}

/// Encode a send-data command for one chunk.
pub fn encode_send_endpoint(endpoint: u8, data: &[u8]) -> Result<Bytes> {
    if data.len() > MAX_CHUNK_LEN {
        return Err(LinkError::PayloadTooLarge {
            len: data.len(),
            max: MAX_CHUNK_LEN,
        });
    }
    let mut payload = BytesMut::with_capacity(2 + data.len());
    payload.put_u8(endpoint);
    payload.put_u8(data.len() as u8);
    payload.put_slice(data);
    build_structured_frame(
        StructuredHeader::command(class::ENDPOINT, endpoint_command::SEND, 0),
        &payload,
    )
}

/// Encode a set-transmit-size command.
pub fn encode_set_transmit_size(endpoint: u8, size: u16) -> Result<Bytes> {
    let mut payload = [0u8; 3];
    payload[0] = endpoint;
    payload[1..3].copy_from_slice(&size.to_le_bytes());
    build_structured_frame(
        StructuredHeader::command(class::ENDPOINT, endpoint_command::SET_TRANSMIT_SIZE, 0),
        &payload,
    )
}

/// Inbound structured message, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Response to a send-data command.
    SendEndpointResponse { result: u16, endpoint: u8 },
    /// Response to a set-transmit-size command.
    SetTransmitSizeResponse { result: u16, endpoint: u8 },
    /// Response to any other command.
    OtherResponse { class_id: u8, command_id: u8 },
    /// The radio rejected bytes we sent.
    EndpointSyntaxError { result: u16, endpoint: u8 },
    /// Signal strength report.
    SignalQuality { rssi: i8, interface: u8 },
    /// UDP datagram from the ground.
    UdpData {
        endpoint: u8,
        source: [u8; 4],
        port: u16,
        data: Bytes,
    },
    /// Any other event.
    OtherEvent { class_id: u8, event_id: u8 },
}

fn require(payload: &[u8], len: usize, what: &str) -> Result<()> {
    if payload.len() < len {
        return Err(LinkError::Protocol(format!(
            "{what} payload too short: {} < {len}",
            payload.len()
        )));
    }
    Ok(())
}

fn result_and_endpoint(payload: &[u8], what: &str) -> Result<(u16, u8)> {
    require(payload, 3, what)?;
    Ok((u16::from_le_bytes([payload[0], payload[1]]), payload[2]))
}

/// Decode a complete structured frame.
pub fn decode_inbound(header: &StructuredHeader, payload: &[u8]) -> Result<Inbound> {
    if header.is_response() {
        return match (header.class_id, header.command_id) {
            (class::ENDPOINT, endpoint_command::SEND) => {
                let (result, endpoint) = result_and_endpoint(payload, "send response")?;
                Ok(Inbound::SendEndpointResponse { result, endpoint })
            }
            (class::ENDPOINT, endpoint_command::SET_TRANSMIT_SIZE) => {
                let (result, endpoint) = result_and_endpoint(payload, "transmit size response")?;
                Ok(Inbound::SetTransmitSizeResponse { result, endpoint })
            }
            (class_id, command_id) => Ok(Inbound::OtherResponse {
                class_id,
                command_id,
            }),
        };
    }

    match (header.class_id, header.command_id) {
        (class::ENDPOINT, event_id::ENDPOINT_SYNTAX_ERROR) => {
            let (result, endpoint) = result_and_endpoint(payload, "syntax error event")?;
            Ok(Inbound::EndpointSyntaxError { result, endpoint })
        }
        (class::WIFI, event_id::SIGNAL_QUALITY) => {
            require(payload, 2, "signal quality event")?;
            Ok(Inbound::SignalQuality {
                rssi: payload[0] as i8,
                interface: payload[1],
            })
        }
        (class::TCP_STACK, event_id::UDP_DATA) => {
            require(payload, 9, "udp data event")?;
            let data_len = u16::from_le_bytes([payload[7], payload[8]]) as usize;
            require(payload, 9 + data_len, "udp data event")?;
            Ok(Inbound::UdpData {
                endpoint: payload[0],
                source: [payload[1], payload[2], payload[3], payload[4]],
                port: u16::from_le_bytes([payload[5], payload[6]]),
                data: Bytes::copy_from_slice(&payload[9..9 + data_len]),
            })
        }
        (class_id, event_id) => Ok(Inbound::OtherEvent { class_id, event_id }),
    }
}

/// Encode a UDP data event as the radio would send it.
///
/// Used by radio simulators and tests.
pub fn encode_udp_data_event(endpoint: u8, source: [u8; 4], port: u16, data: &[u8]) -> Result<Bytes> {
    let mut payload = BytesMut::with_capacity(9 + data.len());
    payload.put_u8(endpoint);
    payload.put_slice(&source);
    payload.put_u16_le(port);
    payload.put_u16_le(data.len() as u16);
    payload.put_slice(data);
    build_structured_frame(
        StructuredHeader::event(class::TCP_STACK, event_id::UDP_DATA, 0),
        &payload,
    )
}

/// Encode a command response as the radio would send it.
pub fn encode_response(command_id: u8, result: u16, endpoint: u8) -> Result<Bytes> {
    let mut payload = [0u8; 3];
    payload[0..2].copy_from_slice(&result.to_le_bytes());
    payload[2] = endpoint;
    build_structured_frame(
        StructuredHeader::command(class::ENDPOINT, command_id, 0),
        &payload,
    )
}
