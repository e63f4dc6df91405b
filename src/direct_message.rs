//! Direct message decoding.
//!
//! Direct messages are the human-readable text frames the radio firmware
//! sends alongside the structured protocol. Every standard message starts with
//! a 6-byte ASCII prefix:
//!
//! | Prefix   | Body                                   |
//! |----------|----------------------------------------|
//! | `thump:` | `<dl>:<ul>:<STATE>><ACTIVITY>`         |
//! | `state:` | one state token                        |
//! | `doing:` | one activity token                     |
//! | `ilock:` | `RADIO` or `HERC`                      |
//! | `error:` | opaque                                 |
//! | `fault:` | opaque                                 |
//!
//! A body that does not match a known token decodes to the `BadMessage`
//! variant of the field rather than being dropped: "the state became
//! unknown" is reported like any other state.
//!
//! # Example
//!
//! ```
//! use radiolink::direct_message::{decode, DirectMessage, RadioActivity, RadioPhase};
//!
//! match decode(b"thump:\x02:\x03:UDP_CONNECTED>REMAINING_VIGILANT") {
//!     DirectMessage::Heartbeat(hb) => {
//!         assert!(hb.fully_valid);
//!         assert_eq!(hb.downlink_endpoint, 2);
//!         assert_eq!(hb.state, RadioPhase::UdpConnected);
//!         assert_eq!(hb.activity, RadioActivity::RemainingVigilant);
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::NULL_ENDPOINT;

/// Length of every standard prefix.
pub const PREFIX_LEN: usize = 6;

/// Standard message prefixes.
pub mod prefix {
    pub const HEARTBEAT: &[u8; 6] = b"thump:";
    pub const STATE: &[u8; 6] = b"state:";
    pub const ACTIVITY: &[u8; 6] = b"doing:";
    pub const INTERLOCK: &[u8; 6] = b"ilock:";
    pub const ERROR: &[u8; 6] = b"error:";
    pub const FAULT: &[u8; 6] = b"fault:";
}

const FIELD_SEPARATOR: u8 = b':';
const STATE_ACTIVITY_BOUNDARY: u8 = b'>';

/// Radio firmware state, as reported by `state:` and heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadioPhase {
    /// Nothing received yet.
    #[default]
    None,
    /// A message arrived but its body matched no token.
    BadMessage,
    Boot,
    Init,
    WifiOn,
    Connected,
    UdpConnected,
}

impl RadioPhase {
    const TOKENS: [(&'static [u8], RadioPhase); 5] = [
        (b"BOOT", RadioPhase::Boot),
        (b"INIT", RadioPhase::Init),
        (b"WIFI_ON", RadioPhase::WifiOn),
        (b"CONNECTED", RadioPhase::Connected),
        (b"UDP_CONNECTED", RadioPhase::UdpConnected),
    ];

    /// Numeric code used in telemetry.
    pub fn code(self) -> u8 {
        match self {
            RadioPhase::None => 0x00,
            RadioPhase::BadMessage => 0x0F,
            RadioPhase::Boot => 0x10,
            RadioPhase::Init => 0x20,
            RadioPhase::WifiOn => 0x30,
            RadioPhase::Connected => 0x40,
            RadioPhase::UdpConnected => 0x50,
        }
    }

    /// Wire token, for states the radio can report.
    pub fn token(self) -> Option<&'static [u8]> {
        Self::TOKENS
            .iter()
            .find(|(_, phase)| *phase == self)
            .map(|(token, _)| *token)
    }

    fn match_prefix(input: &[u8]) -> Option<(Self, usize)> {
        match_token(&Self::TOKENS, input)
    }

    fn match_exact(input: &[u8]) -> Self {
        exact_token(&Self::TOKENS, input).unwrap_or(RadioPhase::BadMessage)
    }
}

/// What the radio firmware is working on, as reported by `doing:` and heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadioActivity {
    #[default]
    None,
    BadMessage,
    TurningWifiOn,
    ConnectingNetwork,
    StartingUdp,
    RemainingVigilant,
    WaitingThenCorrecting,
}

impl RadioActivity {
    const TOKENS: [(&'static [u8], RadioActivity); 5] = [
        (b"TURNING_WIFI_ON", RadioActivity::TurningWifiOn),
        (b"CONNECTING_NETWORK", RadioActivity::ConnectingNetwork),
        (b"STARTING_UDP", RadioActivity::StartingUdp),
        (b"REMAINING_VIGILANT", RadioActivity::RemainingVigilant),
        (b"WAITING_THEN_CORRECTING", RadioActivity::WaitingThenCorrecting),
    ];

    pub fn code(self) -> u8 {
        match self {
            RadioActivity::None => 0x00,
            RadioActivity::BadMessage => 0x0F,
            RadioActivity::TurningWifiOn => 0x10,
            RadioActivity::ConnectingNetwork => 0x20,
            RadioActivity::StartingUdp => 0x30,
            RadioActivity::RemainingVigilant => 0x40,
            RadioActivity::WaitingThenCorrecting => 0x50,
        }
    }

    pub fn token(self) -> Option<&'static [u8]> {
        Self::TOKENS
            .iter()
            .find(|(_, activity)| *activity == self)
            .map(|(token, _)| *token)
    }

    fn match_prefix(input: &[u8]) -> Option<(Self, usize)> {
        match_token(&Self::TOKENS, input)
    }

    fn match_exact(input: &[u8]) -> Self {
        exact_token(&Self::TOKENS, input).unwrap_or(RadioActivity::BadMessage)
    }
}

/// Which side holds the link-usage interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterlockHolder {
    /// The radio firmware holds it.
    #[default]
    Radio,
    /// The local side holds it.
    Herc,
    BadMessage,
}

impl InterlockHolder {
    const TOKENS: [(&'static [u8], InterlockHolder); 2] = [
        (b"RADIO", InterlockHolder::Radio),
        (b"HERC", InterlockHolder::Herc),
    ];

    fn match_exact(input: &[u8]) -> Self {
        exact_token(&Self::TOKENS, input).unwrap_or(InterlockHolder::BadMessage)
    }
}

fn match_token<T: Copy>(table: &[(&'static [u8], T)], input: &[u8]) -> Option<(T, usize)> {
    table
        .iter()
        .find(|(token, _)| input.starts_with(token))
        .map(|(token, value)| (*value, token.len()))
}

fn exact_token<T: Copy>(table: &[(&'static [u8], T)], input: &[u8]) -> Option<T> {
    table
        .iter()
        .find(|(token, _)| *token == input)
        .map(|(_, value)| *value)
}

/// Decoded heartbeat.
///
/// Fields the decoder did not reach read as [`NULL_ENDPOINT`] or `BadMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub downlink_endpoint: u8,
    pub uplink_endpoint: u8,
    pub state: RadioPhase,
    pub activity: RadioActivity,
    /// Every field and separator was present and matched.
    pub fully_valid: bool,
}

impl Heartbeat {
    /// Heartbeat with nothing parsed.
    fn unparsed() -> Self {
        Self {
            downlink_endpoint: NULL_ENDPOINT,
            uplink_endpoint: NULL_ENDPOINT,
            state: RadioPhase::BadMessage,
            activity: RadioActivity::BadMessage,
            fully_valid: false,
        }
    }

    /// Parse a heartbeat body (after the prefix).
    ///
    /// Parsing stops at the first missing or mismatched element; everything
    /// before it is kept.
    fn parse(body: &[u8]) -> Self {
        let mut hb = Self::unparsed();

        let Some(rest) = endpoint_field(body) else {
            return hb;
        };
        hb.downlink_endpoint = body[0];

        let Some(after_ul) = endpoint_field(rest) else {
            return hb;
        };
        hb.uplink_endpoint = rest[0];

        let Some((state, used)) = RadioPhase::match_prefix(after_ul) else {
            return hb;
        };
        hb.state = state;

        let rest = &after_ul[used..];
        if rest.first() != Some(&STATE_ACTIVITY_BOUNDARY) {
            return hb;
        }

        let Some((activity, _)) = RadioActivity::match_prefix(&rest[1..]) else {
            return hb;
        };
        hb.activity = activity;
        hb.fully_valid = true;
        hb
    }

    /// Encode as a complete `thump:` payload.
    ///
    /// `BadMessage` and `None` fields are written as `?` so the result is a
    /// partially valid heartbeat. Used by radio simulators and tests.
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(prefix::HEARTBEAT);
        buf.put_u8(self.downlink_endpoint);
        buf.put_u8(FIELD_SEPARATOR);
        buf.put_u8(self.uplink_endpoint);
        buf.put_u8(FIELD_SEPARATOR);
        buf.put_slice(self.state.token().unwrap_or(b"?"));
        buf.put_u8(STATE_ACTIVITY_BOUNDARY);
        buf.put_slice(self.activity.token().unwrap_or(b"?"));
        buf.freeze()
    }
}

/// One endpoint byte followed by the separator; returns what follows.
fn endpoint_field(input: &[u8]) -> Option<&[u8]> {
    match input {
        [_, FIELD_SEPARATOR, rest @ ..] => Some(rest),
        _ => None,
    }
}

/// A decoded direct message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectMessage {
    Heartbeat(Heartbeat),
    State(RadioPhase),
    Activity(RadioActivity),
    Interlock(InterlockHolder),
    /// Recoverable radio error, body passed through.
    Error(Bytes),
    /// Radio fault preceding a self reset, body passed through.
    Fault(Bytes),
    /// No standard prefix; the whole payload.
    Unrecognized(Bytes),
}

/// Decode one complete text-frame payload.
pub fn decode(payload: &[u8]) -> DirectMessage {
    if payload.len() < PREFIX_LEN {
        return DirectMessage::Unrecognized(Bytes::copy_from_slice(payload));
    }
    let (head, body) = payload.split_at(PREFIX_LEN);

    match head {
        h if h == prefix::HEARTBEAT => DirectMessage::Heartbeat(Heartbeat::parse(body)),
        h if h == prefix::STATE => DirectMessage::State(RadioPhase::match_exact(body)),
        h if h == prefix::ACTIVITY => DirectMessage::Activity(RadioActivity::match_exact(body)),
        h if h == prefix::INTERLOCK => {
            DirectMessage::Interlock(InterlockHolder::match_exact(body))
        }
        h if h == prefix::ERROR => DirectMessage::Error(Bytes::copy_from_slice(body)),
        h if h == prefix::FAULT => DirectMessage::Fault(Bytes::copy_from_slice(body)),
        _ => DirectMessage::Unrecognized(Bytes::copy_from_slice(payload)),
    }
}
