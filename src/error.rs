//! Error types for radiolink.
//!
//! Only the outer surfaces return [`LinkError`]. Parsing faults are reported
//! as [`ProcessStatus`](crate::protocol::ProcessStatus) values and awaited
//! command results as [`Outcome`](crate::correlator::Outcome) values, so a
//! corrupt byte stream can never turn into an error path.

use thiserror::Error;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on the radio transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (telemetry snapshots).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed outbound frame or structured payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The listener registry is full.
    #[error("Listener capacity reached ({0} listeners)")]
    ListenerCapacity(usize),

    /// A structured command is still awaiting its response.
    #[error("Command already in flight")]
    TooManyRequests,

    /// Writing to the transport failed on every attempt.
    #[error("Transmit failed after {attempts} attempts")]
    TransmitFailed { attempts: u32 },

    /// Payload exceeds what the link can carry.
    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A pump or queue was shut down.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
