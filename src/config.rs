//! Link configuration.
//!
//! Every tunable of the link lives in [`LinkConfig`]. Defaults match the
//! radio firmware's expectations; a JSON document only needs to name the
//! fields it overrides.
//!
//! # Example
//!
//! ```
//! use radiolink::config::LinkConfig;
//!
//! let config = LinkConfig::from_json(r#"{ "command_max_tries": 3 }"#).unwrap();
//! assert_eq!(config.command_max_tries, 3);
//! assert_eq!(config.payload_timeout_ms, 2250);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::protocol::{STRUCTURED_MAX_PAYLOAD, TEXT_MAX_PAYLOAD};

/// Default in-progress frame timeout (2.25 s).
pub const DEFAULT_PAYLOAD_TIMEOUT_MS: u64 = 2250;

/// Default bound on an awaited command response (30 s).
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 30_000;

/// Default attempts per structured command.
pub const DEFAULT_COMMAND_MAX_TRIES: u32 = 5;

/// Default raw write attempts before giving up.
pub const DEFAULT_TRANSMIT_MAX_TRIES: u32 = 3;

/// Default polling interval while the link is unusable.
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 200;

/// Default auto-expiry of the command in flight flag.
pub const DEFAULT_COMMAND_PROCESSING_TIMEOUT_MS: u64 = 5000;

/// Default age after which a held interlock is considered lost.
pub const DEFAULT_INTERLOCK_EXPIRATION_MS: u64 = 10_000;

/// Default downlink queue depth (drop-oldest).
pub const DEFAULT_DOWNLINK_QUEUE_DEPTH: usize = 5;

/// Default uplink queue depth (drop-newest).
pub const DEFAULT_UPLINK_QUEUE_DEPTH: usize = 3;

/// Default depth of the raw byte-chunk queue.
pub const DEFAULT_RX_QUEUE_DEPTH: usize = 64;

/// Default depth of the downlink outcome queue.
pub const DEFAULT_OUTCOME_QUEUE_DEPTH: usize = 16;

/// Default number of frame listeners.
pub const DEFAULT_MAX_LISTENERS: usize = 5;

/// Default Rx frame payload capacity.
pub const DEFAULT_FRAME_CAPACITY: usize = STRUCTURED_MAX_PAYLOAD;

/// Default largest payload accepted for downlink.
pub const DEFAULT_MAX_DOWNLINK_PAYLOAD: usize = 2048;

/// Configuration for a radio link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Discard an in-progress frame after this long without completion.
    pub payload_timeout_ms: u64,
    /// Bound on each awaited command response.
    pub response_timeout_ms: u64,
    /// Attempts per structured command before the downlink is declared failed.
    pub command_max_tries: u32,
    /// Raw write attempts before `TransmitFailed`.
    pub transmit_max_tries: u32,
    /// Polling interval while waiting for the link or the command gate.
    pub ready_poll_interval_ms: u64,
    /// The command in flight flag clears itself after this long.
    pub command_processing_timeout_ms: u64,
    /// A held interlock older than this reads as held by the radio.
    pub interlock_expiration_ms: u64,
    /// Require the interlock before every downlink.
    pub require_interlock: bool,
    /// Reject non-endpoint structured frames until the first valid heartbeat.
    pub require_heartbeat_sync: bool,
    /// Outbound payload queue depth.
    pub downlink_queue_depth: usize,
    /// Inbound payload queue depth.
    pub uplink_queue_depth: usize,
    /// Raw byte-chunk queue depth.
    pub rx_queue_depth: usize,
    /// Downlink outcome queue depth.
    pub outcome_queue_depth: usize,
    /// Maximum registered frame listeners.
    pub max_listeners: usize,
    /// Capacity of the Rx frame payload buffer.
    pub frame_capacity: usize,
    /// Largest payload accepted by `Link::downlink`.
    pub max_downlink_payload: usize,
    /// Sent once as the first downlink after start.
    pub hello_message: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            payload_timeout_ms: DEFAULT_PAYLOAD_TIMEOUT_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            command_max_tries: DEFAULT_COMMAND_MAX_TRIES,
            transmit_max_tries: DEFAULT_TRANSMIT_MAX_TRIES,
            ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
            command_processing_timeout_ms: DEFAULT_COMMAND_PROCESSING_TIMEOUT_MS,
            interlock_expiration_ms: DEFAULT_INTERLOCK_EXPIRATION_MS,
            require_interlock: false,
            require_heartbeat_sync: false,
            downlink_queue_depth: DEFAULT_DOWNLINK_QUEUE_DEPTH,
            uplink_queue_depth: DEFAULT_UPLINK_QUEUE_DEPTH,
            rx_queue_depth: DEFAULT_RX_QUEUE_DEPTH,
            outcome_queue_depth: DEFAULT_OUTCOME_QUEUE_DEPTH,
            max_listeners: DEFAULT_MAX_LISTENERS,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            max_downlink_payload: DEFAULT_MAX_DOWNLINK_PAYLOAD,
            hello_message: None,
        }
    }
}

impl LinkConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a JSON file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    /// Reject values the pumps cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.command_max_tries == 0 {
            return Err(LinkError::InvalidConfig(
                "command_max_tries must be at least 1".into(),
            ));
        }
        if self.transmit_max_tries == 0 {
            return Err(LinkError::InvalidConfig(
                "transmit_max_tries must be at least 1".into(),
            ));
        }
        if self.ready_poll_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "ready_poll_interval_ms must be non-zero".into(),
            ));
        }
        for (name, depth) in [
            ("downlink_queue_depth", self.downlink_queue_depth),
            ("uplink_queue_depth", self.uplink_queue_depth),
            ("rx_queue_depth", self.rx_queue_depth),
            ("outcome_queue_depth", self.outcome_queue_depth),
            ("max_listeners", self.max_listeners),
        ] {
            if depth == 0 {
                return Err(LinkError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if self.frame_capacity < TEXT_MAX_PAYLOAD {
            return Err(LinkError::InvalidConfig(format!(
                "frame_capacity must hold a full text payload ({TEXT_MAX_PAYLOAD} bytes)"
            )));
        }
        if self.max_downlink_payload == 0 || self.max_downlink_payload > u16::MAX as usize {
            return Err(LinkError::InvalidConfig(
                "max_downlink_payload must be within 1..=65535".into(),
            ));
        }
        if let Some(hello) = &self.hello_message {
            if hello.len() > self.max_downlink_payload {
                return Err(LinkError::InvalidConfig(
                    "hello_message exceeds max_downlink_payload".into(),
                ));
            }
        }
        Ok(())
    }

    /// In-progress frame timeout.
    #[inline]
    pub fn payload_timeout(&self) -> Duration {
        Duration::from_millis(self.payload_timeout_ms)
    }

    /// Command response bound.
    #[inline]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Readiness polling interval.
    #[inline]
    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.payload_timeout(), Duration::from_millis(2250));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.command_max_tries, 5);
        assert_eq!(config.downlink_queue_depth, 5);
        assert_eq!(config.uplink_queue_depth, 3);
        assert!(config.hello_message.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = LinkConfig::from_json(
            r#"{ "response_timeout_ms": 500, "hello_message": "hi", "require_interlock": true }"#,
        )
        .unwrap();

        assert_eq!(config.response_timeout_ms, 500);
        assert_eq!(config.hello_message.as_deref(), Some("hi"));
        assert!(config.require_interlock);
        assert_eq!(config.command_max_tries, DEFAULT_COMMAND_MAX_TRIES);
    }

    #[test]
    fn test_invalid_json() {
        let result = LinkConfig::from_json("{ not json");
        assert!(matches!(result, Err(LinkError::Json(_))));
    }

    #[test]
    fn test_rejects_zero_tries() {
        let result = LinkConfig::from_json(r#"{ "command_max_tries": 0 }"#);
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_small_frame_capacity() {
        let config = LinkConfig {
            frame_capacity: 16,
            ..LinkConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_hello() {
        let config = LinkConfig {
            max_downlink_payload: 4,
            hello_message: Some("hello earth".into()),
            ..LinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("radiolink-config-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{ "max_listeners": 2 }"#).await.unwrap();

        let config = LinkConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.max_listeners, 2);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
