//! Shared link status.
//!
//! [`LinkStatus`] is the single source of truth for the state of the radio
//! link. It is written by the Rx side (heartbeats, signal quality, uplink
//! counters) and the Tx side (downlink counters, phase resets, the critical
//! failure flag), and read by the Tx pump to decide whether it may send.
//!
//! The only operations are "copy the whole record" ([`LinkStatus::snapshot`])
//! and "apply one mutation" ([`LinkStatus::apply`]), each under one lock.
//! Callers needing several fields together read them from one snapshot.
//!
//! # Example
//!
//! ```
//! use radiolink::clock::ManualClock;
//! use radiolink::direct_message::RadioPhase;
//! use radiolink::status::{LinkStatus, LinkUpdate};
//! use std::sync::Arc;
//!
//! let status = LinkStatus::new(Arc::new(ManualClock::new()));
//! status.apply(LinkUpdate::Phase(RadioPhase::Connected));
//! status.apply(LinkUpdate::Rssi(-61));
//!
//! let snap = status.snapshot();
//! assert_eq!(snap.phase, RadioPhase::Connected);
//! assert_eq!(snap.rssi, -61);
//! assert_eq!(snap.direct_messages, 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::codec::MsgPackCodec;
use crate::direct_message::{Heartbeat, InterlockHolder, RadioActivity, RadioPhase};
use crate::error::Result;
use crate::protocol::NULL_ENDPOINT;

/// Consistent copy of the link status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Clock reading of the last fully valid heartbeat (0 before the first).
    pub last_heartbeat_ms: u64,
    pub phase: RadioPhase,
    pub activity: RadioActivity,
    /// Endpoint our downlink data is sent to.
    pub downlink_endpoint: u8,
    /// Endpoint uplink data from the ground arrives on.
    pub uplink_endpoint: u8,
    /// Last reported signal strength in dBm.
    pub rssi: i8,
    pub uplink_bytes_received: u32,
    pub uplink_packets_received: u32,
    pub downlink_bytes_sent: u32,
    pub downlink_packets_sent: u32,
    /// Direct messages counted by the status rules.
    pub direct_messages: u32,
    /// Set when the link cannot recover without an external reset.
    pub critical_failure: bool,
    pub interlock: InterlockHolder,
    /// Clock reading of the last interlock report.
    pub interlock_updated_ms: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            last_heartbeat_ms: 0,
            phase: RadioPhase::None,
            activity: RadioActivity::None,
            downlink_endpoint: NULL_ENDPOINT,
            uplink_endpoint: NULL_ENDPOINT,
            rssi: 0,
            uplink_bytes_received: 0,
            uplink_packets_received: 0,
            downlink_bytes_sent: 0,
            downlink_packets_sent: 0,
            direct_messages: 0,
            critical_failure: false,
            interlock: InterlockHolder::Radio,
            interlock_updated_ms: 0,
        }
    }
}

impl StatusSnapshot {
    /// Interlock holder as of `now_ms`.
    ///
    /// A local hold older than `expiration_ms` has lapsed, and a corrupted
    /// report is not trusted: both read as the radio holding it.
    pub fn interlock_at(&self, now_ms: u64, expiration_ms: u64) -> InterlockHolder {
        match self.interlock {
            InterlockHolder::Herc
                if now_ms.saturating_sub(self.interlock_updated_ms) <= expiration_ms =>
            {
                InterlockHolder::Herc
            }
            _ => InterlockHolder::Radio,
        }
    }

    /// True when downlink data has somewhere to go.
    #[inline]
    pub fn ready_for_downlink(&self) -> bool {
        self.phase == RadioPhase::UdpConnected && self.downlink_endpoint != NULL_ENDPOINT
    }
}

/// One mutation of the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUpdate {
    /// Decoded `thump:` message, valid or not.
    Heartbeat(Heartbeat),
    /// `state:` message.
    Phase(RadioPhase),
    /// `doing:` message.
    Activity(RadioActivity),
    /// `ilock:` message.
    Interlock(InterlockHolder),
    Rssi(i8),
    UplinkReceived { bytes: usize },
    DownlinkChunkSent { bytes: usize },
    DownlinkPacketSent,
    CriticalFailure(bool),
    /// Forget the phase after a failed command so the next heartbeat sets it.
    ResetPhase,
}

/// Mutex-guarded link status.
///
/// Cloning shares the same record.
#[derive(Clone)]
pub struct LinkStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
    clock: SharedClock,
}

impl LinkStatus {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatusSnapshot::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        // Every mutation leaves the record whole, so a poisoned lock is
        // still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy the whole record.
    pub fn snapshot(&self) -> StatusSnapshot {
        *self.lock()
    }

    /// Apply one mutation and return the record as it is afterwards.
    pub fn apply(&self, update: LinkUpdate) -> StatusSnapshot {
        let now = self.clock.now_ms();
        let mut status = self.lock();

        match update {
            LinkUpdate::Heartbeat(hb) => {
                if hb.fully_valid || hb.downlink_endpoint != NULL_ENDPOINT {
                    status.downlink_endpoint = hb.downlink_endpoint;
                }
                if hb.fully_valid || hb.uplink_endpoint != NULL_ENDPOINT {
                    status.uplink_endpoint = hb.uplink_endpoint;
                }
                if hb.state != RadioPhase::BadMessage {
                    status.phase = hb.state;
                }
                if hb.activity != RadioActivity::BadMessage {
                    status.activity = hb.activity;
                }
                if hb.fully_valid {
                    status.last_heartbeat_ms = now;
                    status.direct_messages = status.direct_messages.wrapping_add(1);
                }
            }
            LinkUpdate::Phase(phase) => {
                status.phase = phase;
                status.direct_messages = status.direct_messages.wrapping_add(1);
            }
            LinkUpdate::Activity(activity) => {
                status.activity = activity;
                status.direct_messages = status.direct_messages.wrapping_add(1);
            }
            LinkUpdate::Interlock(holder) => {
                status.interlock = holder;
                status.interlock_updated_ms = now;
                status.direct_messages = status.direct_messages.wrapping_add(1);
            }
            LinkUpdate::Rssi(rssi) => status.rssi = rssi,
            LinkUpdate::UplinkReceived { bytes } => {
                status.uplink_bytes_received =
                    status.uplink_bytes_received.wrapping_add(bytes as u32);
                status.uplink_packets_received = status.uplink_packets_received.wrapping_add(1);
            }
            LinkUpdate::DownlinkChunkSent { bytes } => {
                status.downlink_bytes_sent = status.downlink_bytes_sent.wrapping_add(bytes as u32);
            }
            LinkUpdate::DownlinkPacketSent => {
                status.downlink_packets_sent = status.downlink_packets_sent.wrapping_add(1);
            }
            LinkUpdate::CriticalFailure(flag) => {
                if flag && !status.critical_failure {
                    tracing::error!("Radio link flagged critical, external reset needed");
                }
                status.critical_failure = flag;
            }
            LinkUpdate::ResetPhase => status.phase = RadioPhase::None,
        }

        *status
    }

    /// Interlock holder now, after expiry.
    pub fn interlock(&self, expiration_ms: u64) -> InterlockHolder {
        let now = self.clock.now_ms();
        self.lock().interlock_at(now, expiration_ms)
    }

    /// Current clock reading.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// MessagePack-encoded snapshot for the telemetry channel.
    pub fn telemetry(&self) -> Result<Vec<u8>> {
        MsgPackCodec::encode(&self.snapshot())
    }
}

impl std::fmt::Debug for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStatus")
            .field("status", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn status() -> (LinkStatus, ManualClock) {
        let clock = ManualClock::new();
        (LinkStatus::new(Arc::new(clock.clone())), clock)
    }

    fn valid_heartbeat() -> Heartbeat {
        Heartbeat {
            downlink_endpoint: 2,
            uplink_endpoint: 3,
            state: RadioPhase::UdpConnected,
            activity: RadioActivity::RemainingVigilant,
            fully_valid: true,
        }
    }

    #[test]
    fn test_initial_snapshot() {
        let (status, _clock) = status();
        let snap = status.snapshot();
        assert_eq!(snap.phase, RadioPhase::None);
        assert_eq!(snap.downlink_endpoint, NULL_ENDPOINT);
        assert_eq!(snap.uplink_endpoint, NULL_ENDPOINT);
        assert!(!snap.critical_failure);
        assert!(!snap.ready_for_downlink());
    }

    #[test]
    fn test_valid_heartbeat_updates_everything() {
        let (status, clock) = status();
        clock.set(1234);
        let snap = status.apply(LinkUpdate::Heartbeat(valid_heartbeat()));

        assert_eq!(snap.downlink_endpoint, 2);
        assert_eq!(snap.uplink_endpoint, 3);
        assert_eq!(snap.phase, RadioPhase::UdpConnected);
        assert_eq!(snap.activity, RadioActivity::RemainingVigilant);
        assert_eq!(snap.last_heartbeat_ms, 1234);
        assert_eq!(snap.direct_messages, 1);
        assert!(snap.ready_for_downlink());
    }

    #[test]
    fn test_partial_heartbeat_keeps_known_good_fields() {
        let (status, clock) = status();
        clock.set(100);
        status.apply(LinkUpdate::Heartbeat(valid_heartbeat()));

        clock.set(200);
        let partial = Heartbeat {
            downlink_endpoint: NULL_ENDPOINT,
            uplink_endpoint: NULL_ENDPOINT,
            state: RadioPhase::Connected,
            activity: RadioActivity::BadMessage,
            fully_valid: false,
        };
        let snap = status.apply(LinkUpdate::Heartbeat(partial));

        assert_eq!(snap.downlink_endpoint, 2);
        assert_eq!(snap.uplink_endpoint, 3);
        assert_eq!(snap.phase, RadioPhase::Connected);
        assert_eq!(snap.activity, RadioActivity::RemainingVigilant);
        assert_eq!(snap.last_heartbeat_ms, 100);
        assert_eq!(snap.direct_messages, 1);
    }

    #[test]
    fn test_partial_heartbeat_with_endpoints_updates_them() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::Heartbeat(valid_heartbeat()));
        let partial = Heartbeat {
            downlink_endpoint: 7,
            state: RadioPhase::BadMessage,
            fully_valid: false,
            ..valid_heartbeat()
        };
        let snap = status.apply(LinkUpdate::Heartbeat(partial));
        assert_eq!(snap.downlink_endpoint, 7);
        assert_eq!(snap.phase, RadioPhase::UdpConnected);
    }

    #[test]
    fn test_phase_updates_apply_bad_message() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::Phase(RadioPhase::Init));
        let snap = status.apply(LinkUpdate::Phase(RadioPhase::BadMessage));
        assert_eq!(snap.phase, RadioPhase::BadMessage);
        assert_eq!(snap.direct_messages, 2);

        let snap = status.apply(LinkUpdate::Activity(RadioActivity::BadMessage));
        assert_eq!(snap.activity, RadioActivity::BadMessage);
        assert_eq!(snap.direct_messages, 3);
    }

    #[test]
    fn test_reset_phase_does_not_count() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::Heartbeat(valid_heartbeat()));
        let snap = status.apply(LinkUpdate::ResetPhase);
        assert_eq!(snap.phase, RadioPhase::None);
        assert_eq!(snap.direct_messages, 1);
        assert!(!snap.ready_for_downlink());
    }

    #[test]
    fn test_interlock_expiry() {
        let (status, clock) = status();
        clock.set(1_000);
        status.apply(LinkUpdate::Interlock(InterlockHolder::Herc));

        clock.set(6_000);
        assert_eq!(status.interlock(5_000), InterlockHolder::Herc);
        clock.set(6_001);
        assert_eq!(status.interlock(5_000), InterlockHolder::Radio);
    }

    #[test]
    fn test_interlock_bad_message_reads_as_radio() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::Interlock(InterlockHolder::BadMessage));
        assert_eq!(status.interlock(10_000), InterlockHolder::Radio);
        assert_eq!(status.snapshot().interlock, InterlockHolder::BadMessage);
    }

    #[test]
    fn test_counters_wrap() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::DownlinkChunkSent {
            bytes: u32::MAX as usize,
        });
        let snap = status.apply(LinkUpdate::DownlinkChunkSent { bytes: 2 });
        assert_eq!(snap.downlink_bytes_sent, 1);

        let snap = status.apply(LinkUpdate::UplinkReceived { bytes: 10 });
        assert_eq!(snap.uplink_bytes_received, 10);
        assert_eq!(snap.uplink_packets_received, 1);
    }

    #[test]
    fn test_critical_failure_flag() {
        let (status, _clock) = status();
        assert!(status.apply(LinkUpdate::CriticalFailure(true)).critical_failure);
        assert!(!status.apply(LinkUpdate::CriticalFailure(false)).critical_failure);
    }

    #[test]
    fn test_clones_share_state() {
        let (status, _clock) = status();
        let other = status.clone();
        other.apply(LinkUpdate::Rssi(-70));
        assert_eq!(status.snapshot().rssi, -70);
    }

    #[test]
    fn test_telemetry_decodes_to_snapshot() {
        let (status, _clock) = status();
        status.apply(LinkUpdate::Heartbeat(valid_heartbeat()));
        status.apply(LinkUpdate::DownlinkPacketSent);

        let bytes = status.telemetry().unwrap();
        let decoded: StatusSnapshot = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, status.snapshot());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (status, _clock) = status();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let status = status.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        status.apply(LinkUpdate::DownlinkPacketSent);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(status.snapshot().downlink_packets_sent, 1000);
    }
}
