//! Built-in listener turning frames into link state.
//!
//! [`LinkRouter`] is always the first registered listener. For text frames
//! it decodes the direct message and applies it to [`LinkStatus`]. For
//! structured frames it decodes the inbound message and:
//! - releases the command gate on command responses
//! - delivers endpoint command results to the correlator
//! - records signal quality
//! - accepts UDP data arriving on the uplink endpoint

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::registry::FrameListener;
use crate::correlator::{AwaitSlot, Correlator, Response};
use crate::direct_message::{self, DirectMessage, InterlockHolder};
use crate::protocol::{decode_inbound, Frame, FrameKind, Inbound, SyncGate, INTERFACE_WIFI, RESULT_OK};
use crate::pump::{CommandGate, PayloadQueue};
use crate::status::{LinkStatus, LinkUpdate};

/// Ground command asking to flush both payload queues.
pub const UPLINK_RESET_COMMAND: &[u8] = b"RESET-ALL-COMMS-BUFFERS-NOW";

/// Reply to [`UPLINK_RESET_COMMAND`], followed by one byte: queues reset.
pub const UPLINK_RESET_REPLY: &[u8] = b"RESET-ALL-COMMS-BUFFERS-DONE:";

/// Alert downlinked when an uplink payload had to be dropped.
pub const UPLINK_DROPPED_ALERT: &[u8] = b"HER:CRITICAL--DROPPED-RX--BUFFER-FULL";

/// Header of the per-packet uplink acknowledgement.
pub const UPLINK_ACK_HEADER: &[u8; 4] = b"HER:";

/// Build the acknowledgement for an accepted uplink payload:
/// header, u32 LE milliseconds, u16 LE payload length.
pub fn uplink_ack(now_ms: u64, payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_slice(UPLINK_ACK_HEADER);
    buf.put_u32_le(now_ms as u32);
    buf.put_u16_le(payload_len.min(u16::MAX as usize) as u16);
    buf.freeze()
}

/// Frame listener maintaining status, correlator, gate and queues.
pub struct LinkRouter {
    status: LinkStatus,
    correlator: Arc<Correlator>,
    gate: CommandGate,
    sync: SyncGate,
    downlink: PayloadQueue,
    uplink: PayloadQueue,
}

impl LinkRouter {
    pub fn new(
        status: LinkStatus,
        correlator: Arc<Correlator>,
        gate: CommandGate,
        sync: SyncGate,
        downlink: PayloadQueue,
        uplink: PayloadQueue,
    ) -> Self {
        Self {
            status,
            correlator,
            gate,
            sync,
            downlink,
            uplink,
        }
    }

    fn on_direct_message(&mut self, payload: &[u8]) {
        match direct_message::decode(payload) {
            DirectMessage::Heartbeat(hb) => {
                self.status.apply(LinkUpdate::Heartbeat(hb));
                if hb.fully_valid {
                    if !self.sync.is_synced() {
                        tracing::debug!("First valid heartbeat, link in sync");
                    }
                    self.sync.mark_synced();
                } else {
                    tracing::warn!("Partially valid heartbeat: {:?}", hb);
                }
            }
            DirectMessage::State(phase) => {
                self.status.apply(LinkUpdate::Phase(phase));
            }
            DirectMessage::Activity(activity) => {
                self.status.apply(LinkUpdate::Activity(activity));
            }
            DirectMessage::Interlock(holder) => {
                self.status.apply(LinkUpdate::Interlock(holder));
                let response = match holder {
                    InterlockHolder::Herc => Response::InterlockHeld,
                    InterlockHolder::Radio | InterlockHolder::BadMessage => {
                        Response::InterlockRefused
                    }
                };
                self.correlator.deliver(AwaitSlot::AcquireInterlock, response);
            }
            DirectMessage::Error(body) => {
                tracing::warn!("Radio error: {}", String::from_utf8_lossy(&body));
            }
            DirectMessage::Fault(body) => {
                tracing::error!("Radio fault: {}", String::from_utf8_lossy(&body));
            }
            DirectMessage::Unrecognized(body) => {
                tracing::debug!("Unrecognized direct message ({} bytes)", body.len());
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::SetTransmitSizeResponse { result, .. } => {
                self.gate.release();
                self.correlator
                    .deliver(AwaitSlot::SetTransmitSize, Response::Code(result));
            }
            Inbound::SendEndpointResponse { result, .. } => {
                self.gate.release();
                self.correlator
                    .deliver(AwaitSlot::SendChunk, Response::Code(result));
            }
            Inbound::OtherResponse {
                class_id,
                command_id,
            } => {
                tracing::debug!("Response to class {} command {}", class_id, command_id);
                self.gate.release();
            }
            Inbound::EndpointSyntaxError { result, endpoint } => {
                tracing::warn!(
                    "Radio rejected command syntax (result {:#06X}, endpoint {})",
                    result,
                    endpoint
                );
                if result != RESULT_OK {
                    self.gate.release();
                }
                self.correlator.deliver_to_awaited(Response::BadSyntax);
            }
            Inbound::SignalQuality { rssi, interface } => {
                if interface == INTERFACE_WIFI {
                    self.status.apply(LinkUpdate::Rssi(rssi));
                }
            }
            Inbound::UdpData { endpoint, data, .. } => {
                let uplink_endpoint = self.status.snapshot().uplink_endpoint;
                if endpoint == uplink_endpoint {
                    self.on_uplink(data);
                } else {
                    tracing::debug!(
                        "Ignoring UDP data on endpoint {} (uplink is {})",
                        endpoint,
                        uplink_endpoint
                    );
                }
            }
            Inbound::OtherEvent { class_id, event_id } => {
                tracing::debug!("Ignoring event class {} id {}", class_id, event_id);
            }
        }
    }

    fn on_uplink(&mut self, data: Bytes) {
        self.status
            .apply(LinkUpdate::UplinkReceived { bytes: data.len() });

        if &data[..] == UPLINK_RESET_COMMAND {
            self.uplink.clear();
            self.downlink.clear();
            let mut reply = BytesMut::with_capacity(UPLINK_RESET_REPLY.len() + 1);
            reply.put_slice(UPLINK_RESET_REPLY);
            reply.put_u8(2);
            tracing::warn!("Ground requested reset of all comms buffers");
            self.downlink.push(reply.freeze());
            return;
        }

        let len = data.len();
        match self.uplink.try_push(data) {
            Ok(()) => {
                self.downlink.push(uplink_ack(self.status.now_ms(), len));
            }
            Err(dropped) => {
                tracing::warn!("Uplink queue full, dropped {} byte packet", dropped.len());
                self.downlink
                    .push_front_urgent(Bytes::from_static(UPLINK_DROPPED_ALERT));
            }
        }
    }
}

impl FrameListener for LinkRouter {
    fn on_frame(&mut self, frame: &Frame) {
        match frame.kind() {
            FrameKind::Text => self.on_direct_message(frame.payload()),
            FrameKind::Structured => {
                let Some(header) = frame.structured_header() else {
                    return;
                };
                match decode_inbound(&header, frame.payload()) {
                    Ok(inbound) => self.on_inbound(inbound),
                    Err(e) => tracing::warn!("Dropping structured frame: {}", e),
                }
            }
            FrameKind::Invalid => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::direct_message::{Heartbeat, RadioActivity, RadioPhase};
    use crate::protocol::{
        build_structured_frame, build_text_frame, class, encode_response, encode_udp_data_event,
        endpoint_command, event_id, Mpsm, StructuredHeader,
    };
    use std::time::Duration;

    struct Harness {
        router: LinkRouter,
        status: LinkStatus,
        correlator: Arc<Correlator>,
        gate: CommandGate,
        sync: SyncGate,
        downlink: PayloadQueue,
        uplink: PayloadQueue,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let clock = ManualClock::new();
        let shared = Arc::new(clock.clone());
        let status = LinkStatus::new(shared.clone());
        let correlator = Arc::new(Correlator::new());
        correlator.mark_ready();
        let gate = CommandGate::new(shared);
        let sync = SyncGate::new();
        let downlink = PayloadQueue::new(5);
        let uplink = PayloadQueue::new(2);
        let router = LinkRouter::new(
            status.clone(),
            correlator.clone(),
            gate.clone(),
            sync.clone(),
            downlink.clone(),
            uplink.clone(),
        );
        Harness {
            router,
            status,
            correlator,
            gate,
            sync,
            downlink,
            uplink,
            clock,
        }
    }

    /// Run wire bytes through a disambiguator into the router.
    fn deliver(h: &mut Harness, wire: &[u8]) {
        let mut mpsm = Mpsm::new(Arc::new(h.clock.clone()));
        let mut frame = Frame::with_capacity(1024);
        let router = &mut h.router;
        mpsm.feed(&mut frame, wire, |f| router.on_frame(f));
    }

    fn connect(h: &mut Harness) {
        let hb = Heartbeat {
            downlink_endpoint: 2,
            uplink_endpoint: 3,
            state: RadioPhase::UdpConnected,
            activity: RadioActivity::RemainingVigilant,
            fully_valid: true,
        };
        let wire = build_text_frame(&hb.to_payload()).unwrap();
        deliver(h, &wire);
    }

    #[test]
    fn test_heartbeat_updates_status_and_sync() {
        let mut h = harness();
        assert!(!h.sync.is_synced());
        connect(&mut h);
        let snap = h.status.snapshot();
        assert!(snap.ready_for_downlink());
        assert_eq!(snap.uplink_endpoint, 3);
        assert!(h.sync.is_synced());
    }

    #[test]
    fn test_partial_heartbeat_does_not_sync() {
        let mut h = harness();
        let wire = build_text_frame(b"thump:\x02:\x03:BOOT>GARBAGE").unwrap();
        deliver(&mut h, &wire);
        assert!(!h.sync.is_synced());
        let snap = h.status.snapshot();
        assert_eq!(snap.phase, RadioPhase::Boot);
        assert_eq!(snap.downlink_endpoint, 2);
    }

    #[tokio::test]
    async fn test_responses_release_gate_and_reach_correlator() {
        let mut h = harness();
        h.gate.try_acquire().unwrap();
        h.correlator.prime(AwaitSlot::SetTransmitSize);

        deliver(&mut h, &encode_response(endpoint_command::SET_TRANSMIT_SIZE, 0, 2).unwrap());

        assert!(!h.gate.is_busy());
        let outcome = h
            .correlator
            .await_response(AwaitSlot::SetTransmitSize, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, crate::correlator::Outcome::Success(Response::Code(0)));
    }

    #[test]
    fn test_other_response_releases_gate() {
        let mut h = harness();
        h.gate.try_acquire().unwrap();
        let wire =
            build_structured_frame(StructuredHeader::command(class::SYSTEM, 0x02, 0), &[]).unwrap();
        deliver(&mut h, &wire);
        assert!(!h.gate.is_busy());
    }

    #[tokio::test]
    async fn test_syntax_error_goes_to_awaited_slot() {
        let mut h = harness();
        h.gate.try_acquire().unwrap();
        h.correlator.prime(AwaitSlot::SendChunk);

        let header = StructuredHeader::event(class::ENDPOINT, event_id::ENDPOINT_SYNTAX_ERROR, 0);
        deliver(&mut h, &build_structured_frame(header, &[0x04, 0x01, 2]).unwrap());

        assert!(!h.gate.is_busy());
        let outcome = h
            .correlator
            .await_response(AwaitSlot::SendChunk, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, crate::correlator::Outcome::Success(Response::BadSyntax));
    }

    #[test]
    fn test_syntax_error_with_ok_result_keeps_gate() {
        let mut h = harness();
        h.gate.try_acquire().unwrap();
        let header = StructuredHeader::event(class::ENDPOINT, event_id::ENDPOINT_SYNTAX_ERROR, 0);
        deliver(&mut h, &build_structured_frame(header, &[0, 0, 2]).unwrap());
        assert!(h.gate.is_busy());
    }

    #[test]
    fn test_signal_quality() {
        let mut h = harness();
        let header = StructuredHeader::event(class::WIFI, event_id::SIGNAL_QUALITY, 0);
        deliver(&mut h, &build_structured_frame(header, &[0xC4, INTERFACE_WIFI]).unwrap());
        assert_eq!(h.status.snapshot().rssi, -60);

        deliver(&mut h, &build_structured_frame(header, &[0xB0, 1]).unwrap());
        assert_eq!(h.status.snapshot().rssi, -60);
    }

    #[test]
    fn test_interlock_message_reaches_slot_and_status() {
        let mut h = harness();
        h.clock.set(50);
        deliver(&mut h, &build_text_frame(b"ilock:HERC").unwrap());
        let snap = h.status.snapshot();
        assert_eq!(snap.interlock, InterlockHolder::Herc);
        assert_eq!(snap.interlock_updated_ms, 50);
    }

    #[test]
    fn test_uplink_accepted_and_acknowledged() {
        let mut h = harness();
        connect(&mut h);
        h.clock.set(0x0102_0304);

        deliver(&mut h, &encode_udp_data_event(3, [10, 0, 0, 1], 9000, b"cmd").unwrap());

        assert_eq!(h.uplink.try_pop().as_deref(), Some(&b"cmd"[..]));
        let ack = h.downlink.try_pop().unwrap();
        assert_eq!(&ack[..], &[b'H', b'E', b'R', b':', 0x04, 0x03, 0x02, 0x01, 3, 0]);
        let snap = h.status.snapshot();
        assert_eq!(snap.uplink_packets_received, 1);
        assert_eq!(snap.uplink_bytes_received, 3);
    }

    #[test]
    fn test_uplink_on_other_endpoint_ignored() {
        let mut h = harness();
        connect(&mut h);
        deliver(&mut h, &encode_udp_data_event(9, [10, 0, 0, 1], 9000, b"cmd").unwrap());
        assert!(h.uplink.is_empty());
        assert!(h.downlink.is_empty());
    }

    #[test]
    fn test_uplink_full_pushes_alert_first() {
        let mut h = harness();
        connect(&mut h);
        for payload in [&b"one"[..], b"two", b"three"] {
            deliver(&mut h, &encode_udp_data_event(3, [10, 0, 0, 1], 9000, payload).unwrap());
        }

        assert_eq!(h.uplink.len(), 2);
        assert_eq!(
            h.downlink.try_pop().as_deref(),
            Some(UPLINK_DROPPED_ALERT)
        );
        // The two acks follow.
        assert_eq!(h.downlink.len(), 2);
        assert_eq!(h.status.snapshot().uplink_packets_received, 3);
    }

    #[test]
    fn test_reset_command_clears_queues() {
        let mut h = harness();
        connect(&mut h);
        h.uplink.try_push(Bytes::from_static(b"stale")).unwrap();
        h.downlink.push(Bytes::from_static(b"old telemetry"));

        deliver(
            &mut h,
            &encode_udp_data_event(3, [10, 0, 0, 1], 9000, UPLINK_RESET_COMMAND).unwrap(),
        );

        assert!(h.uplink.is_empty());
        let reply = h.downlink.try_pop().unwrap();
        assert_eq!(&reply[..UPLINK_RESET_REPLY.len()], UPLINK_RESET_REPLY);
        assert_eq!(reply[UPLINK_RESET_REPLY.len()], 2);
        assert!(h.downlink.is_empty());
    }
}
