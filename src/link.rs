//! Link builder and runtime.
//!
//! The [`LinkBuilder`] provides a fluent API for configuring the link and
//! registering frame listeners. [`LinkBuilder::start`] wires everything
//! together over a split byte stream:
//! 1. Spawn the transport reader
//! 2. Spawn the Rx pump with the built-in [`LinkRouter`] and user listeners
//! 3. Spawn the Tx pump driving downlink payloads through the radio
//!
//! # Example
//!
//! ```no_run
//! use radiolink::LinkBuilder;
//!
//! # async fn run(stream: tokio::net::TcpStream) -> radiolink::Result<()> {
//! let (reader, writer) = stream.into_split();
//! let mut link = LinkBuilder::new()
//!     .hello_message("rover up")
//!     .require_heartbeat_sync(true)
//!     .start(reader, writer)
//!     .await?;
//!
//! link.downlink(&b"telemetry frame"[..])?;
//! let outcome = link.next_outcome().await?;
//! println!("downlink: {:?}", outcome);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::clock::{SharedClock, SystemClock};
use crate::config::LinkConfig;
use crate::correlator::Correlator;
use crate::error::{LinkError, Result};
use crate::handler::{FrameListener, LinkRouter, ListenerRegistry};
use crate::protocol::{Frame, Mpsm, SyncGate};
use crate::pump::{spawn_rx_pump, CommandGate, CommandSender, DownlinkOutcome, PayloadQueue, TxPump};
use crate::status::{LinkStatus, LinkUpdate, StatusSnapshot};
use crate::transport::spawn_reader;

/// Builder for configuring and starting a radio link.
pub struct LinkBuilder {
    config: LinkConfig,
    clock: Option<SharedClock>,
    listeners: Vec<Box<dyn FrameListener>>,
}

impl LinkBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    /// Create a builder from a loaded configuration.
    pub fn with_config(config: LinkConfig) -> Self {
        Self {
            config,
            clock: None,
            listeners: Vec::new(),
        }
    }

    /// Use a custom clock for timeouts and timestamps.
    ///
    /// Default: [`SystemClock`]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register a listener called with every completed frame.
    ///
    /// The built-in router always runs first and takes one of the
    /// `max_listeners` slots.
    pub fn listener<L: FrameListener>(mut self, listener: L) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn payload_timeout_ms(mut self, ms: u64) -> Self {
        self.config.payload_timeout_ms = ms;
        self
    }

    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    pub fn command_max_tries(mut self, tries: u32) -> Self {
        self.config.command_max_tries = tries;
        self
    }

    pub fn transmit_max_tries(mut self, tries: u32) -> Self {
        self.config.transmit_max_tries = tries;
        self
    }

    pub fn ready_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.ready_poll_interval_ms = ms;
        self
    }

    pub fn command_processing_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_processing_timeout_ms = ms;
        self
    }

    pub fn interlock_expiration_ms(mut self, ms: u64) -> Self {
        self.config.interlock_expiration_ms = ms;
        self
    }

    /// Hold the interlock before every downlink.
    pub fn require_interlock(mut self, on: bool) -> Self {
        self.config.require_interlock = on;
        self
    }

    /// Reject non-endpoint structured frames until the first valid heartbeat.
    pub fn require_heartbeat_sync(mut self, on: bool) -> Self {
        self.config.require_heartbeat_sync = on;
        self
    }

    pub fn downlink_queue_depth(mut self, depth: usize) -> Self {
        self.config.downlink_queue_depth = depth;
        self
    }

    pub fn uplink_queue_depth(mut self, depth: usize) -> Self {
        self.config.uplink_queue_depth = depth;
        self
    }

    pub fn rx_queue_depth(mut self, depth: usize) -> Self {
        self.config.rx_queue_depth = depth;
        self
    }

    pub fn outcome_queue_depth(mut self, depth: usize) -> Self {
        self.config.outcome_queue_depth = depth;
        self
    }

    pub fn max_listeners(mut self, max: usize) -> Self {
        self.config.max_listeners = max;
        self
    }

    pub fn frame_capacity(mut self, capacity: usize) -> Self {
        self.config.frame_capacity = capacity;
        self
    }

    pub fn max_downlink_payload(mut self, max: usize) -> Self {
        self.config.max_downlink_payload = max;
        self
    }

    /// Send `message` once as the first downlink.
    pub fn hello_message(mut self, message: impl Into<String>) -> Self {
        self.config.hello_message = Some(message.into());
        self
    }

    /// Validate the configuration and start the link over `reader` / `writer`.
    pub async fn start<R, W>(self, reader: R, writer: W) -> Result<Link>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Link::start(self, reader, writer)
    }
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running radio link.
///
/// Dropping the link stops the Tx pump. The Rx side stops on its own once
/// the byte source reaches end of stream.
pub struct Link {
    config: LinkConfig,
    status: LinkStatus,
    gate: CommandGate,
    sync: SyncGate,
    downlink: PayloadQueue,
    uplink: PayloadQueue,
    outcomes: Option<mpsc::Receiver<DownlinkOutcome>>,
    shutdown_rx: oneshot::Receiver<()>,
    tx_task: JoinHandle<()>,
}

impl Link {
    /// Create a new link builder.
    pub fn builder() -> LinkBuilder {
        LinkBuilder::new()
    }

    fn start<R, W>(builder: LinkBuilder, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let LinkBuilder {
            config,
            clock,
            listeners,
        } = builder;
        config.validate()?;
        let clock = clock.unwrap_or_else(SystemClock::shared);

        // Shared state
        let status = LinkStatus::new(clock.clone());
        let correlator = Arc::new(Correlator::new());
        let gate = CommandGate::with_timeout(clock.clone(), config.command_processing_timeout_ms);
        let sync = SyncGate::new();
        let downlink = PayloadQueue::new(config.downlink_queue_depth);
        let uplink = PayloadQueue::new(config.uplink_queue_depth);

        // Listeners, router first
        let mut registry = ListenerRegistry::new(config.max_listeners);
        registry.register(LinkRouter::new(
            status.clone(),
            correlator.clone(),
            gate.clone(),
            sync.clone(),
            downlink.clone(),
            uplink.clone(),
        ))?;
        for listener in listeners {
            registry.register_boxed(listener)?;
        }

        let mut mpsm = Mpsm::new(clock).with_payload_timeout(config.payload_timeout_ms);
        if config.require_heartbeat_sync {
            mpsm = mpsm.with_sync_gate(sync.clone());
        }

        // Rx side
        let (chunk_tx, chunk_rx) = mpsc::channel(config.rx_queue_depth);
        let reader_task = spawn_reader(reader, chunk_tx);
        let rx_task = spawn_rx_pump(
            chunk_rx,
            mpsm,
            Frame::with_capacity(config.frame_capacity),
            registry,
            correlator.clone(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            match reader_task.await {
                Ok(Err(e)) => tracing::error!("Reader error: {}", e),
                Err(e) => tracing::error!("Reader task failed: {}", e),
                Ok(Ok(())) => {}
            }
            match rx_task.await {
                Ok(Err(e)) => tracing::error!("Rx pump error: {}", e),
                Err(e) => tracing::error!("Rx pump task failed: {}", e),
                Ok(Ok(())) => {}
            }
            let _ = shutdown_tx.send(());
        });

        // Tx side
        let (outcome_tx, outcome_rx) = mpsc::channel(config.outcome_queue_depth);
        let sender = CommandSender::new(
            writer,
            gate.clone(),
            correlator,
            config.transmit_max_tries,
            config.response_timeout(),
        );
        let tx_task = TxPump::new(sender, status.clone(), downlink.clone(), outcome_tx, &config).spawn();

        tracing::debug!("Link started: {:?}", config);

        Ok(Link {
            config,
            status,
            gate,
            sync,
            downlink,
            uplink,
            outcomes: Some(outcome_rx),
            shutdown_rx,
            tx_task,
        })
    }

    /// Consistent snapshot of the link status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Shared handle to the live link status.
    pub fn link_status(&self) -> LinkStatus {
        self.status.clone()
    }

    /// Queue a payload for downlink.
    ///
    /// When the queue is full the oldest queued payload is dropped.
    pub fn downlink(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > self.config.max_downlink_payload {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_downlink_payload,
            });
        }
        self.downlink.push(payload);
        Ok(())
    }

    /// Handle to the queue of received uplink payloads.
    pub fn uplink(&self) -> PayloadQueue {
        self.uplink.clone()
    }

    /// Wait for the next uplink payload.
    pub async fn next_uplink(&self) -> Bytes {
        self.uplink.pop().await
    }

    /// Take the downlink outcome receiver, e.g. to hand it to another task.
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<DownlinkOutcome>> {
        self.outcomes.take()
    }

    /// Wait for the next downlink outcome.
    ///
    /// Returns `Err(ChannelClosed)` once the receiver was taken or the Tx
    /// pump is gone.
    pub async fn next_outcome(&mut self) -> Result<DownlinkOutcome> {
        let outcomes = self.outcomes.as_mut().ok_or(LinkError::ChannelClosed)?;
        outcomes.recv().await.ok_or(LinkError::ChannelClosed)
    }

    /// Whether the first fully valid heartbeat has been seen.
    pub fn is_synced(&self) -> bool {
        self.sync.is_synced()
    }

    /// Whether a structured command is awaiting its response.
    pub fn command_in_flight(&self) -> bool {
        self.gate.is_busy()
    }

    /// Clear the critical failure flag after the operator has handled it.
    pub fn clear_critical_failure(&self) {
        self.status.apply(LinkUpdate::CriticalFailure(false));
    }

    /// MessagePack encoded status snapshot.
    pub fn telemetry(&self) -> Result<Vec<u8>> {
        self.status.telemetry()
    }

    /// Wait until the byte source closes.
    ///
    /// This consumes the link and stops the Tx pump on return.
    pub async fn wait_for_shutdown(mut self) -> Result<()> {
        let _ = (&mut self.shutdown_rx).await;
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.tx_task.abort();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("status", &self.status)
            .field("downlink_queued", &self.downlink.len())
            .field("uplink_queued", &self.uplink.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_text_frame;
    use std::sync::Mutex;
    use tokio::io::{duplex, split, AsyncWriteExt};

    #[test]
    fn test_builder_overrides_config() {
        let builder = LinkBuilder::new()
            .command_max_tries(9)
            .require_interlock(true)
            .hello_message("hi")
            .max_downlink_payload(100);
        assert_eq!(builder.config.command_max_tries, 9);
        assert!(builder.config.require_interlock);
        assert_eq!(builder.config.hello_message.as_deref(), Some("hi"));
        assert_eq!(builder.config.max_downlink_payload, 100);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let (a, _b) = duplex(64);
        let (r, w) = split(a);
        let err = LinkBuilder::new().command_max_tries(0).start(r, w).await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_router_takes_a_listener_slot() {
        let (a, _b) = duplex(64);
        let (r, w) = split(a);
        let err = LinkBuilder::new()
            .max_listeners(1)
            .listener(|_: &Frame| {})
            .start(r, w)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ListenerCapacity(1)));
    }

    #[tokio::test]
    async fn test_downlink_rejects_oversized_payload() {
        let (a, _b) = duplex(64);
        let (r, w) = split(a);
        let link = LinkBuilder::new().max_downlink_payload(4).start(r, w).await.unwrap();
        assert!(matches!(
            link.downlink(&b"12345"[..]),
            Err(LinkError::PayloadTooLarge { len: 5, max: 4 })
        ));
        link.downlink(&b"1234"[..]).unwrap();
    }

    #[tokio::test]
    async fn test_direct_messages_update_status_and_listeners() {
        let seen = Arc::new(Mutex::new(0usize));
        let count = seen.clone();
        let (link_end, mut radio) = duplex(256);
        let (r, w) = split(link_end);
        let link = LinkBuilder::new()
            .listener(move |_: &Frame| *count.lock().unwrap() += 1)
            .start(r, w)
            .await
            .unwrap();

        radio
            .write_all(&build_text_frame(b"thump:\x02:\x03:UDP_CONNECTED>REMAINING_VIGILANT").unwrap())
            .await
            .unwrap();
        drop(radio);

        let status = link.link_status();
        link.wait_for_shutdown().await.unwrap();

        let snap = status.snapshot();
        assert!(snap.ready_for_downlink());
        assert_eq!(snap.uplink_endpoint, 3);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outcomes_taken_once() {
        let (a, _b) = duplex(64);
        let (r, w) = split(a);
        let mut link = LinkBuilder::new().start(r, w).await.unwrap();
        assert!(link.take_outcomes().is_some());
        assert!(link.take_outcomes().is_none());
        assert!(matches!(link.next_outcome().await, Err(LinkError::ChannelClosed)));
    }
}
