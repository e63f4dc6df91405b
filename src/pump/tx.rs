//! Tx side: command transmission and the downlink state machine.
//!
//! [`CommandSender`] owns the byte sink. It writes raw bytes with bounded
//! retries, and pairs each structured command with the command gate and a
//! correlator slot.
//!
//! [`TxPump`] drives one downlink payload at a time through the radio:
//!
//! ```text
//! WaitForCommandReady -> WaitForNextMessage -> StartSending
//!   -> [WaitForInterlock] -> SendSetTransmitSize -> WaitSetTransmitSizeAck
//!   -> SendChunk <-> WaitChunkAck -> Done -> WaitForCommandReady
//! ```
//!
//! Any command that fails `command_max_tries` times leads to
//! `CommandFailed`, which either drops the payload (the link claimed to be
//! connected, so something is badly wrong) or restarts it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::gate::CommandGate;
use super::queue::PayloadQueue;
use crate::config::LinkConfig;
use crate::correlator::{AwaitSlot, Correlator, Outcome, Response};
use crate::direct_message::{InterlockHolder, RadioPhase};
use crate::error::{LinkError, Result};
use crate::protocol::{encode_send_endpoint, encode_set_transmit_size, MAX_CHUNK_LEN};
use crate::status::{LinkStatus, LinkUpdate};

/// Writes commands to the radio.
pub struct CommandSender<W> {
    writer: W,
    gate: CommandGate,
    correlator: Arc<Correlator>,
    transmit_max_tries: u32,
    response_timeout: Duration,
}

impl<W> CommandSender<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        writer: W,
        gate: CommandGate,
        correlator: Arc<Correlator>,
        transmit_max_tries: u32,
        response_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            gate,
            correlator,
            transmit_max_tries,
            response_timeout,
        }
    }

    #[inline]
    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    /// Write `bytes` and flush, retrying up to `transmit_max_tries` times.
    ///
    /// A retry resumes after the bytes already written, so a partial write
    /// never puts a second copy of the frame start on the wire.
    pub async fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        let mut remaining = bytes;
        let mut attempts = 0;
        while attempts < self.transmit_max_tries {
            attempts += 1;
            let written = async {
                self.writer.write_all_buf(&mut remaining).await?;
                self.writer.flush().await
            }
            .await;
            match written {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("Transmit attempt {} failed: {}", attempts, e);
                }
            }
        }
        tracing::error!("Transmit failed after {} attempts", attempts);
        Err(LinkError::TransmitFailed { attempts })
    }

    /// Transmit a structured command, marking it in flight.
    ///
    /// Returns `Err(TooManyRequests)` if another command is in flight.
    pub async fn try_transmit(&mut self, bytes: &[u8]) -> Result<()> {
        self.gate.try_acquire()?;
        if let Err(e) = self.transmit(bytes).await {
            self.gate.release();
            return Err(e);
        }
        Ok(())
    }

    /// Prime `slot`, then transmit. The slot is primed first so a fast
    /// response is not missed.
    pub async fn send_command(&mut self, slot: AwaitSlot, bytes: &[u8]) -> Result<()> {
        self.correlator.prime(slot);
        self.try_transmit(bytes).await
    }

    /// Empty `slot` and mark it awaited, for responses not tied to a
    /// command we send.
    pub fn prime(&self, slot: AwaitSlot) {
        self.correlator.prime(slot);
    }

    /// Wait for the response to a command sent with [`send_command`](Self::send_command).
    pub async fn await_response(&mut self, slot: AwaitSlot) -> Outcome {
        self.correlator
            .await_response(slot, self.response_timeout)
            .await
    }

    /// Send a command and wait for its response.
    pub async fn send_and_await(&mut self, slot: AwaitSlot, bytes: &[u8]) -> Result<Outcome> {
        self.send_command(slot, bytes).await?;
        Ok(self.await_response(slot).await)
    }
}

/// Result of one downlink payload, published on the outcome queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkOutcome {
    /// Every chunk was acknowledged.
    Delivered { bytes: usize },
    /// A command could not be written to the radio after `attempts` tries.
    /// `dropped` is false when the payload will be restarted once the link
    /// is back.
    TransmitFailed {
        bytes: usize,
        attempts: u32,
        dropped: bool,
    },
    /// A command ran out of retries. `dropped` has the same meaning.
    CommandFailed { bytes: usize, dropped: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    WaitForCommandReady,
    WaitForNextMessage,
    StartSending,
    WaitForInterlock,
    SendSetTransmitSize,
    WaitSetTransmitSizeAck,
    SendChunk,
    WaitChunkAck,
    Done,
    CommandFailed,
}

impl TxState {
    /// States that hold a partly sent payload.
    fn is_mid_message(self) -> bool {
        !matches!(
            self,
            TxState::WaitForCommandReady | TxState::WaitForNextMessage | TxState::StartSending
        )
    }
}

/// Downlink state machine.
pub struct TxPump<W> {
    sender: CommandSender<W>,
    status: LinkStatus,
    downlink: PayloadQueue,
    outcomes: mpsc::Sender<DownlinkOutcome>,
    state: TxState,
    message: Bytes,
    endpoint: u8,
    /// Bytes of `message` acknowledged so far.
    sent: usize,
    /// Length of the chunk awaiting acknowledgement.
    chunk_len: usize,
    fail_count: u32,
    /// Write attempts of the command whose transmit failed, if that is
    /// why the payload is failing.
    transmit_failure: Option<u32>,
    hello: Option<Bytes>,
    command_max_tries: u32,
    poll: Duration,
    require_interlock: bool,
    interlock_expiration_ms: u64,
}

impl<W> TxPump<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        sender: CommandSender<W>,
        status: LinkStatus,
        downlink: PayloadQueue,
        outcomes: mpsc::Sender<DownlinkOutcome>,
        config: &LinkConfig,
    ) -> Self {
        Self {
            sender,
            status,
            downlink,
            outcomes,
            state: TxState::WaitForCommandReady,
            message: Bytes::new(),
            endpoint: 0,
            sent: 0,
            chunk_len: 0,
            fail_count: 0,
            transmit_failure: None,
            hello: config
                .hello_message
                .as_ref()
                .map(|m| Bytes::copy_from_slice(m.as_bytes())),
            command_max_tries: config.command_max_tries,
            poll: config.ready_poll_interval(),
            require_interlock: config.require_interlock,
            interlock_expiration_ms: config.interlock_expiration_ms,
        }
    }

    /// Spawn the pump. It runs until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        loop {
            self.step().await;
        }
    }

    fn publish(&self, outcome: DownlinkOutcome) {
        if self.outcomes.try_send(outcome).is_err() {
            tracing::debug!("Outcome queue unavailable, dropped {:?}", outcome);
        }
    }

    fn transition(&mut self, next: TxState) {
        tracing::debug!("Tx {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn wait_until_ready(&mut self) {
        while !self.status.snapshot().ready_for_downlink() {
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Count a failed attempt; give up after `command_max_tries`.
    fn retry_or_fail(&mut self, retry: TxState) {
        self.fail_count += 1;
        if self.fail_count > self.command_max_tries {
            tracing::error!(
                "Command failed {} times in {:?}, giving up",
                self.fail_count,
                self.state
            );
            self.transition(TxState::CommandFailed);
        } else {
            self.transition(retry);
        }
    }

    fn on_transmit_error(&mut self, error: LinkError) {
        if let LinkError::TransmitFailed { attempts } = error {
            self.transmit_failure = Some(attempts);
        } else {
            tracing::error!("Command not sent: {}", error);
        }
        self.transition(TxState::CommandFailed);
    }

    async fn step(&mut self) {
        if !self.status.snapshot().ready_for_downlink() {
            if self.state.is_mid_message() {
                tracing::debug!("Link lost mid-payload, restarting it");
                self.transition(TxState::StartSending);
            }
            self.wait_until_ready().await;
        }

        match self.state {
            TxState::WaitForCommandReady => {
                self.sender.gate().wait_idle(self.poll).await;
                self.transition(TxState::WaitForNextMessage);
            }
            TxState::WaitForNextMessage => {
                self.message = match self.hello.take() {
                    Some(hello) => hello,
                    None => self.downlink.pop().await,
                };
                self.transition(TxState::StartSending);
            }
            TxState::StartSending => {
                self.endpoint = self.status.snapshot().downlink_endpoint;
                self.sent = 0;
                self.fail_count = 0;
                let next = if self.require_interlock {
                    TxState::WaitForInterlock
                } else {
                    TxState::SendSetTransmitSize
                };
                self.transition(next);
            }
            TxState::WaitForInterlock => self.wait_for_interlock().await,
            TxState::SendSetTransmitSize => {
                self.sender.gate().wait_idle(self.poll).await;
                let sent = match encode_set_transmit_size(self.endpoint, self.message.len() as u16)
                {
                    Ok(bytes) => {
                        self.sender
                            .send_command(AwaitSlot::SetTransmitSize, &bytes)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(()) => self.transition(TxState::WaitSetTransmitSizeAck),
                    Err(e) => self.on_transmit_error(e),
                }
            }
            TxState::WaitSetTransmitSizeAck => {
                match self.sender.await_response(AwaitSlot::SetTransmitSize).await {
                    Outcome::Success(r) if r.is_ok() => {
                        self.fail_count = 0;
                        let next = if self.message.is_empty() {
                            TxState::Done
                        } else {
                            TxState::SendChunk
                        };
                        self.transition(next);
                    }
                    other => {
                        tracing::debug!("Set transmit size not acknowledged: {:?}", other);
                        self.retry_or_fail(TxState::SendSetTransmitSize);
                    }
                }
            }
            TxState::SendChunk => {
                self.sender.gate().wait_idle(self.poll).await;
                let end = (self.sent + MAX_CHUNK_LEN).min(self.message.len());
                let chunk = self.message.slice(self.sent..end);
                self.chunk_len = chunk.len();
                let sent = match encode_send_endpoint(self.endpoint, &chunk) {
                    Ok(bytes) => self.sender.send_command(AwaitSlot::SendChunk, &bytes).await,
                    Err(e) => Err(e),
                };
                match sent {
                    Ok(()) => self.transition(TxState::WaitChunkAck),
                    Err(e) => self.on_transmit_error(e),
                }
            }
            TxState::WaitChunkAck => {
                match self.sender.await_response(AwaitSlot::SendChunk).await {
                    Outcome::Success(r) if r.is_ok() => {
                        self.status.apply(LinkUpdate::DownlinkChunkSent {
                            bytes: self.chunk_len,
                        });
                        self.sent += self.chunk_len;
                        self.fail_count = 0;
                        let next = if self.sent >= self.message.len() {
                            TxState::Done
                        } else {
                            TxState::SendChunk
                        };
                        self.transition(next);
                    }
                    other => {
                        tracing::debug!("Chunk not acknowledged: {:?}", other);
                        self.retry_or_fail(TxState::SendChunk);
                    }
                }
            }
            TxState::Done => {
                self.status.apply(LinkUpdate::DownlinkPacketSent);
                self.publish(DownlinkOutcome::Delivered {
                    bytes: self.message.len(),
                });
                self.message = Bytes::new();
                self.transition(TxState::WaitForCommandReady);
            }
            TxState::CommandFailed => self.command_failed(),
        }
    }

    async fn wait_for_interlock(&mut self) {
        if self.status.interlock(self.interlock_expiration_ms) == InterlockHolder::Herc {
            self.transition(TxState::SendSetTransmitSize);
            return;
        }
        // The radio hands the interlock over on its own schedule. Anything
        // left in the slot predates this wait.
        self.sender.prime(AwaitSlot::AcquireInterlock);
        if self.status.interlock(self.interlock_expiration_ms) == InterlockHolder::Herc {
            self.transition(TxState::SendSetTransmitSize);
            return;
        }
        match self.sender.await_response(AwaitSlot::AcquireInterlock).await {
            Outcome::Success(Response::InterlockHeld) => {
                self.fail_count = 0;
                self.transition(TxState::SendSetTransmitSize);
            }
            other => {
                tracing::debug!("Interlock not granted: {:?}", other);
                self.retry_or_fail(TxState::WaitForInterlock);
            }
        }
    }

    fn command_failed(&mut self) {
        let connected = self.status.snapshot().phase == RadioPhase::UdpConnected;
        let bytes = self.message.len();

        if connected {
            // The radio claims to be connected but will not take our commands.
            self.status.apply(LinkUpdate::CriticalFailure(true));
            self.message = Bytes::new();
        }
        let outcome = match self.transmit_failure.take() {
            Some(attempts) => DownlinkOutcome::TransmitFailed {
                bytes,
                attempts,
                dropped: connected,
            },
            None => DownlinkOutcome::CommandFailed {
                bytes,
                dropped: connected,
            },
        };
        self.publish(outcome);

        // Wait for the next heartbeat to tell us where the link is.
        self.status.apply(LinkUpdate::ResetPhase);
        self.sender.gate().release();

        let next = if connected {
            TxState::WaitForCommandReady
        } else {
            TxState::StartSending
        };
        self.transition(next);
    }
}
