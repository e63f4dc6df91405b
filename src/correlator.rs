//! Command / response correlation.
//!
//! Each command kind that expects an answer has an [`AwaitSlot`], a
//! single-value mailbox. The sender primes the slot *before* transmitting,
//! then awaits it with a bound; the Rx side delivers into it when the answer
//! is recognised. A response that lands between the transmit and the await
//! is kept in the slot and observed by the await.
//!
//! # Example
//!
//! ```
//! use radiolink::correlator::{AwaitSlot, Correlator, Outcome, Response};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let correlator = Correlator::new();
//! correlator.mark_ready();
//!
//! correlator.prime(AwaitSlot::SendChunk);
//! // ... transmit; the response arrives before we start waiting ...
//! correlator.deliver(AwaitSlot::SendChunk, Response::Code(0));
//!
//! let outcome = correlator
//!     .await_response(AwaitSlot::SendChunk, Duration::from_secs(1))
//!     .await;
//! assert_eq!(outcome, Outcome::Success(Response::Code(0)));
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::protocol::RESULT_OK;

/// Command kinds that wait for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwaitSlot {
    AcquireInterlock,
    SetTransmitSize,
    SendChunk,
}

impl AwaitSlot {
    const COUNT: usize = 3;

    #[inline]
    fn index(self) -> usize {
        match self {
            AwaitSlot::AcquireInterlock => 0,
            AwaitSlot::SetTransmitSize => 1,
            AwaitSlot::SendChunk => 2,
        }
    }
}

/// Value delivered into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Result code from a command response.
    Code(u16),
    /// The radio could not parse the command.
    BadSyntax,
    /// The interlock is now held locally.
    InterlockHeld,
    /// The radio kept the interlock.
    InterlockRefused,
}

impl Response {
    /// True for a zero result code or a granted interlock.
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Code(RESULT_OK) | Response::InterlockHeld)
    }
}

/// Result of awaiting a slot.
///
/// A delivered rejection is still `Success`; interpreting the response is up
/// to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(Response),
    /// Nothing arrived within the bound.
    Timeout,
    /// Nothing is feeding the correlator yet.
    NotReady,
}

/// Mailboxes for every [`AwaitSlot`].
pub struct Correlator {
    slots: [watch::Sender<Option<Response>>; AwaitSlot::COUNT],
    /// Slot the sender is currently waiting on, if any.
    awaited: Mutex<Option<AwaitSlot>>,
    ready: AtomicBool,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| watch::Sender::new(None)),
            awaited: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the Rx side as running. Awaits before this return `NotReady`.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[inline]
    fn slot(&self, slot: AwaitSlot) -> &watch::Sender<Option<Response>> {
        &self.slots[slot.index()]
    }

    fn set_awaited(&self, slot: Option<AwaitSlot>) {
        *self.awaited.lock().unwrap_or_else(PoisonError::into_inner) = slot;
    }

    /// Slot currently being awaited.
    pub fn awaited(&self) -> Option<AwaitSlot> {
        *self.awaited.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empty the slot and record it as awaited. Call before transmitting.
    pub fn prime(&self, slot: AwaitSlot) {
        self.slot(slot).send_replace(None);
        self.set_awaited(Some(slot));
    }

    /// Put a response in `slot`, replacing any unread one.
    pub fn deliver(&self, slot: AwaitSlot, response: Response) {
        if self.slot(slot).send_replace(Some(response)).is_some() {
            tracing::debug!("Overwrote unread response in {:?}", slot);
        }
    }

    /// Deliver to whichever slot is awaited. Returns `false` if none is.
    pub fn deliver_to_awaited(&self, response: Response) -> bool {
        match self.awaited() {
            Some(slot) => {
                self.deliver(slot, response);
                true
            }
            None => false,
        }
    }

    /// Wait up to `timeout` for a response in `slot` and take it.
    pub async fn await_response(&self, slot: AwaitSlot, timeout: Duration) -> Outcome {
        if !self.is_ready() {
            return Outcome::NotReady;
        }

        let mut rx = self.slot(slot).subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(Option::is_some).await.map(|_| ())
        })
        .await;

        let outcome = match waited {
            Ok(Ok(())) => self
                .slot(slot)
                .send_replace(None)
                .map_or(Outcome::Timeout, Outcome::Success),
            _ => {
                tracing::warn!("No response for {:?} within {:?}", slot, timeout);
                Outcome::Timeout
            }
        };
        if self.awaited() == Some(slot) {
            self.set_awaited(None);
        }
        outcome
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ready() -> Arc<Correlator> {
        let c = Arc::new(Correlator::new());
        c.mark_ready();
        c
    }

    #[tokio::test]
    async fn test_not_ready_before_rx_starts() {
        let c = Correlator::new();
        c.prime(AwaitSlot::SendChunk);
        c.deliver(AwaitSlot::SendChunk, Response::Code(0));
        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_millis(10))
            .await;
        assert_eq!(outcome, Outcome::NotReady);
    }

    #[tokio::test]
    async fn test_response_before_await_is_observed() {
        let c = ready();
        c.prime(AwaitSlot::SetTransmitSize);
        c.deliver(AwaitSlot::SetTransmitSize, Response::Code(0));

        let outcome = c
            .await_response(AwaitSlot::SetTransmitSize, Duration::from_millis(10))
            .await;
        assert_eq!(outcome, Outcome::Success(Response::Code(0)));
        assert_eq!(c.awaited(), None);
    }

    #[tokio::test]
    async fn test_response_after_await_starts() {
        let c = ready();
        c.prime(AwaitSlot::SendChunk);

        let deliverer = c.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            deliverer.deliver(AwaitSlot::SendChunk, Response::Code(0x0181));
        });

        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_secs(5))
            .await;
        // A rejection is still delivered as a response.
        assert_eq!(outcome, Outcome::Success(Response::Code(0x0181)));
        assert!(!Response::Code(0x0181).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_nothing_arrives() {
        let c = ready();
        c.prime(AwaitSlot::SendChunk);
        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_secs(30))
            .await;
        assert_eq!(outcome, Outcome::Timeout);
        assert_eq!(c.awaited(), None);
    }

    #[tokio::test]
    async fn test_prime_clears_stale_response() {
        let c = ready();
        c.deliver(AwaitSlot::SendChunk, Response::Code(0));
        c.prime(AwaitSlot::SendChunk);
        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let c = ready();
        c.prime(AwaitSlot::SendChunk);
        c.deliver(AwaitSlot::SetTransmitSize, Response::Code(0));
        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[tokio::test]
    async fn test_last_delivery_wins() {
        let c = ready();
        c.prime(AwaitSlot::SendChunk);
        c.deliver(AwaitSlot::SendChunk, Response::Code(1));
        c.deliver(AwaitSlot::SendChunk, Response::Code(0));
        let outcome = c
            .await_response(AwaitSlot::SendChunk, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, Outcome::Success(Response::Code(0)));
    }

    #[tokio::test]
    async fn test_deliver_to_awaited() {
        let c = ready();
        assert!(!c.deliver_to_awaited(Response::BadSyntax));

        c.prime(AwaitSlot::SetTransmitSize);
        assert!(c.deliver_to_awaited(Response::BadSyntax));
        let outcome = c
            .await_response(AwaitSlot::SetTransmitSize, Duration::from_millis(5))
            .await;
        assert_eq!(outcome, Outcome::Success(Response::BadSyntax));
    }

    #[test]
    fn test_response_is_ok() {
        assert!(Response::Code(RESULT_OK).is_ok());
        assert!(Response::InterlockHeld.is_ok());
        assert!(!Response::InterlockRefused.is_ok());
        assert!(!Response::BadSyntax.is_ok());
    }
}
