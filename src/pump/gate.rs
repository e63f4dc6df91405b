//! Command-in-flight gate.
//!
//! The radio handles one structured command at a time. [`CommandGate`] is the
//! flag marking that a command has been sent and its response has not been
//! seen yet. It is acquired when a command is transmitted and released by the
//! Rx side on any command response, by a syntax error carrying a non-zero
//! result, or by the Tx pump after giving up on a command.
//!
//! A response that never comes would block the link forever, so a held gate
//! lapses after the processing timeout.
//!
//! # Configuration
//!
//! - `processing_timeout_ms`: age after which a held gate lapses (default: 5000)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SharedClock;
use crate::config::DEFAULT_COMMAND_PROCESSING_TIMEOUT_MS;
use crate::error::{LinkError, Result};

/// Shared command-in-flight flag with automatic expiry.
///
/// Cloning shares the same flag.
#[derive(Clone)]
pub struct CommandGate {
    busy: Arc<AtomicBool>,
    /// Clock reading when the gate was last acquired.
    acquired_ms: Arc<AtomicU64>,
    processing_timeout_ms: u64,
    clock: SharedClock,
}

impl CommandGate {
    /// Create an idle gate with the default processing timeout.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_timeout(clock, DEFAULT_COMMAND_PROCESSING_TIMEOUT_MS)
    }

    /// Create an idle gate with a custom processing timeout.
    pub fn with_timeout(clock: SharedClock, processing_timeout_ms: u64) -> Self {
        Self {
            busy: Arc::new(AtomicBool::new(false)),
            acquired_ms: Arc::new(AtomicU64::new(0)),
            processing_timeout_ms,
            clock,
        }
    }

    /// Check whether a command is in flight, expiring a stale hold.
    pub fn is_busy(&self) -> bool {
        if !self.busy.load(Ordering::Acquire) {
            return false;
        }
        let held_for = self
            .clock
            .now_ms()
            .saturating_sub(self.acquired_ms.load(Ordering::Acquire));
        if held_for > self.processing_timeout_ms {
            tracing::debug!("Command gate lapsed after {} ms without a response", held_for);
            self.busy.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Mark a command as in flight.
    ///
    /// Returns `Err(TooManyRequests)` if one already is.
    pub fn try_acquire(&self) -> Result<()> {
        // Expire a stale hold first.
        self.is_busy();
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LinkError::TooManyRequests);
        }
        self.acquired_ms.store(self.clock.now_ms(), Ordering::Release);
        Ok(())
    }

    /// Mark the in-flight command as finished.
    #[inline]
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Wait until no command is in flight, polling every `poll`.
    pub async fn wait_idle(&self, poll: Duration) {
        while self.is_busy() {
            tokio::time::sleep(poll).await;
        }
    }
}

impl std::fmt::Debug for CommandGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGate")
            .field("busy", &self.busy.load(Ordering::Acquire))
            .field("processing_timeout_ms", &self.processing_timeout_ms)
            .finish()
    }
}
