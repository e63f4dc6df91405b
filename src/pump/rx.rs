//! Rx pump: raw byte chunks in, frames out to listeners.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::correlator::Correlator;
use crate::error::Result;
use crate::handler::ListenerRegistry;
use crate::protocol::{Frame, Mpsm};

/// Spawn the Rx pump.
///
/// Chunks are processed strictly in arrival order. The pump owns the frame
/// buffer and resets it after each dispatch. It ends when the chunk sender
/// is dropped.
pub fn spawn_rx_pump(
    rx: mpsc::Receiver<Bytes>,
    mpsm: Mpsm,
    frame: Frame,
    registry: ListenerRegistry,
    correlator: Arc<Correlator>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(rx_loop(rx, mpsm, frame, registry, correlator))
}

async fn rx_loop(
    mut rx: mpsc::Receiver<Bytes>,
    mut mpsm: Mpsm,
    mut frame: Frame,
    mut registry: ListenerRegistry,
    correlator: Arc<Correlator>,
) -> Result<()> {
    correlator.mark_ready();

    while let Some(chunk) = rx.recv().await {
        mpsm.feed(&mut frame, &chunk, |f| registry.dispatch(f));
    }

    tracing::debug!("Rx pump stopped: {:?}", mpsm.stats());
    Ok(())
}
