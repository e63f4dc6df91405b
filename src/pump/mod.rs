//! Rx and Tx pumps and the shared state they coordinate through.

mod gate;
mod queue;
mod rx;
mod tx;

pub use gate::CommandGate;
pub use queue::PayloadQueue;
pub use rx::spawn_rx_pump;
pub use tx::{CommandSender, DownlinkOutcome, TxPump};
