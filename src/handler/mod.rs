//! Frame listeners.
//!
//! Provides:
//! - [`ListenerRegistry`] - bounded list of listeners the Rx pump dispatches to
//! - [`FrameListener`] - the listener trait, implemented for closures
//! - [`LinkRouter`] - built-in listener maintaining link state

mod registry;
mod router;

pub use registry::{FrameListener, ListenerRegistry};
pub use router::{
    uplink_ack, LinkRouter, UPLINK_ACK_HEADER, UPLINK_DROPPED_ALERT, UPLINK_RESET_COMMAND,
    UPLINK_RESET_REPLY,
};
