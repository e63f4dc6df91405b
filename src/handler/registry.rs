//! Frame listener registry.
//!
//! The Rx pump dispatches every completed frame to each registered listener,
//! in registration order. The number of listeners is bounded and fixed once
//! the link starts.
//!
//! # Example
//!
//! ```
//! use radiolink::handler::ListenerRegistry;
//! use radiolink::protocol::{Frame, FrameKind};
//!
//! let mut registry = ListenerRegistry::new(2);
//! registry
//!     .register(|frame: &Frame| {
//!         if frame.kind() == FrameKind::Text {
//!             println!("text frame: {} bytes", frame.len());
//!         }
//!     })
//!     .unwrap();
//! assert_eq!(registry.len(), 1);
//! ```

use crate::error::{LinkError, Result};
use crate::protocol::Frame;

/// Receives every completed frame.
///
/// The frame is borrowed for the duration of the call only; copy the payload
/// out with [`Frame::payload_bytes`] to keep it.
pub trait FrameListener: Send + 'static {
    fn on_frame(&mut self, frame: &Frame);
}

impl<F> FrameListener for F
where
    F: FnMut(&Frame) + Send + 'static,
{
    fn on_frame(&mut self, frame: &Frame) {
        self(frame)
    }
}

/// Bounded list of listeners.
pub struct ListenerRegistry {
    listeners: Vec<Box<dyn FrameListener>>,
    max: usize,
}

impl ListenerRegistry {
    /// Create an empty registry accepting at most `max` listeners.
    pub fn new(max: usize) -> Self {
        Self {
            listeners: Vec::with_capacity(max),
            max,
        }
    }

    /// Add a listener.
    ///
    /// Returns `Err(ListenerCapacity)` when the registry is full.
    pub fn register<L: FrameListener>(&mut self, listener: L) -> Result<()> {
        self.register_boxed(Box::new(listener))
    }

    pub fn register_boxed(&mut self, listener: Box<dyn FrameListener>) -> Result<()> {
        if self.listeners.len() >= self.max {
            return Err(LinkError::ListenerCapacity(self.max));
        }
        self.listeners.push(listener);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call every listener with `frame`, in registration order.
    pub fn dispatch(&mut self, frame: &Frame) {
        for listener in self.listeners.iter_mut() {
            listener.on_frame(frame);
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .field("max", &self.max)
            .finish()
    }
}
