//! Transport to the radio interface.
//!
//! The link works over any split byte stream: a serial port, a TCP
//! socket to a bench simulator, or an in-memory duplex in tests. The write
//! half goes to the Tx pump directly; the read half is pumped by
//! [`spawn_reader`].

mod reader;

pub use reader::{spawn_reader, READ_BUFFER_SIZE};
