//! # radiolink
//!
//! Protocol engine for a rover's Wi-Fi radio link.
//!
//! The radio interleaves two protocols on one byte stream:
//!
//! - **Text** frames carrying direct messages from the radio's own firmware
//!   (heartbeats, state, activity, interlock, errors)
//! - **Structured** frames carrying command responses and events of the
//!   radio module's binary command API
//!
//! This crate splits that stream back into frames, keeps a consistent view
//! of the link, correlates the commands it sends with their responses, and
//! drives downlink payloads through the radio chunk by chunk.
//!
//! ## Example
//!
//! ```no_run
//! use radiolink::LinkBuilder;
//!
//! #[tokio::main]
//! async fn main() -> radiolink::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:4000").await?;
//!     let (reader, writer) = stream.into_split();
//!
//!     let link = LinkBuilder::new()
//!         .hello_message("hello from the rover")
//!         .start(reader, writer)
//!         .await?;
//!
//!     link.downlink(&b"first telemetry"[..])?;
//!     link.wait_for_shutdown().await
//! }
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod direct_message;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod pump;
pub mod status;
pub mod transport;

mod link;

pub use config::LinkConfig;
pub use error::{LinkError, Result};
pub use link::{Link, LinkBuilder};
pub use pump::DownlinkOutcome;
pub use status::{LinkStatus, StatusSnapshot};
