//! Byte source pump.
//!
//! Reads whatever the radio interface produces and forwards it, chunk by
//! chunk, to the Rx pump. Chunk boundaries carry no meaning.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{LinkError, Result};

/// Read buffer size. Radio interfaces deliver far less than this per read.
pub const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Spawn a task reading `reader` into `chunks` until end of stream.
///
/// The task ends with `Ok(())` on end of stream or when the receiver is
/// dropped, and with the I/O error otherwise.
pub fn spawn_reader<R>(reader: R, chunks: mpsc::Sender<Bytes>) -> JoinHandle<Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_loop(reader, chunks))
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, chunks: mpsc::Sender<Bytes>) -> Result<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()), // Interface closed
            Ok(n) => n,
            Err(e) => return Err(LinkError::Io(e)),
        };

        if chunks.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
            tracing::debug!("Rx pump gone, reader stopping");
            return Ok(());
        }
    }
}
