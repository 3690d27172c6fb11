//! A handle to the write half of one live peer connection.
//!
//! Each side of the proxy (analyzer-facing, LIS-facing) has at most one
//! live [`PeerHandle`] at a time, published through a `watch` channel so
//! forwarding/drain tasks can pick up the current connection without a
//! separate check-then-act lookup. The handle owns the write half behind
//! an async mutex so concurrent writers (direct forward vs. queue drain)
//! serialize naturally instead of interleaving bytes on the wire.

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One live outbound connection to a peer (analyzer or LIS).
pub struct PeerHandle {
    write_half: Mutex<WriteHalf<TcpStream>>,
}

impl PeerHandle {
    pub fn new(write_half: WriteHalf<TcpStream>) -> Self {
        Self {
            write_half: Mutex::new(write_half),
        }
    }

    /// Write an already-MLLP-framed record to the peer.
    pub async fn write_framed(&self, framed: &[u8]) -> std::io::Result<()> {
        let mut half = self.write_half.lock().await;
        half.write_all(framed).await?;
        half.flush().await
    }
}
