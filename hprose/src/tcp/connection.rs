use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::Packet;
use crate::{Error, ErrorKind, Result};

/// An encoded frame and the signal fired once it is on the socket.
pub(crate) type Frame = (Bytes, oneshot::Sender<()>);

struct ConnectionState {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

/// Handle to one accepted connection.
///
/// Cloning is cheap. Frames sent through any clone are handed whole to the
/// connection's writer task, so concurrent responses never interleave.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionState>);

impl Connection {
    pub(crate) fn new(
        id: u64,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        sender: mpsc::Sender<Frame>,
    ) -> Self {
        Self(Arc::new(ConnectionState {
            id,
            peer_addr,
            local_addr,
            sender,
            closed: CancellationToken::new(),
        }))
    }

    /// Identifier unique within one [`SocketService`](crate::SocketService).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.0.peer_addr
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    /// Sends one frame and waits until it has been written to the socket.
    ///
    /// # Errors
    ///
    /// Fails if the frame cannot be encoded, or the connection closes before
    /// the frame is written.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        let (written, wait) = oneshot::channel();
        self.0
            .sender
            .send((bytes, written))
            .await
            .map_err(|e| Error::new(ErrorKind::TcpSendFailed, e.to_string()))?;
        wait.await
            .map_err(|_| Error::new(ErrorKind::TcpSendFailed, "connection closed before write"))
    }

    /// Ends the connection. Frames already queued are still written.
    pub fn close(&self) {
        self.0.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.is_cancelled()
    }

    /// Completes once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.0.closed.cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.0.id)
            .field("peer_addr", &self.0.peer_addr)
            .field("local_addr", &self.0.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
