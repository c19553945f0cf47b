//! The surface shared between the transport runtime and the chat components.
//!
//! The runtime owns every socket. Components only see a [`ConnectionHandle`]:
//! a cheap, cloneable lookup key with a non-blocking `send` that queues bytes
//! for the connection's writer task. Holding a handle never keeps a
//! connection alive.

use std::{fmt, net::SocketAddr};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::codec::FrameError;

/// Identifier the runtime assigns to each connection, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Non-owning reference to a live transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    local: SocketAddr,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        local: SocketAddr,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            id,
            local,
            peer,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queue already-framed bytes for delivery. Never blocks.
    ///
    /// Sending on a connection that has gone away is silently dropped.
    pub fn send(&self, frame: Bytes) {
        if self.outbound.send(frame).is_err() {
            debug!(conn = %self.id, peer = %self.peer, "dropping frame for closed connection");
        }
    }
}

/// Callbacks the runtime drives for every connection.
///
/// All three run on the connection's own task. `on_connection(.., true)` is
/// always delivered before any bytes, and `on_connection(.., false)` exactly
/// once when the connection ends for any reason.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connection(&self, conn: &ConnectionHandle, connected: bool);

    /// New bytes were appended to `buffer`, the connection's decode buffer.
    ///
    /// Returning an error tells the runtime to close this connection.
    fn on_bytes_available(
        &self,
        conn: &ConnectionHandle,
        buffer: &mut BytesMut,
    ) -> Result<(), FrameError>;

    fn on_message(&self, conn: &ConnectionHandle, message: Bytes);
}

/// One log line per connection transition.
pub(crate) fn log_transition(conn: &ConnectionHandle, connected: bool) {
    info!(
        conn = %conn.id(),
        "{} -> {} is {}",
        conn.local_addr(),
        conn.peer_addr(),
        if connected { "UP" } else { "DOWN" }
    );
}


#[cfg(test)]
mod tests {
    use super::test_support::{drain, fake_connection};

    use bytes::Bytes;

    #[test]
    fn send_queues_frame_for_writer() {
        let (conn, mut rx) = fake_connection(1);
        conn.send(Bytes::from_static(b"frame"));

        assert_eq!(drain(&mut rx), vec![Bytes::from_static(b"frame")]);
    }

    #[test]
    fn send_after_close_is_silent() {
        let (conn, rx) = fake_connection(1);
        drop(rx);

        conn.send(Bytes::from_static(b"lost"));
    }

    #[test]
    fn id_display_is_compact() {
        let (conn, _rx) = fake_connection(7);
        assert_eq!(conn.id().to_string(), "#7");
    }
}
