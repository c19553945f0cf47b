//! Tokio transport that drives [`ConnectionHandler`]s.
//!
//! Each connection gets a reader loop that appends socket reads to the
//! connection's decode buffer and hands it to the handler, plus a writer task
//! draining the handle's outbound queue. Shutdown is broadcast through a
//! `watch` channel that every loop selects on.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::{mpsc, watch},
    task::JoinSet,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionHandler, ConnectionId};

const READ_CHUNK: usize = 8 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Backoff used by the client while (re)establishing its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Why a connection's reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Closed {
    PeerClosed,
    ReadFailed,
    ProtocolViolation,
    Shutdown,
}

/// Resolves once `true` is published on `shutdown`.
///
/// A dropped sender is not a shutdown request: handles may be dropped while
/// the server or client keeps running.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Accept connections until `shutdown` fires, then close them all.
pub(crate) async fn serve<H: ConnectionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        select! {
            _ = stop_requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let handler = Arc::clone(&handler);
                    let shutdown = shutdown.clone();
                    connections.spawn(drive_connection(stream, handler, shutdown));
                }
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(open = connections.len(), "server shutting down");
    while connections.join_next().await.is_some() {}
}

/// Keep one connection to `server` up until `shutdown` fires.
pub(crate) async fn connect_with_retry<H: ConnectionHandler>(
    server: String,
    handler: Arc<H>,
    retry: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = retry.initial;

    loop {
        let attempt = select! {
            _ = stop_requested(&mut shutdown) => return,
            attempt = TcpStream::connect(server.as_str()) => attempt,
        };

        match attempt {
            Ok(stream) => {
                delay = retry.initial;
                let closed = drive_connection(stream, Arc::clone(&handler), shutdown.clone()).await;
                if closed == Closed::Shutdown {
                    return;
                }
                info!(%server, retry_in = ?delay, "connection lost, reconnecting");
            }
            Err(err) => {
                warn!(%server, error = ?err, retry_in = ?delay, "failed to connect");
            }
        }

        select! {
            _ = stop_requested(&mut shutdown) => return,
            _ = sleep(delay) => {}
        }
        delay = retry.next_delay(delay);
    }
}

pub(crate) async fn drive_connection<H: ConnectionHandler>(
    stream: TcpStream,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) -> Closed {
    let (local, peer) = match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(peer)) => (local, peer),
        (Err(err), _) | (_, Err(err)) => {
            warn!(error = ?err, "dropping connection without addresses");
            return Closed::ReadFailed;
        }
    };

    let (mut reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(next_connection_id(), local, peer, outbound_tx);
    let writer_task = tokio::spawn(write_frames(writer, outbound_rx));

    handler.on_connection(&handle, true);

    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let closed = loop {
        select! {
            _ = stop_requested(&mut shutdown) => break Closed::Shutdown,
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => break Closed::PeerClosed,
                Ok(_) => {
                    if let Err(err) = handler.on_bytes_available(&handle, &mut buffer) {
                        warn!(conn = %handle.id(), %peer, error = %err, "closing connection");
                        break Closed::ProtocolViolation;
                    }
                }
                Err(err) => {
                    debug!(conn = %handle.id(), %peer, error = ?err, "read failed");
                    break Closed::ReadFailed;
                }
            },
        }
        if buffer.capacity() == buffer.len() {
            buffer.reserve(READ_CHUNK);
        }
    };

    handler.on_connection(&handle, false);

    // Anything still queued belongs to a connection that no longer exists.
    writer_task.abort();
    if let Err(err) = writer_task.await {
        if err.is_panic() {
            warn!(conn = %handle.id(), error = ?err, "writer task panicked");
        }
    }
    debug!(conn = %handle.id(), ?closed, "connection finished");
    closed
}

async fn write_frames(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            debug!(error = ?err, "write failed");
            return;
        }
    }
}
