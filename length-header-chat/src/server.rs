//! Broadcast server: every message received from any connection is re-framed
//! and sent to every live connection.

use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, FrameError, LengthHeaderCodec},
    connection::{ConnectionHandle, ConnectionHandler, log_transition},
    net,
    registry::ConnectionRegistry,
};

/// Whether the sender of a message gets its own message back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Fan out to every connection, sender included.
    #[default]
    IncludeSender,
    /// Fan out to every connection except the one the message came from.
    ExcludeSender,
}

pub struct BroadcastServer {
    codec: LengthHeaderCodec,
    registry: ConnectionRegistry,
    echo: EchoPolicy,
}

impl BroadcastServer {
    pub fn new(codec: LengthHeaderCodec, echo: EchoPolicy) -> Self {
        Self {
            codec,
            registry: ConnectionRegistry::new(),
            echo,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

impl ConnectionHandler for BroadcastServer {
    fn on_connection(&self, conn: &ConnectionHandle, connected: bool) {
        if connected {
            self.registry.on_connect(conn.clone());
        } else {
            self.registry.on_disconnect(conn.id());
        }
        log_transition(conn, connected);
    }

    fn on_bytes_available(
        &self,
        conn: &ConnectionHandle,
        buffer: &mut BytesMut,
    ) -> Result<(), FrameError> {
        for message in self.codec.decode(buffer) {
            self.on_message(conn, message?);
        }
        Ok(())
    }

    fn on_message(&self, conn: &ConnectionHandle, message: Bytes) {
        let frame = match self.codec.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(conn = %conn.id(), error = %err, "not broadcasting message");
                return;
            }
        };

        self.registry.for_each(|peer| {
            if self.echo == EchoPolicy::ExcludeSender && peer.id() == conn.id() {
                return;
            }
            peer.send(frame.clone());
        });
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_frame_len: u32,
    pub echo: EchoPolicy,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            echo: EchoPolicy::default(),
        }
    }
}

/// A running server. Dropping the handle leaves the server running until the
/// process exits; call [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    local_addr: SocketAddr,
    server: Arc<BroadcastServer>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Bind the listener and start accepting connections in the background.
pub async fn start(config: ServerConfig) -> Result<ServerHandle> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    let local_addr = listener.local_addr()?;

    let codec = LengthHeaderCodec::new(config.max_frame_len);
    let server = Arc::new(BroadcastServer::new(codec, config.echo));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(net::serve(listener, Arc::clone(&server), shutdown_rx));

    Ok(ServerHandle {
        local_addr,
        server,
        shutdown,
        task,
    })
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.server.connection_count()
    }

    /// Stop accepting, close every connection and wait for them to finish.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("server task panicked")
    }

    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        info!("shutdown requested");
        self.shutdown().await
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}
