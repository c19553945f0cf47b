//! Single-connection chat client.
//!
//! The runtime task owns the socket and reports connect/disconnect through
//! [`ConnectionHandler`]; any other thread may call [`MessageClient::send`].
//! The only state they share is the mailbox slot holding the current
//! connection handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, FrameError, LengthHeaderCodec},
    connection::{ConnectionHandle, ConnectionHandler, log_transition},
    net::{self, RetryPolicy},
};

type MessageCallback = Box<dyn Fn(Bytes) + Send + Sync>;

pub struct MessageClient {
    codec: LengthHeaderCodec,
    mailbox: Mutex<Option<ConnectionHandle>>,
    on_received: MessageCallback,
}

impl MessageClient {
    pub fn new<F>(codec: LengthHeaderCodec, on_received: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        Self {
            codec,
            mailbox: Mutex::new(None),
            on_received: Box::new(on_received),
        }
    }

    /// Frame `message` and hand it to the current connection, if any.
    ///
    /// At most once: with no live connection the message is dropped and the
    /// call still succeeds. Nothing is queued for a later connection.
    ///
    /// # Errors
    ///
    /// [`FrameError::FrameTooLarge`] if `message` exceeds the frame limit.
    pub fn send(&self, message: &[u8]) -> Result<(), FrameError> {
        let frame = self.codec.encode(message)?;
        // `send` only pushes onto the writer's queue, so holding the lock
        // across it never waits on the network.
        if let Some(conn) = self.mailbox().as_ref() {
            conn.send(frame);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.mailbox().is_some()
    }

    fn mailbox(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionHandler for MessageClient {
    fn on_connection(&self, conn: &ConnectionHandle, connected: bool) {
        *self.mailbox() = connected.then(|| conn.clone());
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

    fn on_message(&self, _conn: &ConnectionHandle, message: Bytes) {
        (self.on_received)(message);
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`, resolved again on every connection attempt.
    pub server: String,
    pub max_frame_len: u32,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            retry: RetryPolicy::default(),
        }
    }
}

/// A client whose connection is maintained in the background.
///
/// Dropping the handle does not stop the client; call
/// [`ClientHandle::shutdown`] for that.
pub struct ClientHandle {
    client: Arc<MessageClient>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Start connecting to `config.server`, retrying until [`ClientHandle::shutdown`].
///
/// Must be called from within a tokio runtime. `on_received` is invoked on
/// the runtime for every message the server delivers.
pub fn connect<F>(config: ClientConfig, on_received: F) -> ClientHandle
where
    F: Fn(Bytes) + Send + Sync + 'static,
{
    let codec = LengthHeaderCodec::new(config.max_frame_len);
    let client = Arc::new(MessageClient::new(codec, on_received));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(net::connect_with_retry(
        config.server,
        Arc::clone(&client),
        config.retry,
        shutdown_rx,
    ));

    ClientHandle {
        client,
        shutdown,
        task,
    }
}

impl ClientHandle {
    /// Shared handle for producers on other threads.
    pub fn client(&self) -> Arc<MessageClient> {
        Arc::clone(&self.client)
    }

    pub fn send(&self, message: &[u8]) -> Result<(), FrameError> {
        self.client.send(message)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Stop reconnecting and close the current connection.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("client task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{drain, fake_connection};

    fn client() -> (MessageClient, Arc<Mutex<Vec<Bytes>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let client = MessageClient::new(LengthHeaderCodec::default(), move |message| {
            sink.lock().expect("sink lock").push(message);
        });
        (client, received)
    }

    #[test]
    fn send_without_connection_is_a_no_op() {
        let (client, _) = client();

        assert!(!client.is_connected());
        client.send(b"nobody listening").expect("silent no-op");
    }

    #[test]
    fn send_frames_onto_live_connection() {
        let (client, _) = client();
        let (conn, mut rx) = fake_connection(1);
        client.on_connection(&conn, true);

        client.send(b"alice>> hi").expect("send");

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..4], &[0, 0, 0, 10]);
        assert_eq!(&frames[0][4..], b"alice>> hi");
    }

    #[test]
    fn disconnect_clears_mailbox() {
        let (client, _) = client();
        let (conn, mut rx) = fake_connection(1);
        client.on_connection(&conn, true);
        client.on_connection(&conn, false);

        client.send(b"dropped").expect("silent no-op");

        assert!(!client.is_connected());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn send_rejects_oversized_message() {
        let client = MessageClient::new(LengthHeaderCodec::new(3), |_| {});
        let (conn, mut rx) = fake_connection(1);
        client.on_connection(&conn, true);

        let err = client.send(b"four").expect_err("too large");

        assert_eq!(err, FrameError::FrameTooLarge { len: 4, max: 3 });
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn received_frames_reach_callback_in_order() {
        let (client, received) = client();
        let (conn, _rx) = fake_connection(1);
        client.on_connection(&conn, true);

        let codec = LengthHeaderCodec::default();
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&codec.encode(b"one").expect("encode"));
        buffer.extend_from_slice(&codec.encode(b"two").expect("encode")[..3]);
        client.on_bytes_available(&conn, &mut buffer).expect("decode");
        buffer.extend_from_slice(&codec.encode(b"two").expect("encode")[3..]);
        client.on_bytes_available(&conn, &mut buffer).expect("decode");

        assert_eq!(
            *received.lock().expect("received lock"),
            vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
        );
    }

    #[test]
    fn send_is_callable_from_other_threads() {
        let (client, _) = client();
        let client = Arc::new(client);
        let (conn, mut rx) = fake_connection(1);
        client.on_connection(&conn, true);

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let client = Arc::clone(&client);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        client.send(format!("producer {i}").as_bytes()).expect("send");
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().expect("producer thread");
        }

        assert_eq!(drain(&mut rx).len(), 100);
    }
}
