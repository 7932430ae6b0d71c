//! One framed, bidirectional TCP stream.
//!
//! ```text
//!               ┌──────────── Connection ────────────┐
//! socket ──read─┤ reader task ── FrameDecoder ───────┼──► events (mpsc)
//!               │                                    │
//! socket ◄write─┤ writer task ◄── outbound (mpsc) ◄──┼─── ConnectionHandle::send
//!               └────────────────────────────────────┘
//! ```
//!
//! The writer task is the only thing that touches the write half, so frames
//! from concurrent senders never interleave. Either task ending flags the
//! shared shutdown watch; the reader then reports exactly one
//! [`ConnectionEvent::Closed`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::codec::{encode_frame_into, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
use crate::error::{ConnectionError, FramingError, ProtocolError, SendError};
use crate::protocol::Message;

const READ_BUF_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection ended. The first reason recorded wins.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CloseReason {
    #[error("remote closed the stream")]
    RemoteClosed,
    #[error("closed locally")]
    Local,
    #[error("outbound queue overflowed")]
    SlowConsumer,
    #[error("framing error: {0}")]
    Framing(FramingError),
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl CloseReason {
    pub fn from_io(err: &io::Error) -> Self {
        CloseReason::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<CloseReason> for ConnectionError {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::RemoteClosed => ConnectionError::RemoteClosed,
            CloseReason::Io { kind, message } => ConnectionError::from_io(&io::Error::new(kind, message)),
            other => ConnectionError::Io(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A complete message, in stream order
    Message { id: ConnectionId, message: Message },
    /// Emitted once, after which the connection delivers nothing more
    Closed { id: ConnectionId, reason: CloseReason },
}

impl ConnectionEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Message { id, .. } | ConnectionEvent::Closed { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// Largest accepted inbound payload
    pub max_frame_len: u32,
    /// Messages that may wait for the writer before `send` reports `Full`
    pub outbound_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_capacity: 1024,
        }
    }
}

type Shutdown = Arc<watch::Sender<Option<CloseReason>>>;

/// Cloneable sending side of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
    shutdown: Shutdown,
}

impl ConnectionHandle {
    /// A handle with no socket behind it. Messages sent through it land in
    /// the returned queue.
    pub fn detached(capacity: usize) -> (Self, OutboundQueue) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(None);
        let handle = Self {
            id: ConnectionId::new(),
            peer: None,
            outbound,
            shutdown: Arc::new(shutdown),
        };
        let queue = OutboundQueue {
            rx,
            shutdown: handle.shutdown.clone(),
        };
        (handle, queue)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a message for the writer without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed(self.id));
        }
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(self.id),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }

    pub fn close(&self) {
        self.close_with(CloseReason::Local);
    }

    pub fn close_with(&self, reason: CloseReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shutdown.borrow().clone()
    }
}

/// Receiving end of a [`ConnectionHandle::detached`] handle.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Message>,
    shutdown: Shutdown,
}

impl OutboundQueue {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shutdown.borrow().clone()
    }
}

/// A socket whose tasks have not started yet.
pub struct Connection {
    handle: ConnectionHandle,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outbound: mpsc::Receiver<Message>,
    max_frame_len: u32,
}

impl Connection {
    /// Wrap `stream`. Nothing is read until [`start`](Self::start), so the
    /// owner can register the handle before the first event arrives.
    pub fn new(stream: TcpStream, options: ConnectionOptions) -> (ConnectionHandle, Connection) {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {peer:?}: {e}");
        }
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound) = mpsc::channel(options.outbound_capacity.max(1));
        let (shutdown, _) = watch::channel(None);

        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            peer,
            outbound: outbound_tx,
            shutdown: Arc::new(shutdown),
        };
        let conn = Connection {
            handle: handle.clone(),
            reader,
            writer,
            outbound,
            max_frame_len: options.max_frame_len,
        };
        (handle, conn)
    }

    /// Wrap `stream` and start its tasks immediately.
    pub fn spawn<E>(stream: TcpStream, events: mpsc::Sender<E>, options: ConnectionOptions) -> ConnectionHandle
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let (handle, conn) = Self::new(stream, options);
        conn.start(events);
        handle
    }

    /// Spawn the reader and writer tasks.
    pub fn start<E>(self, events: mpsc::Sender<E>)
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let Connection {
            handle,
            reader,
            writer,
            outbound,
            max_frame_len,
        } = self;
        log::debug!("Connection {} started (peer {:?})", handle.id, handle.peer);

        tokio::spawn(write_loop(handle.id, writer, outbound, handle.shutdown.clone()));
        tokio::spawn(read_loop(
            handle.id,
            reader,
            FrameDecoder::with_max_payload(max_frame_len),
            events,
            handle.shutdown,
        ));
    }
}

async fn read_loop<E>(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    mut decoder: FrameDecoder,
    events: mpsc::Sender<E>,
    shutdown: Shutdown,
) where
    E: From<ConnectionEvent> + Send + 'static,
{
    let mut closed = shutdown.subscribe();
    let mut buf = vec![0u8; READ_BUF_LEN];
    let mut messages = Vec::new();

    let reason = loop {
        let read = tokio::select! {
            changed = closed.wait_for(Option::is_some) => {
                break match changed {
                    Ok(reason) => reason.clone().unwrap_or(CloseReason::Local),
                    Err(_) => CloseReason::Local,
                };
            }
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => break CloseReason::RemoteClosed,
            Ok(n) => {
                log::trace!("Connection {id}: read {n} bytes");
                let decoded = decoder.decode_into(&buf[..n], &mut messages);
                if !forward(id, &mut messages, &events).await {
                    break CloseReason::Local;
                }
                if let Err(e) = decoded {
                    log::warn!("Connection {id}: {e}");
                    break CloseReason::Framing(e);
                }
            }
            Err(e) => break CloseReason::from_io(&e),
        }
    };

    shutdown.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
    let reason = shutdown.borrow().clone().unwrap_or(CloseReason::Local);

    log::debug!("Connection {id} closed: {reason}");
    let _ = events.send(ConnectionEvent::Closed { id, reason }.into()).await;
}

/// Hand decoded messages to the owner. `false` once nobody is listening.
async fn forward<E>(id: ConnectionId, messages: &mut Vec<Message>, events: &mpsc::Sender<E>) -> bool
where
    E: From<ConnectionEvent>,
{
    for message in messages.drain(..) {
        log::trace!("Connection {id}: received {message}");
        if events.send(ConnectionEvent::Message { id, message }.into()).await.is_err() {
            return false;
        }
    }
    true
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: Shutdown,
) {
    let mut closed = shutdown.subscribe();
    let mut frame = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            next = outbound.recv() => next,
            _ = closed.wait_for(Option::is_some) => break,
        };
        let Some(message) = next else {
            break;
        };

        frame.clear();
        if let Err(e) = encode_frame_into(&message, &mut frame) {
            log::error!("Connection {id}: dropping {message}: {e}");
            continue;
        }

        let written = tokio::select! {
            biased;
            written = writer.write_all(&frame) => written,
            _ = closed.wait_for(Option::is_some) => break,
        };
        if let Err(e) = written {
            log::error!("Connection {id}: write failed: {e}");
            shutdown.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(CloseReason::from_io(&e));
                true
            });
            break;
        }
    }

    // Every handle dropped: nobody can send anymore.
    shutdown.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(CloseReason::Local);
        true
    });
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::protocol::MessageType;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_delivers_messages_then_closes_once() {
        let (server, mut client) = tcp_pair().await;
        let (tx, mut rx) = mpsc::channel::<ConnectionEvent>(16);
        let handle = Connection::spawn(server, tx, ConnectionOptions::default());

        let msg = Message::new(MessageType::Chat, b"hi".to_vec());
        let mut bytes = encode_frame(&msg).unwrap();
        bytes.extend(encode_frame(&Message::ping()).unwrap());
        client.write_all(&bytes).await.unwrap();

        match next_event(&mut rx).await {
            ConnectionEvent::Message { id, message } => {
                assert_eq!(id, handle.id());
                assert_eq!(message, msg);
            }
            other => panic!("Expected message, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut rx).await,
            ConnectionEvent::Message { message, .. } if message == Message::ping()
        ));

        drop(client);
        match next_event(&mut rx).await {
            ConnectionEvent::Closed { id, reason } => {
                assert_eq!(id, handle.id());
                assert_eq!(reason, CloseReason::RemoteClosed);
            }
            other => panic!("Expected Closed, got {other:?}"),
        }
        // Reader task has exited and dropped its sender.
        assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_reports_remote_closed() {
        let (server, client) = tcp_pair().await;
        let (tx, mut rx) = mpsc::channel::<ConnectionEvent>(16);
        let _handle = Connection::spawn(server, tx, ConnectionOptions::default());

        // Zero linger turns the close into a reset.
        #[allow(deprecated)]
        client.set_linger(Some(Duration::ZERO)).unwrap();
        drop(client);

        match next_event(&mut rx).await {
            ConnectionEvent::Closed { reason, .. } => {
                if let CloseReason::Io { kind, .. } = &reason {
                    assert_eq!(*kind, io::ErrorKind::ConnectionReset);
                }
                assert_eq!(ConnectionError::from(reason), ConnectionError::RemoteClosed);
            }
            other => panic!("Expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_close_reason_classification() {
        let reset = CloseReason::from_io(&io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(ConnectionError::from(reset), ConnectionError::RemoteClosed);

        let pipe = CloseReason::from_io(&io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(ConnectionError::from(pipe), ConnectionError::RemoteClosed);

        let other = CloseReason::from_io(&io::Error::other("no route"));
        assert_eq!(ConnectionError::from(other), ConnectionError::Io("no route".into()));

        assert!(matches!(
            ConnectionError::from(CloseReason::SlowConsumer),
            ConnectionError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let (server, mut client) = tcp_pair().await;
        let (tx, _rx) = mpsc::channel::<ConnectionEvent>(16);
        let handle = Connection::spawn(server, tx, ConnectionOptions::default());

        let mut tasks = Vec::new();
        for sender in 0u8..4 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for seq in 0u8..50 {
                    let payload = vec![sender, seq, 0xEE, 0xEE, 0xEE, 0xEE];
                    loop {
                        match handle.send(Message::new(MessageType::Chat, payload.clone())) {
                            Ok(()) => break,
                            Err(SendError::Full(_)) => tokio::task::yield_now().await,
                            Err(e) => panic!("send failed: {e}"),
                        }
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut decoder = FrameDecoder::new();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while received.len() < 200 {
            let n = timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0);
            decoder.decode_into(&buf[..n], &mut received).unwrap();
        }

        let mut next_seq = [0u8; 4];
        for msg in &received {
            let p = msg.payload();
            assert_eq!(p.len(), 6);
            assert_eq!(&p[2..], &[0xEE; 4]);
            assert_eq!(p[1], next_seq[p[0] as usize]);
            next_seq[p[0] as usize] += 1;
        }
    }

    #[tokio::test]
    async fn test_local_close() {
        let (server, mut client) = tcp_pair().await;
        let (tx, mut rx) = mpsc::channel::<ConnectionEvent>(16);
        let handle = Connection::spawn(server, tx, ConnectionOptions::default());

        handle.close();
        assert!(handle.is_closed());
        assert!(matches!(
            next_event(&mut rx).await,
            ConnectionEvent::Closed { reason: CloseReason::Local, .. }
        ));
        assert_eq!(handle.send(Message::ping()), Err(SendError::Closed(handle.id())));

        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_oversize_frame_closes() {
        let (server, mut client) = tcp_pair().await;
        let (tx, mut rx) = mpsc::channel::<ConnectionEvent>(16);
        let options = ConnectionOptions {
            max_frame_len: 8,
            ..ConnectionOptions::default()
        };
        Connection::spawn(server, tx, options);

        client.write_all(&[0x00, 0x10, 0x00, 0x00, 0x10, 0x00]).await.unwrap();
        match next_event(&mut rx).await {
            ConnectionEvent::Closed { reason, .. } => assert_eq!(
                reason,
                CloseReason::Framing(FramingError::PayloadTooLarge { len: 4096, max: 8 })
            ),
            other => panic!("Expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let (handle, queue) = ConnectionHandle::detached(4);
        handle.close_with(CloseReason::SlowConsumer);
        handle.close();
        assert_eq!(handle.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_detached_queue_full() {
        let (handle, mut queue) = ConnectionHandle::detached(2);
        handle.send(Message::ping()).unwrap();
        handle.send(Message::ping()).unwrap();
        assert_eq!(handle.send(Message::ping()), Err(SendError::Full(handle.id())));
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.try_recv().is_none());
    }
}
