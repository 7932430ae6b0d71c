//! Client transport: connect to a hub and pump its events into a
//! [`MapSynchronizer`].

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::connection::{Connection, ConnectionEvent, ConnectionHandle, ConnectionOptions};
use crate::error::{ConnectionError, SyncError};
use crate::sync::{MapSynchronizer, SyncEvent};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Upper bound on the TCP handshake, per resolved address
    pub connect_timeout: Duration,
    pub connection: ConnectionOptions,
    /// Inbound events buffered before the reader waits
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connection: ConnectionOptions::default(),
            event_capacity: 1024,
        }
    }
}

/// A live connection to a hub.
pub struct RemoteSession {
    handle: ConnectionHandle,
    events: mpsc::Receiver<ConnectionEvent>,
    server: SocketAddr,
}

impl RemoteSession {
    /// Resolve `host` and connect to the first address that accepts.
    pub async fn connect(host: &str, port: u16, options: &SessionOptions) -> Result<Self, ConnectionError> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|e| ConnectionError::HostNotFound(format!("{host}: {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectionError::HostNotFound(host.to_string()));
        }

        let mut last_error = None;
        for addr in addrs {
            log::debug!("Connecting to {addr}");
            match timeout(options.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    log::info!("Connected to {host}:{port} ({addr})");
                    let (tx, events) = mpsc::channel(options.event_capacity.max(1));
                    let handle = Connection::spawn(stream, tx, options.connection);
                    return Ok(Self {
                        handle,
                        events,
                        server: addr,
                    });
                }
                Ok(Err(e)) => {
                    log::debug!("Connecting to {addr} failed: {e}");
                    last_error = Some(ConnectionError::from_io(&e));
                }
                Err(_) => {
                    log::debug!("Connecting to {addr} timed out");
                    last_error = Some(ConnectionError::Refused(format!(
                        "no answer from {addr} within {:?}",
                        options.connect_timeout
                    )));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ConnectionError::HostNotFound(host.to_string())))
    }

    /// Sending side, to hand to [`MapSynchronizer::attach`].
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Next raw event. `None` once the connection has been torn down.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Wait for the next event and apply it to `sync`.
    pub async fn next_sync_events(&mut self, sync: &mut MapSynchronizer) -> Option<Result<Vec<SyncEvent>, SyncError>> {
        let event = self.events.recv().await?;
        Some(sync.handle_connection_event(event))
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = RemoteSession::connect("127.0.0.1", port, &SessionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::Refused(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_host_not_found() {
        let err = RemoteSession::connect("nonexistent.invalid", 2751, &SessionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::HostNotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_connect_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut session = RemoteSession::connect("127.0.0.1", addr.port(), &SessionOptions::default())
            .await
            .unwrap();
        let (_server_side, _) = listener.accept().await.unwrap();
        assert_eq!(session.server(), addr);

        session.close();
        assert!(matches!(
            session.next_event().await,
            Some(ConnectionEvent::Closed { .. })
        ));
    }
}
