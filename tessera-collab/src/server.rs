//! TCP front end of the hub.
//!
//! Architecture:
//! ```text
//! Client A ──► Connection A ──┐
//!                             │  HubEvent (mpsc)
//! Client B ──► Connection B ──┼──────────────────► Hub ── MapStore
//!                             │                     │
//! listener ── accept ─────────┘                     ├──► Connection A outbound
//!                                                   └──► Connection B outbound
//! ```
//!
//! One task owns the listener and the hub. Connection readers feed it
//! through a single channel; it replies and relays through each
//! connection's outbound queue.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant, Sleep};

use crate::codec::DEFAULT_MAX_FRAME_LEN;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::ServerError;
use crate::hub::{Hub, HubEvent, HubStats};
use crate::store::MapStore;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 2751;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration, usually read from a TOML file.
///
/// ```toml
/// bind_addr = "0.0.0.0:2751"
/// project_name = "default"
/// maps = ["maps/level1.json", "maps/level2.json"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Name of the single project the server offers
    pub project_name: String,
    /// JSON map files; each map is named after its file stem. Relative
    /// paths loaded from a file are taken from that file's directory.
    pub maps: Vec<PathBuf>,
    /// Largest accepted inbound payload in bytes
    pub max_frame_len: u32,
    /// Per-connection outbound queue length before a peer counts as slow
    pub outbound_capacity: usize,
    /// Capacity of the channel feeding the hub
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            project_name: "default".to_string(),
            maps: Vec::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            outbound_capacity: 1024,
            event_capacity: 4096,
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_maps(dir);
        }
        log::debug!("Read configuration from {}", path.display());
        Ok(config)
    }

    /// Anchor relative map paths at `dir`, the directory of the config file.
    pub fn resolve_maps(&mut self, dir: &Path) {
        for map in &mut self.maps {
            if map.is_relative() {
                *map = dir.join(&*map);
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(text)?)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_frame_len: self.max_frame_len,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

/// The hub server.
pub struct SyncServer {
    listener: TcpListener,
    hub: Hub,
    options: ConnectionOptions,
    event_capacity: usize,
    stats: watch::Sender<HubStats>,
}

impl SyncServer {
    /// Bind the listener. Connections are accepted once [`run`](Self::run)
    /// is polled.
    pub async fn bind(config: &ServerConfig, store: MapStore) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        log::info!(
            "Sync server listening on {} (project {}, {} maps)",
            listener.local_addr()?,
            store.project_name(),
            store.len()
        );
        let (stats, _) = watch::channel(HubStats::default());
        Ok(Self {
            listener,
            hub: Hub::new(store),
            options: config.connection_options(),
            event_capacity: config.event_capacity.max(1),
            stats,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Snapshot of the hub counters.
    pub fn stats(&self) -> HubStats {
        self.stats.borrow().clone()
    }

    /// Receiver that stays valid after the server is moved into `run`.
    pub fn stats_watcher(&self) -> watch::Receiver<HubStats> {
        self.stats.subscribe()
    }

    /// Accept connections and route their messages until the task is
    /// dropped.
    pub async fn run(self) {
        let SyncServer {
            listener,
            mut hub,
            options,
            event_capacity,
            stats,
        } = self;
        let (events_tx, mut events) = mpsc::channel::<HubEvent>(event_capacity);
        let mut backoff = AcceptBackoff::default();

        loop {
            tokio::select! {
                accepted = listener.accept(), if backoff.is_open() => match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("New TCP connection from {addr}");
                        let (handle, conn) = Connection::new(stream, options);
                        hub.handle_event(HubEvent::Accepted(handle));
                        conn.start(events_tx.clone());
                    }
                    Err(e) => {
                        log::error!("Accept failed: {e}");
                        backoff.failed();
                    }
                },
                () = backoff.reopened(), if !backoff.is_open() => backoff.reset(),
                Some(event) = events.recv() => hub.handle_event(event),
            }
            stats.send_replace(hub.stats().clone());
        }
    }
}

/// Pauses accepting for a moment after a failure, e.g. when the process is
/// out of file descriptors. Hub events keep flowing meanwhile.
#[derive(Debug, Default)]
struct AcceptBackoff {
    resume_at: Option<Instant>,
}

impl AcceptBackoff {
    fn is_open(&self) -> bool {
        self.resume_at.map_or(true, |at| Instant::now() >= at)
    }

    fn failed(&mut self) {
        self.resume_at = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    fn reset(&mut self) {
        self.resume_at = None;
    }

    fn reopened(&self) -> Sleep {
        sleep_until(self.resume_at.unwrap_or_else(Instant::now))
    }
}
