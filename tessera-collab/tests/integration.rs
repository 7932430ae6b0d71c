//! Integration tests for end-to-end collaboration over TCP.
//!
//! These tests start a real server and connect real sessions,
//! verifying the full edit relay pipeline.

use tessera_collab::codec::{encode_frame, FrameDecoder};
use tessera_collab::payload;
use tessera_collab::{
    ConnectionError, ConnectionEvent, HubStats, MapStore, MapSynchronizer, Message, MessageType,
    RemoteSession, ServerConfig, SessionOptions, SyncEvent, SyncServer,
};
use tessera_core::{Cell, LayerType, TileMap, Tileset, TilesetId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(3);

fn level1() -> TileMap {
    let mut map = TileMap::new(16, 16, 32, 32);
    map.add_tileset(Tileset::new("grass", 32, 32, 8));
    map.add_tileset(Tileset::new("walls", 32, 32, 8));
    map.add_layer(0, LayerType::Tile);
    map.add_layer(1, LayerType::Object);
    map.take_events();
    map
}

struct TestServer {
    port: u16,
    stats: watch::Receiver<HubStats>,
    task: JoinHandle<()>,
}

/// Start a server on a free port with one map, `level1`.
async fn start_test_server() -> TestServer {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let mut store = MapStore::new(config.project_name.clone());
    store.insert("level1", level1());

    let server = SyncServer::bind(&config, store).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let stats = server.stats_watcher();
    let task = tokio::spawn(server.run());
    TestServer { port, stats, task }
}

struct Peer {
    session: RemoteSession,
    sync: MapSynchronizer,
}

impl Peer {
    /// Connect and consume the project list the synchronizer asks for.
    async fn join(port: u16) -> Peer {
        let session = RemoteSession::connect("127.0.0.1", port, &SessionOptions::default())
            .await
            .unwrap();
        let mut sync = MapSynchronizer::new();
        assert_eq!(sync.attach(session.handle()).unwrap(), SyncEvent::Connected);

        let mut peer = Peer { session, sync };
        let events = peer.next().await;
        assert_eq!(events, vec![SyncEvent::ProjectList(vec!["default".to_string()])]);
        peer
    }

    async fn next(&mut self) -> Vec<SyncEvent> {
        timeout(WAIT, self.session.next_sync_events(&mut self.sync))
            .await
            .expect("timed out waiting for the server")
            .expect("session closed")
            .expect("failed to apply message")
    }

    /// Skip events until one matches.
    async fn wait_for(&mut self, pred: impl Fn(&SyncEvent) -> bool) -> SyncEvent {
        loop {
            if let Some(event) = self.next().await.into_iter().find(|e| pred(e)) {
                return event;
            }
        }
    }

    async fn open_level1(port: u16) -> Peer {
        let mut peer = Peer::join(port).await;
        peer.sync.request_map("level1").unwrap();
        let event = peer.wait_for(|e| matches!(e, SyncEvent::MapOpened { .. })).await;
        assert_eq!(event, SyncEvent::MapOpened { name: Some("level1".into()) });
        peer
    }

    /// Round trip a PING; returns every message type received before the
    /// answer.
    async fn messages_before_ping_answer(&mut self) -> Vec<MessageType> {
        self.sync.ping().unwrap();
        let mut seen = Vec::new();
        loop {
            let event = timeout(WAIT, self.session.next_event()).await.unwrap().unwrap();
            match event {
                ConnectionEvent::Message { message, .. } => match message.message_type() {
                    Some(MessageType::PingAns) => return seen,
                    Some(t) => seen.push(t),
                    None => panic!("Unexpected message {message}"),
                },
                ConnectionEvent::Closed { reason, .. } => panic!("Connection closed: {reason}"),
            }
        }
    }

    fn cell(&self, x: u16, y: u16) -> Cell {
        self.sync.document().unwrap().cell_at(0, x, y).unwrap()
    }
}

#[tokio::test]
async fn test_project_and_map_lists() {
    let server = start_test_server().await;
    let mut peer = Peer::join(server.port).await;

    peer.sync.request_project("default").unwrap();
    assert_eq!(peer.next().await, vec![SyncEvent::MapList(vec!["level1".to_string()])]);

    peer.sync.request_project("elsewhere").unwrap();
    assert_eq!(peer.next().await, vec![SyncEvent::NotFound("elsewhere".to_string())]);
}

#[tokio::test]
async fn test_request_map() {
    let server = start_test_server().await;
    let peer = Peer::open_level1(server.port).await;

    let map = peer.sync.document().unwrap();
    assert_eq!((map.width, map.height), (16, 16));
    assert_eq!(map.layer_count(), 2);
    assert_eq!(map.tilesets().len(), 2);
    assert_eq!(peer.sync.map_name(), Some("level1"));
    assert!(peer.sync.mapper().is_current(map));
}

#[tokio::test]
async fn test_request_unknown_map() {
    let server = start_test_server().await;
    let mut peer = Peer::join(server.port).await;

    peer.sync.request_map("nowhere").unwrap();
    assert_eq!(peer.next().await, vec![SyncEvent::NotFound("nowhere".to_string())]);
    assert!(peer.sync.document().is_none());
    assert!(peer.sync.is_online());
}

#[tokio::test]
async fn test_request_metadata() {
    let server = start_test_server().await;
    let mut peer = Peer::join(server.port).await;

    peer.sync.request_metadata("level1").unwrap();
    match peer.next().await.as_slice() {
        [SyncEvent::Metadata(meta)] => {
            assert_eq!((meta.width, meta.height), (16, 16));
            assert_eq!((meta.tile_width, meta.tile_height), (32, 32));
            assert_eq!(meta.layer_count, 2);
            assert_eq!(meta.tileset_count, 2);
        }
        other => panic!("Expected metadata, got {other:?}"),
    }
}

#[tokio::test]
async fn test_edit_relayed_to_other_peer_only() {
    let server = start_test_server().await;
    let mut alice = Peer::open_level1(server.port).await;
    let mut bob = Peer::open_level1(server.port).await;

    let wall = Cell::new(TilesetId(2), 3);
    alice
        .sync
        .edit(|map| map.paint(0, [(4, 5, wall), (5, 5, wall)]).map(|_| ()))
        .unwrap()
        .unwrap();

    let event = bob.wait_for(|e| matches!(e, SyncEvent::RegionApplied { .. })).await;
    assert_eq!(
        event,
        SyncEvent::RegionApplied {
            layer: 0,
            region: [(4, 5), (5, 5)].into_iter().collect(),
        }
    );
    assert_eq!(bob.cell(4, 5), wall);
    assert_eq!(bob.cell(5, 5), wall);

    // Alice's own edit never comes back to her.
    assert!(alice.messages_before_ping_answer().await.is_empty());
    // Bob applying it did not send it out again either.
    assert!(bob.messages_before_ping_answer().await.is_empty());
}

#[tokio::test]
async fn test_layer_edits_relayed() {
    let server = start_test_server().await;
    let mut alice = Peer::open_level1(server.port).await;
    let mut bob = Peer::open_level1(server.port).await;

    alice
        .sync
        .edit(|map| {
            map.add_layer(2, LayerType::Tile);
            map.rename_layer(2, "Roof").unwrap();
            map.set_layer_opacity(2, 0.5).unwrap();
        })
        .unwrap();

    // ADDLAYER + RENAMELAYER for the new layer, then the rename and opacity.
    for _ in 0..4 {
        bob.wait_for(|e| *e == SyncEvent::LayersChanged).await;
    }
    let map = bob.sync.document().unwrap();
    assert_eq!(map.layer_count(), 3);
    assert_eq!(map.layer(2).unwrap().name, "Roof");
    assert_eq!(map.layer(2).unwrap().opacity, 0.5);
}

#[tokio::test]
async fn test_paint_and_layer_insert_in_one_edit_converge() {
    let server = start_test_server().await;
    let mut alice = Peer::open_level1(server.port).await;
    let mut bob = Peer::open_level1(server.port).await;
    let grass = Cell::new(TilesetId(1), 2);

    alice
        .sync
        .edit(|map| {
            map.paint(0, [(6, 6, grass)]).unwrap();
            map.add_layer(0, LayerType::Tile);
        })
        .unwrap();

    bob.wait_for(|e| matches!(e, SyncEvent::RegionApplied { layer: 0, .. })).await;
    // ADDLAYER, then RENAMELAYER with the new layer's name.
    for _ in 0..2 {
        bob.wait_for(|e| *e == SyncEvent::LayersChanged).await;
    }

    let (a, b) = (alice.sync.document().unwrap(), bob.sync.document().unwrap());
    assert_eq!(a.layers(), b.layers());
    assert_eq!(b.cell_at(1, 6, 6).unwrap(), grass);
    assert_eq!(b.cell_at(0, 6, 6).unwrap(), Cell::EMPTY);
}

#[tokio::test]
async fn test_chat_relayed() {
    let server = start_test_server().await;
    let alice = Peer::join(server.port).await;
    let mut bob = Peer::join(server.port).await;

    alice.sync.send_chat("hello bob").unwrap();
    assert_eq!(bob.next().await, vec![SyncEvent::Chat("hello bob".to_string())]);
}

#[tokio::test]
async fn test_last_writer_wins_at_third_peer() {
    let server = start_test_server().await;
    let mut a = Peer::open_level1(server.port).await;
    let mut b = Peer::open_level1(server.port).await;
    let mut c = Peer::open_level1(server.port).await;

    let grass = Cell::new(TilesetId(1), 0);
    let wall = Cell::new(TilesetId(2), 0);

    a.sync
        .edit(|map| map.paint(0, [(2, 2, grass)]).map(|_| ()))
        .unwrap()
        .unwrap();
    b.wait_for(|e| matches!(e, SyncEvent::RegionApplied { .. })).await;
    c.wait_for(|e| matches!(e, SyncEvent::RegionApplied { .. })).await;
    assert_eq!(c.cell(2, 2), grass);

    b.sync
        .edit(|map| map.paint(0, [(2, 2, wall)]).map(|_| ()))
        .unwrap()
        .unwrap();
    a.wait_for(|e| matches!(e, SyncEvent::RegionApplied { .. })).await;
    c.wait_for(|e| matches!(e, SyncEvent::RegionApplied { .. })).await;

    assert_eq!(a.cell(2, 2), wall);
    assert_eq!(b.cell(2, 2), wall);
    assert_eq!(c.cell(2, 2), wall);
}

#[tokio::test]
async fn test_fragmented_raw_client() {
    let server = start_test_server().await;
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    stream.set_nodelay(true).unwrap();

    let mut bytes = encode_frame(&Message::empty(MessageType::RequestProjects)).unwrap();
    bytes.extend(encode_frame(&payload::name_message(MessageType::RequestMetadata, "level1").unwrap()).unwrap());
    bytes.extend(encode_frame(&Message::from_raw(0x7777, vec![1, 2, 3])).unwrap());
    for byte in bytes {
        stream.write_all(&[byte]).await.unwrap();
        tokio::task::yield_now().await;
    }

    let mut decoder = FrameDecoder::new();
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.len() < 3 {
        let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0, "server closed the connection");
        decoder.decode_into(&buf[..n], &mut received).unwrap();
    }

    assert_eq!(
        payload::read_names(&received[0], MessageType::RequestProjectsAns).unwrap(),
        vec!["default"]
    );
    assert_eq!(received[1].message_type(), Some(MessageType::RequestMetadataAns));
    assert_eq!(received[2], Message::ping());
}

#[tokio::test]
async fn test_malformed_request_closes_only_sender() {
    let server = start_test_server().await;
    let mut bystander = Peer::join(server.port).await;
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();

    // String length claims 100 bytes, 2 follow.
    let bad = Message::new(MessageType::RequestMap, vec![0, 0, 0, 100, b'l', b'e']);
    stream.write_all(&encode_frame(&bad).unwrap()).await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0);

    assert!(bystander.messages_before_ping_answer().await.is_empty());
}

#[tokio::test]
async fn test_stats_track_connections() {
    let mut server = start_test_server().await;
    let peer = Peer::join(server.port).await;

    let stats = timeout(
        WAIT,
        server
            .stats
            .wait_for(|s| s.active_connections == 1 && s.answered_requests >= 1),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(stats.total_connections, 1);
    assert!(stats.total_bytes > 0);

    drop(peer);
    timeout(WAIT, server.stats.wait_for(|s| s.active_connections == 0))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_server_loss_keeps_document() {
    let server = start_test_server().await;
    let mut peer = Peer::open_level1(server.port).await;
    peer.sync
        .edit(|map| map.paint(0, [(1, 1, Cell::new(TilesetId(1), 1))]).map(|_| ()))
        .unwrap()
        .unwrap();

    server.task.abort();

    let event = peer
        .wait_for(|e| matches!(e, SyncEvent::ConnectionLost(_)))
        .await;
    assert_eq!(event, SyncEvent::ConnectionLost(ConnectionError::RemoteClosed));
    assert!(!peer.sync.is_online());
    assert_eq!(peer.cell(1, 1), Cell::new(TilesetId(1), 1));

    // Still editable offline.
    peer.sync
        .edit(|map| map.paint(0, [(3, 3, Cell::new(TilesetId(2), 0))]).map(|_| ()))
        .unwrap()
        .unwrap();
    assert_eq!(peer.cell(3, 3), Cell::new(TilesetId(2), 0));
}

#[tokio::test]
async fn test_connect_refused() {
    let server = start_test_server().await;
    let port = server.port;
    server.task.abort();
    let _ = server.task.await;

    let err = RemoteSession::connect("127.0.0.1", port, &SessionOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ConnectionError::Refused(_)), "got {err:?}");
}
