use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use glam::{DMat4, DVec3};
use huddle::{
    Client, ClientConfig, ClientSession, ClientState, DisconnectReason, EntityTree, FramePhase,
    LobbyUpdate, MemoryTree, PacketKind, Server, ServerConfig, ServerEvent, ServerSession,
    SessionEvent, TransportConfig,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn transport() -> TransportConfig {
    TransportConfig {
        socket_timeout_ms: 50,
        ..Default::default()
    }
}

fn client_config() -> ClientConfig {
    ClientConfig {
        transport: transport(),
        connect_timeout_ms: 2000,
        handshake_retry_ms: 100,
        ping_initial_delay_ms: 50,
        ping_period_ms: 50,
        ping_timeout_ms: 300,
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        transport: transport(),
        sync_initial_delay_ms: 50,
        sync_period_ms: 50,
        ..Default::default()
    }
}

fn start_server(config: ServerConfig) -> (Server, u16) {
    let port = next_port();
    let server = Server::bind(format!("127.0.0.1:{}", port), config).unwrap();
    (server, port)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn server_frame(session: &mut ServerSession<Server>, tree: &mut MemoryTree) {
    session
        .on_frame_boundary(FramePhase::ReadyForChanges, tree)
        .unwrap();
    session
        .on_frame_boundary(FramePhase::FinishedFrame, tree)
        .unwrap();
}

fn client_frame(session: &mut ClientSession<Client>, tree: &mut MemoryTree) {
    session
        .on_frame_boundary(FramePhase::ReadyForChanges, tree)
        .unwrap();
    session
        .on_frame_boundary(FramePhase::FinishedFrame, tree)
        .unwrap();
}

#[test]
fn test_client_connects_and_measures_rtt() {
    let (server, port) = start_server(server_config());
    let client = Client::connect("127.0.0.1", port, client_config()).unwrap();

    assert_eq!(client.state(), ClientState::Connected);
    assert!(client.is_connected());
    assert!(wait_until(Duration::from_secs(2), || client.rtt().is_some()));

    assert_eq!(server.connection_count(), 1);
    let events = server.drain_events();
    assert!(matches!(events[0], ServerEvent::ClientConnected { connection: 1, .. }));
    assert!(matches!(
        client.drain_session_events()[0],
        SessionEvent::Connected { .. }
    ));
}

#[test]
fn test_client_survives_sync_rounds() {
    let (server, port) = start_server(ServerConfig {
        missed_sync_limit: 3,
        ..server_config()
    });
    let client = Client::connect("127.0.0.1", port, client_config()).unwrap();

    thread::sleep(Duration::from_millis(500));
    assert_eq!(server.connection_count(), 1);
    assert!(client.is_connected());
    let roster = server.roster();
    assert!(roster[0].missed_syncs < 3);
}

#[test]
fn test_server_evicts_vanished_client() {
    let (server, port) = start_server(ServerConfig {
        sync_initial_delay_ms: 0,
        sync_period_ms: 20,
        missed_sync_limit: 3,
        ..server_config()
    });
    let client = Client::connect("127.0.0.1", port, client_config()).unwrap();
    assert_eq!(server.connection_count(), 1);

    client.disconnect();
    assert_eq!(client.state(), ClientState::Disconnected);

    assert!(wait_until(Duration::from_secs(2), || server.connection_count() == 0));
    assert!(server.drain_events().iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Timeout,
            ..
        }
    )));
}

#[test]
fn test_client_detects_server_loss() {
    let (server, port) = start_server(server_config());
    let client = Client::connect("127.0.0.1", port, client_config()).unwrap();

    server.shutdown();

    assert!(wait_until(Duration::from_secs(3), || client.state() == ClientState::Error));
    assert!(!client.is_connected());
    assert!(client
        .drain_session_events()
        .contains(&SessionEvent::ConnectionLost));
}

#[test]
fn test_undecodable_server_datagram_panics_session() {
    let port = next_port();
    let fake_server = UdpSocket::bind(format!("127.0.0.1:{}", port)).unwrap();
    fake_server
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let responder = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let (_, from) = fake_server.recv_from(&mut buf).unwrap();
        fake_server
            .send_to(&[PacketKind::Handshake.tag()], from)
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        fake_server.send_to(&[0xEE], from).unwrap();
    });

    let client = Client::connect("127.0.0.1", port, client_config()).unwrap();
    responder.join().unwrap();

    assert!(wait_until(Duration::from_secs(2), || client.state() == ClientState::Panic));
    assert!(client
        .drain_session_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::ProtocolViolation { .. })));
}

#[test]
fn test_id_request_assigns_player_zero() {
    let (server, port) = start_server(server_config());
    let server = Arc::new(server);
    let mut lobby = ServerSession::new(Arc::clone(&server), 8);
    let mut server_tree = MemoryTree::new();

    let client = Arc::new(Client::connect("127.0.0.1", port, client_config()).unwrap());
    let mut session = ClientSession::new(Arc::clone(&client));
    let mut client_tree = MemoryTree::new();

    session.request_id();
    let assigned = wait_until(Duration::from_secs(2), || {
        client_frame(&mut session, &mut client_tree);
        server_frame(&mut lobby, &mut server_tree);
        session.local_player().is_some()
    });
    assert!(assigned);
    assert_eq!(session.local_player(), Some(0));

    assert_eq!(lobby.drain_updates(), vec![LobbyUpdate::PlayerJoined(0)]);
    let updates = session.drain_updates();
    assert!(updates.contains(&LobbyUpdate::PlayerJoined(0)));
    assert!(updates.contains(&LobbyUpdate::AssignedId(0)));
}

#[test]
fn test_movement_is_relayed_to_other_clients() {
    let (server, port) = start_server(server_config());
    let server = Arc::new(server);
    let mut lobby = ServerSession::new(Arc::clone(&server), 8);
    let mut server_tree = MemoryTree::new();
    server_tree.spawn(5, DMat4::IDENTITY);

    let mover = Arc::new(Client::connect("127.0.0.1", port, client_config()).unwrap());
    let watcher = Arc::new(Client::connect("127.0.0.1", port, client_config()).unwrap());
    let mut mover_session = ClientSession::new(Arc::clone(&mover));
    let mut watcher_session = ClientSession::new(Arc::clone(&watcher));
    let mut mover_tree = MemoryTree::new();
    let mut watcher_tree = MemoryTree::new();
    watcher_tree.spawn(5, DMat4::IDENTITY);

    mover_session.request_id();
    watcher_session.request_id();
    assert!(wait_until(Duration::from_secs(2), || {
        client_frame(&mut mover_session, &mut mover_tree);
        client_frame(&mut watcher_session, &mut watcher_tree);
        server_frame(&mut lobby, &mut server_tree);
        mover_session.local_player().is_some() && watcher_session.local_player().is_some()
    }));

    let target = DMat4::from_translation(DVec3::new(3.0, 4.0, 5.0));
    let moved = wait_until(Duration::from_secs(2), || {
        mover_session.on_entity_transform_changed(5, target);
        client_frame(&mut mover_session, &mut mover_tree);
        server_frame(&mut lobby, &mut server_tree);
        client_frame(&mut watcher_session, &mut watcher_tree);
        watcher_tree.lookup_entity(5) == Some(target)
    });
    assert!(moved);
    assert_eq!(server_tree.lookup_entity(5), Some(target));
}
