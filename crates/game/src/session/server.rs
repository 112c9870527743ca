use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::ServerConfig;
use crate::event::GameEvent;
use crate::net::{
    AdmitError, ConnectionId, ConnectionInfo, ConnectionTable, NetworkStats, Packet, PacketKind,
    PeerState, Received, SyncOutcome, TransportWorker,
};

use super::events::{DisconnectReason, ServerEvent};
use super::timer::PeriodicTask;
use super::SessionError;

/// Receives every decoded game event together with the connection it came
/// from. Called on the session thread; keep it short.
pub type GameEventHandler = Arc<dyn Fn(ConnectionId, GameEvent) + Send + Sync>;

struct Shared {
    config: ServerConfig,
    transport: TransportWorker,
    connections: Mutex<ConnectionTable>,
    handler: Mutex<Option<GameEventHandler>>,
    events: Mutex<VecDeque<ServerEvent>>,
}

impl Shared {
    fn push_event(&self, event: ServerEvent) {
        self.events.lock().push_back(event);
    }

    fn drop_connection(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(mut record) = self.connections.lock().remove(id) else {
            return false;
        };
        if record.state() != PeerState::Disconnected {
            if let Err(e) = record.disconnect() {
                log::warn!("Connection {}: {}", id, e);
            }
        }

        log::info!("Client {} ({}) {}", id, record.addr(), reason.as_str());
        self.push_event(ServerEvent::ClientDisconnected {
            connection: id,
            addr: record.addr(),
            reason,
        });
        true
    }

    fn connection_for(&self, addr: &SocketAddr) -> Option<ConnectionId> {
        self.connections.lock().get_by_addr(addr).map(|r| r.id())
    }

    fn handle_packet(&self, packet: Packet) {
        match packet.kind {
            PacketKind::Handshake => self.handle_handshake(packet.addr),
            PacketKind::Ping => {
                let known = match self.connections.lock().get_by_addr_mut(&packet.addr) {
                    Some(record) => {
                        record.touch();
                        true
                    }
                    None => false,
                };
                if known {
                    self.transport.send(Packet::ping(packet.addr));
                } else {
                    log::debug!("Ignoring ping from unknown {}", packet.addr);
                }
            }
            PacketKind::Sync => {
                let violation = {
                    let mut connections = self.connections.lock();
                    match connections.get_by_addr_mut(&packet.addr) {
                        Some(record) => match record.acknowledge_sync(&packet) {
                            Ok(_) => None,
                            Err(e) => {
                                log::error!("Client {}: {}", record.id(), e);
                                Some(record.id())
                            }
                        },
                        None => {
                            log::debug!("Ignoring sync from unknown {}", packet.addr);
                            None
                        }
                    }
                };
                if let Some(id) = violation {
                    self.drop_connection(id, DisconnectReason::ProtocolViolation);
                }
            }
            PacketKind::GameData => self.handle_game_data(packet),
        }
    }

    fn handle_handshake(&self, addr: SocketAddr) {
        let admitted = {
            let mut connections = self.connections.lock();
            match connections.get_or_admit(addr) {
                Ok((record, created)) => {
                    record.touch();
                    Ok((record.id(), created))
                }
                Err(e) => Err(e),
            }
        };

        match admitted {
            Ok((id, true)) => {
                log::info!("Client {} connected from {}", id, addr);
                self.push_event(ServerEvent::ClientConnected {
                    connection: id,
                    addr,
                });
            }
            Ok((_, false)) => {}
            Err(AdmitError::Full(max)) => {
                log::warn!("Connection denied to {}: server full ({} connections)", addr, max);
                self.push_event(ServerEvent::ConnectionDenied {
                    addr,
                    reason: format!("server full ({} connections)", max),
                });
                return;
            }
        }

        self.transport.send(Packet::handshake(addr));
    }

    fn handle_game_data(&self, packet: Packet) {
        let id = {
            let mut connections = self.connections.lock();
            match connections.get_by_addr_mut(&packet.addr) {
                Some(record) => {
                    record.touch();
                    record.id()
                }
                None => {
                    log::debug!("Dropping game data from unknown {}", packet.addr);
                    return;
                }
            }
        };

        let event = match packet.game_event() {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                log::warn!("Client {} sent undecodable game data: {}", id, e);
                return;
            }
            None => return,
        };

        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(id, event),
            None => log::trace!("No handler for {:?} from client {}", event.kind(), id),
        }
    }

    fn session_loop(&self) {
        loop {
            match self.transport.receive() {
                Received::Packet(packet) => self.handle_packet(packet),
                Received::Rejected { from, error } => match self.connection_for(&from) {
                    Some(id) => {
                        log::error!("Client {} sent an undecodable datagram: {}", id, error);
                        self.drop_connection(id, DisconnectReason::ProtocolViolation);
                    }
                    None => log::debug!("Ignoring undecodable datagram from {}", from),
                },
                Received::Timeout => {}
                Received::Closed => break,
            }
        }
        log::debug!("Server session loop finished");
    }

    /// Sends one round of Sync and evicts connections past the miss limit.
    fn sync_tick(&self) {
        let limit = self.config.missed_sync_limit;
        let mut targets = Vec::new();
        let mut expired = Vec::new();
        let mut broken = Vec::new();

        {
            let mut connections = self.connections.lock();
            for record in connections.iter_mut() {
                match record.sync_tick(limit) {
                    Ok(SyncOutcome::Alive) => targets.push(record.addr()),
                    Ok(SyncOutcome::Expired) => expired.push(record.id()),
                    Err(e) => {
                        log::error!("Client {}: {}", record.id(), e);
                        broken.push(record.id());
                    }
                }
            }
        }

        for id in expired {
            self.drop_connection(id, DisconnectReason::Timeout);
        }
        for id in broken {
            self.drop_connection(id, DisconnectReason::ProtocolViolation);
        }
        for addr in targets {
            self.transport.send(Packet::sync(addr));
        }
    }
}

/// Server side of the session layer: admits clients, keeps them alive and
/// relays game data to a single handler.
pub struct Server {
    shared: Arc<Shared>,
    session_loop: Mutex<Option<JoinHandle<()>>>,
    sync_task: Mutex<Option<PeriodicTask>>,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: ServerConfig) -> Result<Self, SessionError> {
        let transport = TransportWorker::bind(addr, &config.transport)?;
        let shared = Arc::new(Shared {
            connections: Mutex::new(ConnectionTable::new(config.max_connections)),
            config,
            transport,
            handler: Mutex::new(None),
            events: Mutex::new(VecDeque::new()),
        });

        let session_loop = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("huddle-server-session".to_string())
                .spawn(move || shared.session_loop())?
        };

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let sync_task = PeriodicTask::start(
            "huddle-sync",
            shared.config.sync_initial_delay(),
            shared.config.sync_period(),
            move || {
                if let Some(shared) = weak.upgrade() {
                    if shared.transport.is_running() {
                        shared.sync_tick();
                    }
                }
            },
        )?;

        log::info!("Server listening on {}", shared.transport.local_addr());

        Ok(Self {
            shared,
            session_loop: Mutex::new(Some(session_loop)),
            sync_task: Mutex::new(Some(sync_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.transport.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.transport.is_running()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.transport.stats()
    }

    /// Replaces the game-event handler. Events arriving with no handler are
    /// dropped.
    pub fn on_game_event<F>(&self, handler: F)
    where
        F: Fn(ConnectionId, GameEvent) + Send + Sync + 'static,
    {
        *self.shared.handler.lock() = Some(Arc::new(handler));
    }

    pub fn set_handler(&self, handler: Option<GameEventHandler>) {
        *self.shared.handler.lock() = handler;
    }

    pub fn broadcast(&self, event: &GameEvent) {
        for addr in self.shared.connections.lock().addrs() {
            self.shared.transport.send(Packet::game_data(addr, event));
        }
    }

    pub fn broadcast_except(&self, event: &GameEvent, except: ConnectionId) {
        let connections = self.shared.connections.lock();
        for record in connections.iter().filter(|r| r.id() != except) {
            self.shared
                .transport
                .send(Packet::game_data(record.addr(), event));
        }
    }

    /// Sends `event` to one connection only.
    pub fn signal(&self, connection: ConnectionId, event: &GameEvent) -> Result<(), SessionError> {
        let addr = self
            .shared
            .connections
            .lock()
            .get(connection)
            .map(|r| r.addr())
            .ok_or(SessionError::UnknownConnection(connection))?;
        self.shared.transport.send(Packet::game_data(addr, event));
        Ok(())
    }

    /// Snapshot of every live connection, ordered by id.
    pub fn roster(&self) -> Vec<ConnectionInfo> {
        let mut roster: Vec<_> = self
            .shared
            .connections
            .lock()
            .iter()
            .map(|r| r.info())
            .collect();
        roster.sort_by_key(|info| info.id);
        roster
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.shared.connections.lock().get(connection).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Forgets a connection. The peer is not notified.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        self.shared
            .drop_connection(connection, DisconnectReason::Kicked)
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        self.shared.events.lock().drain(..).collect()
    }

    pub fn shutdown(&self) {
        if let Some(mut task) = self.sync_task.lock().take() {
            task.stop();
        }

        let ids: Vec<_> = self.shared.connections.lock().iter().map(|r| r.id()).collect();
        for id in ids {
            self.shared.drop_connection(id, DisconnectReason::Shutdown);
        }

        self.shared.transport.shutdown();
        if let Some(handle) = self.session_loop.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig {
            transport: TransportConfig {
                socket_timeout_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn peer() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn recv_kind(socket: &UdpSocket) -> Option<PacketKind> {
        let mut buf = [0u8; 256];
        let (size, _) = socket.recv_from(&mut buf).ok()?;
        PacketKind::from_tag(*buf[..size].first()?)
    }

    fn handshake(server: &Server, socket: &UdpSocket) {
        socket
            .send_to(&[PacketKind::Handshake.tag()], server.local_addr())
            .unwrap();
        assert_eq!(recv_kind(socket), Some(PacketKind::Handshake));
    }

    #[test]
    fn handshake_admits_and_echoes() {
        let server = Server::bind("127.0.0.1:0", config()).unwrap();
        let client = peer();

        handshake(&server, &client);
        handshake(&server, &client);

        assert_eq!(server.connection_count(), 1);
        let events = server.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ServerEvent::ClientConnected { connection: 1, .. }
        ));
    }

    #[test]
    fn full_server_denies_without_echo() {
        let server = Server::bind(
            "127.0.0.1:0",
            ServerConfig {
                max_connections: 1,
                ..config()
            },
        )
        .unwrap();
        let first = peer();
        let second = peer();
        handshake(&server, &first);

        second
            .send_to(&[PacketKind::Handshake.tag()], server.local_addr())
            .unwrap();
        assert_eq!(recv_kind(&second), None);

        let events = server.drain_events();
        assert!(matches!(
            events.last(),
            Some(ServerEvent::ConnectionDenied { .. })
        ));
    }

    #[test]
    fn ping_is_echoed_only_for_known_peers() {
        let server = Server::bind("127.0.0.1:0", config()).unwrap();
        let stranger = peer();
        stranger
            .send_to(&[PacketKind::Ping.tag()], server.local_addr())
            .unwrap();
        assert_eq!(recv_kind(&stranger), None);

        let client = peer();
        handshake(&server, &client);
        client
            .send_to(&[PacketKind::Ping.tag()], server.local_addr())
            .unwrap();
        assert_eq!(recv_kind(&client), Some(PacketKind::Ping));
    }

    #[test]
    fn game_data_reaches_handler_with_origin() {
        let server = Server::bind("127.0.0.1:0", config()).unwrap();
        let (tx, rx) = crossbeam::channel::unbounded();
        server.on_game_event(move |id, event| {
            let _ = tx.send((id, event));
        });

        let client = peer();
        handshake(&server, &client);

        let event = GameEvent::select_character(2, 5);
        let packet = Packet::game_data(server.local_addr(), &event);
        client
            .send_to(&packet.serialize().unwrap(), server.local_addr())
            .unwrap();

        let (id, received) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(received, event);
    }

    #[test]
    fn silent_peer_is_evicted() {
        let server = Server::bind(
            "127.0.0.1:0",
            ServerConfig {
                sync_initial_delay_ms: 0,
                sync_period_ms: 10,
                missed_sync_limit: 3,
                ..config()
            },
        )
        .unwrap();
        let client = peer();
        handshake(&server, &client);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(server.connection_count(), 0);
        assert!(server.drain_events().iter().any(|e| matches!(
            e,
            ServerEvent::ClientDisconnected {
                reason: DisconnectReason::Timeout,
                ..
            }
        )));
    }

    #[test]
    fn kicked_connection_is_forgotten() {
        let server = Server::bind("127.0.0.1:0", config()).unwrap();
        let client = peer();
        handshake(&server, &client);
        assert!(server.is_connected(1));

        assert!(server.disconnect(1));
        assert!(!server.is_connected(1));
        assert!(!server.disconnect(1));
        assert!(server.drain_events().iter().any(|e| matches!(
            e,
            ServerEvent::ClientDisconnected {
                connection: 1,
                reason: DisconnectReason::Kicked,
                ..
            }
        )));
    }

    #[test]
    fn signal_unknown_connection_fails() {
        let server = Server::bind("127.0.0.1:0", config()).unwrap();
        let err = server.signal(9, &GameEvent::id_request()).unwrap_err();
        assert!(matches!(err, SessionError::UnknownConnection(9)));
    }
}
