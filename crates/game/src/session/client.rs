use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::event::GameEvent;
use crate::fsm::{StateMachine, TransitionError};
use crate::net::{NetworkStats, Packet, PacketKind, Received, TransportWorker};

use super::events::SessionEvent;
use super::timer::PeriodicTask;
use super::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Start,
    Disconnected,
    TryConnect,
    Connected,
    Error,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    Started,
    Connect,
    Connected,
    Pinging,
    GameDataReceived,
    Sync,
    Timeout,
    Disconnect,
}

pub type ClientError = TransitionError<ClientState, ClientEvent>;

type Link = Arc<Shared>;

struct Shared {
    server: SocketAddr,
    config: ClientConfig,
    transport: TransportWorker,
    machine: Mutex<StateMachine<ClientState, ClientEvent, Link>>,
    alive: AtomicBool,
    inbox: Mutex<Vec<GameEvent>>,
    lifecycle: Mutex<VecDeque<SessionEvent>>,
    /// Start of the outstanding ping probe, if any.
    probe: Mutex<Option<Instant>>,
    rtt: Mutex<Option<Duration>>,
    heartbeat: Mutex<Option<PeriodicTask>>,
    connected_tx: Sender<()>,
    connected_rx: Receiver<()>,
}

fn client_machine() -> StateMachine<ClientState, ClientEvent, Link> {
    use ClientEvent as E;
    use ClientState as S;

    StateMachine::new("client", S::Start)
        .on(S::Start, E::Started, S::Disconnected)
        .on_with(S::Disconnected, E::Connect, S::TryConnect, send_handshake)
        .on_with(S::TryConnect, E::Connect, S::TryConnect, send_handshake)
        .on_with(S::TryConnect, E::Connected, S::Connected, enter_connected)
        .on_with(S::TryConnect, E::GameDataReceived, S::TryConnect, buffer_event)
        .on_with(S::TryConnect, E::Sync, S::TryConnect, echo_sync)
        .on_with(S::TryConnect, E::Timeout, S::Error, connection_lost)
        .on_with(S::TryConnect, E::Disconnect, S::Disconnected, local_disconnect)
        .on(S::Connected, E::Connected, S::Connected)
        .on(S::Connected, E::Connect, S::Connected)
        .on_with(S::Connected, E::Pinging, S::Connected, record_rtt)
        .on_with(S::Connected, E::GameDataReceived, S::Connected, buffer_event)
        .on_with(S::Connected, E::Sync, S::Connected, echo_sync)
        .on_with(S::Connected, E::Timeout, S::Error, connection_lost)
        .on_with(S::Connected, E::Disconnect, S::Disconnected, local_disconnect)
}

fn send_handshake(link: &mut Link, _: Option<&Packet>) {
    link.transport.send(Packet::handshake(link.server));
}

fn enter_connected(link: &mut Link, _: Option<&Packet>) {
    let _ = link.connected_tx.try_send(());
    log::info!("Connected to {}", link.server);
    link.lifecycle
        .lock()
        .push_back(SessionEvent::Connected {
            server: link.server,
        });

    let weak = Arc::downgrade(link);
    match PeriodicTask::start(
        "huddle-ping",
        link.config.ping_initial_delay(),
        link.config.ping_period(),
        move || ping_tick(&weak),
    ) {
        Ok(task) => *link.heartbeat.lock() = Some(task),
        Err(e) => log::error!("Could not start heartbeat: {}", e),
    }
}

fn record_rtt(link: &mut Link, _: Option<&Packet>) {
    let Some(started) = link.probe.lock().take() else {
        log::debug!("Ping echo from {} without an outstanding probe", link.server);
        return;
    };
    let rtt = started.elapsed();
    log::trace!("RTT to {}: {:?}", link.server, rtt);
    *link.rtt.lock() = Some(rtt);
}

fn buffer_event(link: &mut Link, packet: Option<&Packet>) {
    match packet.and_then(Packet::game_event) {
        Some(Ok(event)) => link.inbox.lock().push(event),
        Some(Err(e)) => log::warn!("Dropping undecodable game event: {}", e),
        None => log::warn!("GameDataReceived fired without a GameData packet"),
    }
}

fn echo_sync(link: &mut Link, _: Option<&Packet>) {
    link.transport.send(Packet::sync(link.server));
}

fn connection_lost(link: &mut Link, _: Option<&Packet>) {
    log::warn!("Connection to {} lost", link.server);
    link.teardown();
    link.lifecycle.lock().push_back(SessionEvent::ConnectionLost);
}

fn local_disconnect(link: &mut Link, _: Option<&Packet>) {
    log::info!("Disconnecting from {}", link.server);
    link.teardown();
    link.lifecycle.lock().push_back(SessionEvent::Disconnected);
}

/// One heartbeat probe; never overlaps with another for the same session.
fn ping_tick(weak: &Weak<Shared>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    if !shared.is_alive() {
        return;
    }

    let mut probe = shared.probe.lock();
    match *probe {
        Some(started) if started.elapsed() >= shared.config.ping_timeout() => {
            drop(probe);
            log::warn!(
                "No ping echo from {} for {:?}",
                shared.server,
                shared.config.ping_timeout()
            );
            if let Err(e) = shared.fire(ClientEvent::Timeout, None) {
                shared.violation(&e.to_string());
            }
        }
        Some(_) => {}
        None => {
            *probe = Some(Instant::now());
            drop(probe);
            shared.transport.send(Packet::ping(shared.server));
        }
    }
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn fire(self: &Arc<Self>, event: ClientEvent, packet: Option<&Packet>) -> Result<ClientState, ClientError> {
        let mut link = Arc::clone(self);
        let mut machine = self.machine.lock();
        machine.fire(&mut link, event, packet)
    }

    fn state(&self) -> ClientState {
        self.machine.lock().state()
    }

    /// Stops the heartbeat and the transport and clears buffered data.
    fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(mut heartbeat) = self.heartbeat.lock().take() {
            heartbeat.stop();
        }
        self.transport.shutdown();
        self.inbox.lock().clear();
        self.probe.lock().take();
    }

    /// Parks the machine in Panic and tears the session down.
    fn violation(&self, description: &str) {
        if !self.is_alive() {
            log::debug!("Ignoring \"{}\" after teardown", description);
            return;
        }

        log::error!("Protocol violation from {}: {}", self.server, description);
        self.machine.lock().halt(ClientState::Panic);
        self.teardown();
        self.lifecycle
            .lock()
            .push_back(SessionEvent::ProtocolViolation {
                description: description.to_string(),
            });
    }

    fn handle_packet(self: &Arc<Self>, packet: Packet) {
        if packet.addr != self.server {
            log::debug!("Ignoring {:?} from stranger {}", packet.kind, packet.addr);
            return;
        }

        let event = match packet.kind {
            PacketKind::Handshake => ClientEvent::Connected,
            PacketKind::Ping => ClientEvent::Pinging,
            PacketKind::Sync => ClientEvent::Sync,
            PacketKind::GameData => ClientEvent::GameDataReceived,
        };

        if let Err(e) = self.fire(event, Some(&packet)) {
            log::debug!("Offending packet: {:?}", e.packet);
            self.violation(&e.to_string());
        }
    }

    fn session_loop(self: Arc<Self>) {
        loop {
            match self.transport.receive() {
                Received::Packet(packet) => self.handle_packet(packet),
                Received::Rejected { from, error } if from == self.server => {
                    self.violation(&format!("undecodable datagram: {}", error));
                }
                Received::Rejected { from, .. } => {
                    log::debug!("Ignoring undecodable datagram from stranger {}", from);
                }
                Received::Timeout => {}
                Received::Closed => break,
            }
        }
        log::debug!("Client session loop for {} finished", self.server);
    }
}

/// Client side of a session with one server.
pub struct Client {
    shared: Arc<Shared>,
    session_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Resolves `host`, handshakes with the server and blocks until the
    /// handshake is answered or the connect timeout elapses.
    pub fn connect(host: &str, port: u16, config: ClientConfig) -> Result<Self, SessionError> {
        let server = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SessionError::Resolve(format!("{}:{}", host, port)))?;
        Self::connect_addr(server, config)
    }

    pub fn connect_addr(server: SocketAddr, config: ClientConfig) -> Result<Self, SessionError> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let transport = TransportWorker::bind(bind_addr, &config.transport)?;
        let (connected_tx, connected_rx) = channel::bounded(1);

        let shared = Arc::new(Shared {
            server,
            config,
            transport,
            machine: Mutex::new(client_machine()),
            alive: AtomicBool::new(true),
            inbox: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(VecDeque::new()),
            probe: Mutex::new(None),
            rtt: Mutex::new(None),
            heartbeat: Mutex::new(None),
            connected_tx,
            connected_rx,
        });

        let session_loop = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("huddle-client-session".to_string())
                .spawn(move || shared.session_loop())?
        };

        let client = Self {
            shared,
            session_loop: Mutex::new(Some(session_loop)),
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&self) -> Result<(), SessionError> {
        let shared = &self.shared;
        shared.fire(ClientEvent::Started, None)?;

        log::info!("Connecting to {}", shared.server);
        let started = Instant::now();
        loop {
            shared.fire(ClientEvent::Connect, None)?;

            match shared.connected_rx.recv_timeout(shared.config.handshake_retry()) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::NotConnected),
                Err(RecvTimeoutError::Timeout) => {}
            }

            if !shared.is_alive() {
                return Err(SessionError::NotConnected);
            }

            // The echo may land between the wait and the resend.
            if shared.state() == ClientState::Connected {
                return Ok(());
            }

            if started.elapsed() >= shared.config.connect_timeout() {
                shared.fire(ClientEvent::Timeout, None)?;
                self.join_session_loop();
                return Err(SessionError::ConnectTimeout {
                    addr: shared.server,
                    waited: started.elapsed(),
                });
            }

            log::debug!("Resending handshake to {}", shared.server);
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.shared.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.transport.local_addr()
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_alive() && self.state() == ClientState::Connected
    }

    /// Most recent ping round trip, once one has completed.
    pub fn rtt(&self) -> Option<Duration> {
        *self.shared.rtt.lock()
    }

    pub fn stats(&self) -> NetworkStats {
        self.shared.transport.stats()
    }

    /// Fire-and-forget; dropped silently once the session is down.
    pub fn send_game_event(&self, event: &GameEvent) {
        if !self.shared.is_alive() {
            log::debug!("Dropping {:?} event: session is down", event.kind());
            return;
        }
        self.shared
            .transport
            .send(Packet::game_data(self.shared.server, event));
    }

    /// Every event received since the previous drain, in receipt order.
    pub fn drain_game_events(&self) -> Vec<GameEvent> {
        std::mem::take(&mut *self.shared.inbox.lock())
    }

    pub fn drain_session_events(&self) -> Vec<SessionEvent> {
        self.shared.lifecycle.lock().drain(..).collect()
    }

    pub fn disconnect(&self) {
        if self.shared.is_alive() {
            if let Err(e) = self.shared.fire(ClientEvent::Disconnect, None) {
                log::debug!("{}; tearing down directly", e);
                self.shared.teardown();
            }
        }
        self.join_session_loop();
    }

    fn join_session_loop(&self) {
        if let Some(handle) = self.session_loop.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}
