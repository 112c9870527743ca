use std::sync::Arc;

use glam::DMat4;
use parking_lot::Mutex;

use crate::event::{
    ConnectDetail, EventKind, GameEvent, Origin, PendingState, PlayerId, StartDetail,
    UNASSIGNED_PLAYER,
};
use crate::lobby::{Lobby, LobbyState, LobbyUpdate, RosterError};
use crate::net::{ConnectionId, EntityId};
use crate::session::ServerEvent;

use super::frame::{FrameCycle, FrameError, FramePhase};
use super::link::ServerLink;
use super::tree::EntityTree;

#[derive(Debug, Clone, PartialEq)]
enum Outgoing {
    Broadcast(GameEvent),
    Except(GameEvent, ConnectionId),
    Signal(GameEvent, ConnectionId),
}

/// Authoritative coordinator: owns the lobby and turns inbound game events
/// into roster changes and relays, one frame at a time.
pub struct ServerSession<L: ServerLink> {
    link: Arc<L>,
    pending: Arc<Mutex<PendingState>>,
    lobby: Lobby,
    host: Option<PlayerId>,
    frame: FrameCycle,
    outbox: Vec<Outgoing>,
    updates: Vec<LobbyUpdate>,
}

impl<L: ServerLink> ServerSession<L> {
    /// Takes over the link's game-event handler.
    pub fn new(link: Arc<L>, max_players: usize) -> Self {
        let pending = Arc::new(Mutex::new(PendingState::new()));
        let sink = Arc::clone(&pending);
        link.set_game_event_handler(Arc::new(move |connection: ConnectionId, event: GameEvent| {
            sink.lock()
                .push_inbound(Origin::Connection(connection), event);
        }));

        Self {
            link,
            pending,
            lobby: Lobby::new(max_players),
            host: None,
            frame: FrameCycle::new(),
            outbox: Vec::new(),
            updates: Vec::new(),
        }
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn host(&self) -> Option<PlayerId> {
        self.host
    }

    /// Registers the player playing on this process.
    pub fn register_host(&mut self) -> Result<PlayerId, RosterError> {
        if let Some(id) = self.host {
            return Ok(id);
        }

        let id = self.lobby.join(None)?;
        self.host = Some(id);
        log::info!("Host registered as player {}", id);
        self.outbox.push(Outgoing::Broadcast(GameEvent::connect(
            id,
            ConnectDetail::Connected,
        )));
        self.updates.push(LobbyUpdate::PlayerJoined(id));
        Ok(id)
    }

    /// Queues an action by the host player for the next commit.
    pub fn submit_local(&self, event: GameEvent) {
        self.pending.lock().push_inbound(Origin::Local, event);
    }

    pub fn on_entity_transform_changed(&self, entity_id: EntityId, transform: DMat4) {
        self.pending.lock().queue_transform(entity_id, transform);
    }

    pub fn on_frame_boundary<T: EntityTree>(
        &mut self,
        phase: FramePhase,
        tree: &mut T,
    ) -> Result<(), FrameError> {
        self.frame.advance(phase)?;
        match phase {
            FramePhase::ReadyForChanges => self.commit(tree),
            FramePhase::FinishedFrame => self.flush(),
        }
        Ok(())
    }

    pub fn drain_updates(&mut self) -> Vec<LobbyUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Events and transforms waiting for the next flush.
    pub fn pending_sends(&self) -> usize {
        self.outbox.len() + self.pending.lock().send_len()
    }

    fn commit<T: EntityTree>(&mut self, tree: &mut T) {
        for event in self.link.drain_server_events() {
            self.handle_server_event(event);
        }

        let inbound = self.pending.lock().take_commit();
        for item in inbound {
            self.apply(item.origin, item.event, tree);
        }
    }

    fn flush(&mut self) {
        for outgoing in self.outbox.drain(..) {
            match outgoing {
                Outgoing::Broadcast(event) => self.link.broadcast(&event),
                Outgoing::Except(event, except) => self.link.broadcast_except(&event, except),
                Outgoing::Signal(event, connection) => {
                    if let Err(e) = self.link.signal(connection, &event) {
                        log::debug!("Not sending {:?}: {}", event.kind(), e);
                    }
                }
            }
        }

        let batch = self.pending.lock().take_send();
        for event in &batch.events {
            self.link.broadcast(event);
        }
        let stamp = self.host.unwrap_or(UNASSIGNED_PLAYER);
        for transform in batch.transforms {
            self.link.broadcast(&GameEvent::movement(stamp, transform));
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientDisconnected {
                connection, reason, ..
            } => {
                let Ok(player) = self.lobby.roster().player_for_connection(connection) else {
                    return;
                };
                log::info!("Player {} left ({})", player, reason.as_str());
                self.remove_player(player);
            }
            ServerEvent::ClientConnected { connection, addr } => {
                log::debug!("Connection {} from {} awaiting id request", connection, addr);
            }
            ServerEvent::ConnectionDenied { .. } => {}
        }
    }

    fn remove_player(&mut self, player: PlayerId) {
        if self.lobby.leave(player).is_err() {
            return;
        }
        self.outbox.push(Outgoing::Broadcast(GameEvent::connect(
            player,
            ConnectDetail::Disconnected,
        )));
        self.updates.push(LobbyUpdate::PlayerLeft(player));

        // The departed player may have been the last one not ready.
        if self.lobby.roster().all_ready() {
            self.start_game();
        }
    }

    fn start_game(&mut self) {
        if !self.lobby.start() {
            return;
        }
        log::info!("All {} players ready, starting", self.lobby.roster().len());
        self.outbox.push(Outgoing::Broadcast(GameEvent::game_start(
            UNASSIGNED_PLAYER,
            StartDetail::Begin,
        )));
        self.updates.push(LobbyUpdate::GameStarted);
    }

    fn player_for(&self, origin: Origin) -> Option<PlayerId> {
        match origin {
            Origin::Local => self.host,
            Origin::Connection(connection) => {
                self.lobby.roster().player_for_connection(connection).ok()
            }
            Origin::Server => None,
        }
    }

    /// Relay target that skips the origin.
    fn relay(&mut self, event: GameEvent, origin: Origin) {
        match origin {
            Origin::Connection(connection) => self.outbox.push(Outgoing::Except(event, connection)),
            _ => self.outbox.push(Outgoing::Broadcast(event)),
        }
    }

    fn apply<T: EntityTree>(&mut self, origin: Origin, event: GameEvent, tree: &mut T) {
        if event.kind() == EventKind::Connect {
            self.apply_connect(origin, &event);
            return;
        }

        let Some(player) = self.player_for(origin) else {
            log::warn!("{:?} from {:?}: player not found", event.kind(), origin);
            return;
        };

        match event.kind() {
            EventKind::SelectCharacter => {
                let character = event.detail();
                match self.lobby.select_character(player, character) {
                    Ok(()) => {
                        self.outbox.push(Outgoing::Broadcast(GameEvent::select_character(
                            player, character,
                        )));
                        self.updates
                            .push(LobbyUpdate::CharacterSelected { player, character });
                    }
                    Err(e) => log::warn!("Select refused: {}", e),
                }
            }
            EventKind::LockCharacter => {
                let character = event.detail();
                match self.lobby.lock_character(player, character) {
                    Ok(()) => {
                        self.outbox.push(Outgoing::Broadcast(GameEvent::lock_character(
                            player, character,
                        )));
                        self.updates
                            .push(LobbyUpdate::CharacterLocked { player, character });
                    }
                    Err(e) => log::warn!("Lock refused: {}", e),
                }
            }
            EventKind::GameStart => self.apply_ready(player, &event),
            EventKind::Movement => {
                if let Some(transform) = event.transform() {
                    if tree.lookup_entity(transform.entity_id).is_some() {
                        tree.apply_transform(transform.entity_id, transform.matrix);
                    } else {
                        log::trace!("Movement for unknown entity {}", transform.entity_id);
                    }
                }
                self.relay(event.with_player(player), origin);
            }
            EventKind::PlayerTransform => self.relay(event.with_player(player), origin),
            EventKind::InitClientState | EventKind::Connect => {
                log::warn!("Player {} sent server-only {:?}", player, event.kind());
            }
        }
    }

    fn apply_connect(&mut self, origin: Origin, event: &GameEvent) {
        match (event.connect_detail(), origin) {
            (Some(ConnectDetail::IdRequest), Origin::Connection(connection)) => {
                self.admit(connection)
            }
            (Some(ConnectDetail::IdRequest), Origin::Local) => {
                if let Err(e) = self.register_host() {
                    log::warn!("Host not registered: {}", e);
                }
            }
            (Some(ConnectDetail::Disconnected), _) => match self.player_for(origin) {
                Some(player) => self.remove_player(player),
                None => log::warn!("Disconnect from {:?}: player not found", origin),
            },
            (detail, _) => log::warn!("Ignoring Connect {:?} from {:?}", detail, origin),
        }
    }

    fn admit(&mut self, connection: ConnectionId) {
        // Requests can outlive their connection by a frame.
        if !self.link.is_connected(connection) {
            log::debug!("Dropping id request from closed connection {}", connection);
            return;
        }

        let slots = self.lobby.roster().capacity() as u8;

        if let Ok(player) = self.lobby.roster().player_for_connection(connection) {
            log::debug!("Repeated id request from player {}", player);
            self.outbox.push(Outgoing::Signal(
                GameEvent::init_client_state(player, slots),
                connection,
            ));
            return;
        }

        let player = match self.lobby.join(Some(connection)) {
            Ok(player) => player,
            Err(e) => {
                log::warn!("Id request from connection {} refused: {}", connection, e);
                self.outbox.push(Outgoing::Signal(
                    GameEvent::connect(UNASSIGNED_PLAYER, ConnectDetail::Rejected),
                    connection,
                ));
                return;
            }
        };

        log::info!("Connection {} joined as player {}", connection, player);
        self.outbox.push(Outgoing::Broadcast(GameEvent::connect(
            player,
            ConnectDetail::Connected,
        )));
        self.outbox.push(Outgoing::Signal(
            GameEvent::init_client_state(player, slots),
            connection,
        ));

        let mut catch_up = Vec::new();
        for other in self.lobby.roster().iter().filter(|p| p.id != player) {
            catch_up.push(GameEvent::connect(other.id, ConnectDetail::Connected));
            if let Some(character) = other.character {
                catch_up.push(GameEvent::select_character(other.id, character));
                if other.locked {
                    catch_up.push(GameEvent::lock_character(other.id, character));
                }
            }
        }
        self.outbox.extend(
            catch_up
                .into_iter()
                .map(|event| Outgoing::Signal(event, connection)),
        );
        self.updates.push(LobbyUpdate::PlayerJoined(player));
    }

    fn apply_ready(&mut self, player: PlayerId, event: &GameEvent) {
        if event.start_detail() != Some(StartDetail::Ready) {
            log::warn!("Player {} sent GameStart {}", player, event.detail());
            return;
        }

        let everyone_ready = match self.lobby.mark_ready(player) {
            Ok(ready) => ready,
            Err(e) => {
                log::warn!("Ready refused: {}", e);
                return;
            }
        };
        self.outbox.push(Outgoing::Broadcast(GameEvent::game_start(
            player,
            StartDetail::Ready,
        )));
        self.updates.push(LobbyUpdate::PlayerReady(player));

        if everyone_ready {
            self.start_game();
        }
    }

    pub fn state(&self) -> LobbyState {
        self.lobby.state()
    }
}
