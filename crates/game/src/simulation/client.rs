use std::sync::Arc;

use glam::DMat4;

use crate::config::MAX_PLAYERS;
use crate::event::{
    ConnectDetail, EventKind, GameEvent, Origin, PendingState, PlayerId, StartDetail,
    UNASSIGNED_PLAYER,
};
use crate::lobby::{Lobby, LobbyState, LobbyUpdate};
use crate::net::EntityId;
use crate::session::SessionEvent;

use super::frame::{FrameCycle, FrameError, FramePhase};
use super::link::ClientLink;
use super::tree::EntityTree;

/// Client-side coordinator: mirrors the server's lobby and ships local
/// actions and transforms once per frame.
pub struct ClientSession<L: ClientLink> {
    link: Arc<L>,
    pending: PendingState,
    lobby: Lobby,
    local: Option<PlayerId>,
    frame: FrameCycle,
    updates: Vec<LobbyUpdate>,
}

impl<L: ClientLink> ClientSession<L> {
    pub fn new(link: Arc<L>) -> Self {
        Self {
            link,
            pending: PendingState::new(),
            lobby: Lobby::new(MAX_PLAYERS),
            local: None,
            frame: FrameCycle::new(),
            updates: Vec::new(),
        }
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Player id assigned by the server, once InitClientState arrived.
    pub fn local_player(&self) -> Option<PlayerId> {
        self.local
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn state(&self) -> LobbyState {
        self.lobby.state()
    }

    fn stamp(&self) -> PlayerId {
        self.local.unwrap_or(UNASSIGNED_PLAYER)
    }

    pub fn request_id(&mut self) {
        self.pending.queue_event(GameEvent::id_request());
    }

    pub fn select_character(&mut self, character: u8) {
        let event = GameEvent::select_character(self.stamp(), character);
        self.pending.queue_event(event);
    }

    pub fn lock_character(&mut self, character: u8) {
        let event = GameEvent::lock_character(self.stamp(), character);
        self.pending.queue_event(event);
    }

    pub fn ready(&mut self) {
        let event = GameEvent::game_start(self.stamp(), StartDetail::Ready);
        self.pending.queue_event(event);
    }

    pub fn on_entity_transform_changed(&mut self, entity_id: EntityId, transform: DMat4) {
        self.pending.queue_transform(entity_id, transform);
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

    fn commit<T: EntityTree>(&mut self, tree: &mut T) {
        for event in self.link.drain_session_events() {
            match event {
                SessionEvent::ConnectionLost | SessionEvent::ProtocolViolation { .. } => {
                    self.updates.push(LobbyUpdate::ConnectionLost);
                }
                SessionEvent::Connected { server } => log::debug!("Session up with {}", server),
                SessionEvent::Disconnected => {}
            }
        }

        for event in self.link.drain_game_events() {
            self.pending.push_inbound(Origin::Server, event);
        }
        for item in self.pending.take_commit() {
            self.apply(item.event, tree);
        }
    }

    fn flush(&mut self) {
        let batch = self.pending.take_send();
        for event in &batch.events {
            self.link.send_game_event(event);
        }
        let stamp = self.stamp();
        for transform in batch.transforms {
            self.link
                .send_game_event(&GameEvent::movement(stamp, transform));
        }
    }

    fn apply<T: EntityTree>(&mut self, event: GameEvent, tree: &mut T) {
        let player = event.player_id();
        match event.kind() {
            EventKind::InitClientState => {
                if self.local != Some(player) {
                    log::info!("Assigned player id {}", player);
                    self.local = Some(player);
                    self.lobby.roster_mut().mirror(player);
                    self.updates.push(LobbyUpdate::AssignedId(player));
                }
            }
            EventKind::Connect => match event.connect_detail() {
                Some(ConnectDetail::Connected) => {
                    if self.lobby.roster_mut().mirror(player) {
                        self.updates.push(LobbyUpdate::PlayerJoined(player));
                    }
                }
                Some(ConnectDetail::Disconnected) => {
                    if self.lobby.leave(player).is_ok() {
                        self.updates.push(LobbyUpdate::PlayerLeft(player));
                    }
                }
                Some(ConnectDetail::Rejected) => {
                    log::warn!("Server refused to assign a player id");
                    self.updates.push(LobbyUpdate::Rejected);
                }
                other => log::debug!("Ignoring Connect {:?} from server", other),
            },
            EventKind::SelectCharacter | EventKind::LockCharacter => {
                let character = event.detail();
                let locked = event.kind() == EventKind::LockCharacter;
                let Ok(mirrored) = self.lobby.roster_mut().get_mut(player) else {
                    log::warn!("{:?} for player {}: player not found", event.kind(), player);
                    return;
                };
                mirrored.character = Some(character);
                if locked {
                    mirrored.locked = true;
                    self.updates
                        .push(LobbyUpdate::CharacterLocked { player, character });
                } else {
                    self.updates
                        .push(LobbyUpdate::CharacterSelected { player, character });
                }
            }
            EventKind::GameStart => match event.start_detail() {
                Some(StartDetail::Ready) => match self.lobby.roster_mut().get_mut(player) {
                    Ok(mirrored) => {
                        mirrored.ready = true;
                        self.updates.push(LobbyUpdate::PlayerReady(player));
                    }
                    Err(e) => log::warn!("Ready for player {}: {}", player, e),
                },
                Some(StartDetail::Begin) => {
                    if self.lobby.start() {
                        log::info!("Game started");
                        self.updates.push(LobbyUpdate::GameStarted);
                    }
                }
                None => log::warn!("Unknown GameStart detail {}", event.detail()),
            },
            EventKind::Movement => {
                if let Some(transform) = event.transform() {
                    if tree.lookup_entity(transform.entity_id).is_some() {
                        tree.apply_transform(transform.entity_id, transform.matrix);
                    }
                }
            }
            EventKind::PlayerTransform => {
                log::trace!("PlayerTransform from player {}", player);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TransformPayload;
    use crate::simulation::MemoryTree;
    use glam::DVec3;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MockLink {
        inbound: Mutex<Vec<GameEvent>>,
        lifecycle: Mutex<Vec<SessionEvent>>,
        sent: Mutex<Vec<GameEvent>>,
    }

    impl ClientLink for MockLink {
        fn send_game_event(&self, event: &GameEvent) {
            self.sent.lock().push(event.clone());
        }

        fn drain_game_events(&self) -> Vec<GameEvent> {
            std::mem::take(&mut *self.inbound.lock())
        }

        fn drain_session_events(&self) -> Vec<SessionEvent> {
            std::mem::take(&mut *self.lifecycle.lock())
        }
    }

    fn frame(session: &mut ClientSession<MockLink>, tree: &mut MemoryTree) {
        session
            .on_frame_boundary(FramePhase::ReadyForChanges, tree)
            .unwrap();
        session
            .on_frame_boundary(FramePhase::FinishedFrame, tree)
            .unwrap();
    }

    #[test]
    fn lobby_actions_are_sent_at_frame_end() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();

        session.request_id();
        session.select_character(2);
        assert!(link.sent.lock().is_empty());

        frame(&mut session, &mut tree);
        assert_eq!(
            *link.sent.lock(),
            vec![
                GameEvent::id_request(),
                GameEvent::select_character(UNASSIGNED_PLAYER, 2)
            ]
        );
    }

    #[test]
    fn mirrors_the_server_roster() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();

        link.inbound.lock().extend([
            GameEvent::connect(0, ConnectDetail::Connected),
            GameEvent::connect(1, ConnectDetail::Connected),
            GameEvent::init_client_state(1, 8),
            GameEvent::select_character(0, 4),
            GameEvent::lock_character(0, 4),
            GameEvent::connect(0, ConnectDetail::Disconnected),
        ]);
        frame(&mut session, &mut tree);

        assert_eq!(session.local_player(), Some(1));
        assert_eq!(
            session.drain_updates(),
            vec![
                LobbyUpdate::PlayerJoined(0),
                LobbyUpdate::PlayerJoined(1),
                LobbyUpdate::AssignedId(1),
                LobbyUpdate::CharacterSelected {
                    player: 0,
                    character: 4
                },
                LobbyUpdate::CharacterLocked {
                    player: 0,
                    character: 4
                },
                LobbyUpdate::PlayerLeft(0),
            ]
        );
        assert_eq!(session.lobby().roster().len(), 1);

        session.ready();
        frame(&mut session, &mut tree);
        assert_eq!(
            link.sent.lock().last(),
            Some(&GameEvent::game_start(1, StartDetail::Ready))
        );
    }

    #[test]
    fn begin_switches_to_in_game() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();

        link.inbound
            .lock()
            .push(GameEvent::game_start(UNASSIGNED_PLAYER, StartDetail::Begin));
        frame(&mut session, &mut tree);
        assert_eq!(session.state(), LobbyState::InGame);
        assert_eq!(session.drain_updates(), vec![LobbyUpdate::GameStarted]);
    }

    #[test]
    fn movement_applies_latest_transform() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();
        tree.spawn(3, DMat4::IDENTITY);

        let at = |x: f64| DMat4::from_translation(DVec3::new(x, 0.0, 0.0));
        link.inbound.lock().extend([
            GameEvent::movement(0, TransformPayload::new(3, at(1.0))),
            GameEvent::movement(0, TransformPayload::new(3, at(2.0))),
            GameEvent::movement(0, TransformPayload::new(99, at(5.0))),
        ]);
        frame(&mut session, &mut tree);

        assert_eq!(tree.lookup_entity(3), Some(at(2.0)));
        assert_eq!(tree.applied(), 1);
        assert!(tree.lookup_entity(99).is_none());
    }

    #[test]
    fn local_transforms_are_stamped_with_player_id() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();

        link.inbound.lock().push(GameEvent::init_client_state(2, 8));
        session
            .on_frame_boundary(FramePhase::ReadyForChanges, &mut tree)
            .unwrap();
        session.on_entity_transform_changed(7, DMat4::IDENTITY);
        session
            .on_frame_boundary(FramePhase::FinishedFrame, &mut tree)
            .unwrap();

        assert_eq!(
            *link.sent.lock(),
            vec![GameEvent::movement(
                2,
                TransformPayload::new(7, DMat4::IDENTITY)
            )]
        );
    }

    #[test]
    fn lost_session_surfaces_as_update() {
        let link = Arc::new(MockLink::default());
        let mut session = ClientSession::new(Arc::clone(&link));
        let mut tree = MemoryTree::new();

        link.lifecycle.lock().push(SessionEvent::ConnectionLost);
        frame(&mut session, &mut tree);
        assert_eq!(session.drain_updates(), vec![LobbyUpdate::ConnectionLost]);
    }
}
