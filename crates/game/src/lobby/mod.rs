mod roster;

use serde::Serialize;

use crate::event::PlayerId;
use crate::net::ConnectionId;

pub use roster::{Player, PlayerRoster, RosterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LobbyState {
    Waiting,
    InGame,
}

/// Roster change published by a session coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyUpdate {
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    CharacterSelected { player: PlayerId, character: u8 },
    CharacterLocked { player: PlayerId, character: u8 },
    PlayerReady(PlayerId),
    GameStarted,
    /// The server assigned this client its player id.
    AssignedId(PlayerId),
    /// The server refused to hand out a player id.
    Rejected,
    ConnectionLost,
}

/// Character selection and ready-up for one match.
#[derive(Debug)]
pub struct Lobby {
    state: LobbyState,
    roster: PlayerRoster,
}

impl Lobby {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: LobbyState::Waiting,
            roster: PlayerRoster::new(capacity),
        }
    }

    pub fn state(&self) -> LobbyState {
        self.state
    }

    pub fn roster(&self) -> &PlayerRoster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut PlayerRoster {
        &mut self.roster
    }

    pub fn join(&mut self, connection: Option<ConnectionId>) -> Result<PlayerId, RosterError> {
        self.roster.register(connection)
    }

    pub fn leave(&mut self, id: PlayerId) -> Result<Player, RosterError> {
        let player = self.roster.unregister(id)?;
        if self.roster.is_empty() {
            self.state = LobbyState::Waiting;
        }
        Ok(player)
    }

    pub fn select_character(&mut self, id: PlayerId, character: u8) -> Result<(), RosterError> {
        let player = self.roster.get_mut(id)?;
        if player.locked {
            return Err(RosterError::AlreadyLocked(id));
        }
        player.character = Some(character);
        Ok(())
    }

    /// Locking requires an earlier selection; the locked character is the
    /// one named by the lock.
    pub fn lock_character(&mut self, id: PlayerId, character: u8) -> Result<(), RosterError> {
        let player = self.roster.get_mut(id)?;
        if player.locked {
            return Err(RosterError::AlreadyLocked(id));
        }
        if player.character.is_none() {
            return Err(RosterError::NotSelected(id));
        }
        player.character = Some(character);
        player.locked = true;
        Ok(())
    }

    /// Marks the player ready. Returns true when the lobby can start.
    pub fn mark_ready(&mut self, id: PlayerId) -> Result<bool, RosterError> {
        self.roster.get_mut(id)?.ready = true;
        Ok(self.state == LobbyState::Waiting && self.roster.all_ready())
    }

    /// Moves the lobby in game. Returns false if it already was.
    pub fn start(&mut self) -> bool {
        if self.state == LobbyState::InGame {
            return false;
        }
        self.state = LobbyState::InGame;
        true
    }
}
