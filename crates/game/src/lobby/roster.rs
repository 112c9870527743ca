use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::event::PlayerId;
use crate::net::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    pub id: PlayerId,
    /// `None` for the player hosted on this process.
    pub connection: Option<ConnectionId>,
    pub character: Option<u8>,
    pub locked: bool,
    pub ready: bool,
}

impl Player {
    fn new(id: PlayerId, connection: Option<ConnectionId>) -> Self {
        Self {
            id,
            connection,
            character: None,
            locked: false,
            ready: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster full ({0} players)")]
    Full(usize),
    #[error("player {0} not found")]
    NotFound(PlayerId),
    #[error("no player for connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("connection {connection} already owns player {player}")]
    AlreadyRegistered {
        connection: ConnectionId,
        player: PlayerId,
    },
    #[error("player {0} has not selected a character")]
    NotSelected(PlayerId),
    #[error("player {0} already locked a character")]
    AlreadyLocked(PlayerId),
}

/// Fixed-capacity player table with LIFO id reuse.
///
/// Ids are handed out lowest first; a freed id is the next one handed out.
#[derive(Debug)]
pub struct PlayerRoster {
    players: BTreeMap<PlayerId, Player>,
    free_ids: Vec<PlayerId>,
    by_connection: HashMap<ConnectionId, PlayerId>,
    capacity: usize,
}

impl PlayerRoster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(PlayerId::MAX as usize);
        Self {
            players: BTreeMap::new(),
            free_ids: (0..capacity as PlayerId).rev().collect(),
            by_connection: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn register(&mut self, connection: Option<ConnectionId>) -> Result<PlayerId, RosterError> {
        if let Some(connection) = connection {
            if let Some(&player) = self.by_connection.get(&connection) {
                return Err(RosterError::AlreadyRegistered { connection, player });
            }
        }

        let id = self.free_ids.pop().ok_or(RosterError::Full(self.capacity))?;
        self.players.insert(id, Player::new(id, connection));
        if let Some(connection) = connection {
            self.by_connection.insert(connection, id);
        }
        Ok(id)
    }

    pub fn unregister(&mut self, id: PlayerId) -> Result<Player, RosterError> {
        let player = self.players.remove(&id).ok_or(RosterError::NotFound(id))?;
        if let Some(connection) = player.connection {
            self.by_connection.remove(&connection);
        }
        if (id as usize) < self.capacity {
            self.free_ids.push(id);
        }
        Ok(player)
    }

    /// Inserts a player with an id chosen elsewhere, as a client does when it
    /// mirrors the server's roster. Returns false if the id is already known.
    pub fn mirror(&mut self, id: PlayerId) -> bool {
        if self.players.contains_key(&id) {
            return false;
        }
        self.free_ids.retain(|free| *free != id);
        self.players.insert(id, Player::new(id, None));
        true
    }

    pub fn get(&self, id: PlayerId) -> Result<&Player, RosterError> {
        self.players.get(&id).ok_or(RosterError::NotFound(id))
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Result<&mut Player, RosterError> {
        self.players.get_mut(&id).ok_or(RosterError::NotFound(id))
    }

    pub fn player_for_connection(&self, connection: ConnectionId) -> Result<PlayerId, RosterError> {
        self.by_connection
            .get(&connection)
            .copied()
            .ok_or(RosterError::UnknownConnection(connection))
    }

    /// Players in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.free_ids.is_empty()
    }

    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.values().all(|p| p.ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_lowest_first_and_reused_lifo() {
        let mut roster = PlayerRoster::new(8);
        assert_eq!(roster.register(Some(10)).unwrap(), 0);
        assert_eq!(roster.register(Some(11)).unwrap(), 1);
        assert_eq!(roster.register(Some(12)).unwrap(), 2);

        roster.unregister(1).unwrap();
        assert_eq!(roster.register(Some(13)).unwrap(), 1);
        assert_eq!(roster.register(None).unwrap(), 3);
    }

    #[test]
    fn full_roster_refuses() {
        let mut roster = PlayerRoster::new(2);
        roster.register(None).unwrap();
        roster.register(Some(1)).unwrap();
        assert!(roster.is_full());
        assert_eq!(roster.register(Some(2)), Err(RosterError::Full(2)));
    }

    #[test]
    fn connection_owns_one_player() {
        let mut roster = PlayerRoster::new(8);
        let id = roster.register(Some(4)).unwrap();
        assert_eq!(roster.player_for_connection(4), Ok(id));
        assert_eq!(
            roster.register(Some(4)),
            Err(RosterError::AlreadyRegistered {
                connection: 4,
                player: id
            })
        );

        roster.unregister(id).unwrap();
        assert_eq!(
            roster.player_for_connection(4),
            Err(RosterError::UnknownConnection(4))
        );
    }

    #[test]
    fn missing_players_are_reported() {
        let mut roster = PlayerRoster::new(8);
        assert_eq!(roster.get(3).unwrap_err(), RosterError::NotFound(3));
        assert_eq!(roster.unregister(3).unwrap_err(), RosterError::NotFound(3));
    }

    #[test]
    fn mirrored_ids_leave_the_pool() {
        let mut roster = PlayerRoster::new(4);
        assert!(roster.mirror(0));
        assert!(!roster.mirror(0));
        assert_eq!(roster.register(None).unwrap(), 1);
    }

    #[test]
    fn all_ready_needs_players() {
        let mut roster = PlayerRoster::new(4);
        assert!(!roster.all_ready());

        let a = roster.register(None).unwrap();
        let b = roster.register(Some(1)).unwrap();
        roster.get_mut(a).unwrap().ready = true;
        assert!(!roster.all_ready());
        roster.get_mut(b).unwrap().ready = true;
        assert!(roster.all_ready());
    }
}
