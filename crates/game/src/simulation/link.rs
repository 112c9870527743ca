use crate::event::GameEvent;
use crate::net::ConnectionId;
use crate::session::{Client, GameEventHandler, Server, ServerEvent, SessionError, SessionEvent};

/// What the server coordinator needs from a session manager.
pub trait ServerLink: Send + Sync + 'static {
    fn set_game_event_handler(&self, handler: GameEventHandler);

    fn drain_server_events(&self) -> Vec<ServerEvent>;

    fn broadcast(&self, event: &GameEvent);

    fn broadcast_except(&self, event: &GameEvent, except: ConnectionId);

    fn signal(&self, connection: ConnectionId, event: &GameEvent) -> Result<(), SessionError>;

    /// Whether `connection` is still admitted.
    fn is_connected(&self, connection: ConnectionId) -> bool;
}

/// What the client coordinator needs from a session manager.
pub trait ClientLink {
    fn send_game_event(&self, event: &GameEvent);

    fn drain_game_events(&self) -> Vec<GameEvent>;

    fn drain_session_events(&self) -> Vec<SessionEvent>;
}

impl ServerLink for Server {
    fn set_game_event_handler(&self, handler: GameEventHandler) {
        self.set_handler(Some(handler));
    }

    fn drain_server_events(&self) -> Vec<ServerEvent> {
        self.drain_events()
    }

    fn broadcast(&self, event: &GameEvent) {
        Server::broadcast(self, event);
    }

    fn broadcast_except(&self, event: &GameEvent, except: ConnectionId) {
        Server::broadcast_except(self, event, except);
    }

    fn signal(&self, connection: ConnectionId, event: &GameEvent) -> Result<(), SessionError> {
        Server::signal(self, connection, event)
    }

    fn is_connected(&self, connection: ConnectionId) -> bool {
        Server::is_connected(self, connection)
    }
}

impl ClientLink for Client {
    fn send_game_event(&self, event: &GameEvent) {
        Client::send_game_event(self, event);
    }

    fn drain_game_events(&self) -> Vec<GameEvent> {
        Client::drain_game_events(self)
    }

    fn drain_session_events(&self) -> Vec<SessionEvent> {
        Client::drain_session_events(self)
    }
}
