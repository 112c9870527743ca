pub mod config;
pub mod event;
pub mod fsm;
pub mod lobby;
pub mod net;
pub mod session;
pub mod simulation;

pub use config::{ClientConfig, MAX_PLAYERS, MISSED_SYNC_LIMIT, ServerConfig, TransportConfig};
pub use event::{
    ConnectDetail, EventKind, GameEvent, Origin, PendingState, PlayerId, StartDetail,
    UNASSIGNED_PLAYER,
};
pub use fsm::{StateMachine, TransitionError};
pub use lobby::{Lobby, LobbyState, LobbyUpdate, Player, PlayerRoster, RosterError};
pub use net::{
    ConnectionId, ConnectionInfo, DEFAULT_FRAME_RATE, DEFAULT_PORT, EntityId, NetworkStats,
    Packet, PacketError, PacketKind, PacketLossSimulation, TransformPayload, TransportWorker,
};
pub use session::{
    Client, ClientState, DisconnectReason, Server, ServerEvent, SessionError, SessionEvent,
};
pub use simulation::{
    ClientSession, EntityTree, FixedTimestep, FramePhase, MemoryTree, ServerSession,
};
