use std::net::SocketAddr;

use crate::net::ConnectionId;

/// Lifecycle notifications from the server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        connection: ConnectionId,
        addr: SocketAddr,
    },
    ClientDisconnected {
        connection: ConnectionId,
        addr: SocketAddr,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Timeout,
    Kicked,
    ProtocolViolation,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ProtocolViolation => "dropped after a protocol violation",
            DisconnectReason::Shutdown => "disconnected by shutdown",
        }
    }
}

/// Lifecycle notifications from a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { server: SocketAddr },
    ConnectionLost,
    ProtocolViolation { description: String },
    Disconnected,
}
