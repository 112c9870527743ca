mod client;
mod events;
mod server;
mod timer;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::net::ConnectionId;

pub use client::{Client, ClientError, ClientEvent, ClientState};
pub use events::{DisconnectReason, ServerEvent, SessionEvent};
pub use server::{GameEventHandler, Server};
pub use timer::PeriodicTask;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("no handshake answer from {addr} within {waited:?}")]
    ConnectTimeout { addr: SocketAddr, waited: Duration },
    #[error(transparent)]
    Protocol(#[from] ClientError),
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("session is not connected")]
    NotConnected,
}
