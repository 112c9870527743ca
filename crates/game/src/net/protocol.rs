use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::event::GameEvent;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_FRAME_RATE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Handshake = 0,
    Ping = 1,
    Sync = 2,
    GameData = 3,
}

impl PacketKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Handshake),
            1 => Some(Self::Ping),
            2 => Some(Self::Sync),
            3 => Some(Self::GameData),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet kind tag {0:#04x}")]
    UnknownKind(u8),
    #[error("unknown game event kind tag {0:#04x}")]
    UnknownEventKind(u8),
    #[error("truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("packet of {0} bytes exceeds the datagram limit")]
    Oversized(usize),
}

/// One datagram. For outbound packets `addr` is the destination, for inbound
/// packets it is the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub addr: SocketAddr,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, addr: SocketAddr, payload: Bytes) -> Self {
        Self {
            kind,
            addr,
            payload,
        }
    }

    pub fn handshake(addr: SocketAddr) -> Self {
        Self::new(PacketKind::Handshake, addr, Bytes::new())
    }

    pub fn ping(addr: SocketAddr) -> Self {
        Self::new(PacketKind::Ping, addr, Bytes::new())
    }

    pub fn sync(addr: SocketAddr) -> Self {
        Self::new(PacketKind::Sync, addr, Bytes::new())
    }

    pub fn game_data(addr: SocketAddr, event: &GameEvent) -> Self {
        Self::new(PacketKind::GameData, addr, Bytes::from(event.to_bytes()))
    }

    /// Decodes the GameData payload. Other kinds carry no event.
    pub fn game_event(&self) -> Option<Result<GameEvent, PacketError>> {
        match self.kind {
            PacketKind::GameData => Some(GameEvent::from_bytes(&self.payload)),
            _ => None,
        }
    }

    pub fn serialize(&self) -> Result<Bytes, PacketError> {
        let len = 1 + self.payload.len();
        if len > MAX_PACKET_SIZE {
            return Err(PacketError::Oversized(len));
        }

        let mut out = BytesMut::with_capacity(len);
        out.put_u8(self.kind.tag());
        out.put_slice(&self.payload);
        Ok(out.freeze())
    }

    /// Tag-driven decode. GameData payloads are fully validated here so a
    /// malformed event never reaches the session layer.
    pub fn deserialize(data: &[u8], addr: SocketAddr) -> Result<Self, PacketError> {
        let (&tag, rest) = data.split_first().ok_or(PacketError::Empty)?;
        let kind = PacketKind::from_tag(tag).ok_or(PacketError::UnknownKind(tag))?;

        match kind {
            PacketKind::Handshake | PacketKind::Ping | PacketKind::Sync => {
                if !rest.is_empty() {
                    return Err(PacketError::TrailingBytes(rest.len()));
                }
            }
            PacketKind::GameData => {
                GameEvent::from_bytes(rest)?;
            }
        }

        Ok(Self::new(kind, addr, Bytes::copy_from_slice(rest)))
    }
}
