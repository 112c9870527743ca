use bytes::{Buf, BufMut};

use crate::net::{PacketError, TRANSFORM_PAYLOAD_SIZE, TransformPayload};

pub type PlayerId = u8;

/// Player id carried by events from a client that has not been assigned one yet.
pub const UNASSIGNED_PLAYER: PlayerId = 0xFF;

/// Size of the fixed event header: kind, player id, detail.
pub const EVENT_HEADER_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Connect = 0,
    SelectCharacter = 1,
    LockCharacter = 2,
    GameStart = 3,
    Movement = 4,
    PlayerTransform = 5,
    InitClientState = 6,
}

impl EventKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Connect),
            1 => Some(Self::SelectCharacter),
            2 => Some(Self::LockCharacter),
            3 => Some(Self::GameStart),
            4 => Some(Self::Movement),
            5 => Some(Self::PlayerTransform),
            6 => Some(Self::InitClientState),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn carries_transform(self) -> bool {
        matches!(self, Self::Movement)
    }
}

/// Detail values for [`EventKind::Connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectDetail {
    IdRequest = 0,
    Connected = 1,
    Disconnected = 2,
    Rejected = 3,
}

impl ConnectDetail {
    pub fn from_detail(detail: u8) -> Option<Self> {
        match detail {
            0 => Some(Self::IdRequest),
            1 => Some(Self::Connected),
            2 => Some(Self::Disconnected),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Detail values for [`EventKind::GameStart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StartDetail {
    Ready = 0,
    Begin = 1,
}

impl StartDetail {
    pub fn from_detail(detail: u8) -> Option<Self> {
        match detail {
            0 => Some(Self::Ready),
            1 => Some(Self::Begin),
            _ => None,
        }
    }
}

/// A game-event record as carried by a GameData packet.
///
/// The transform is present exactly when the kind is [`EventKind::Movement`];
/// the constructors keep that invariant so every value encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    kind: EventKind,
    player_id: PlayerId,
    detail: u8,
    transform: Option<TransformPayload>,
}

impl GameEvent {
    /// Builds an event without a transform. Returns `None` for
    /// [`EventKind::Movement`], which must go through [`GameEvent::movement`].
    pub fn new(kind: EventKind, player_id: PlayerId, detail: u8) -> Option<Self> {
        if kind.carries_transform() {
            return None;
        }
        Some(Self::header_only(kind, player_id, detail))
    }

    fn header_only(kind: EventKind, player_id: PlayerId, detail: u8) -> Self {
        Self {
            kind,
            player_id,
            detail,
            transform: None,
        }
    }

    pub fn movement(player_id: PlayerId, transform: TransformPayload) -> Self {
        Self {
            kind: EventKind::Movement,
            player_id,
            detail: 0,
            transform: Some(transform),
        }
    }

    pub fn connect(player_id: PlayerId, detail: ConnectDetail) -> Self {
        Self::header_only(EventKind::Connect, player_id, detail as u8)
    }

    pub fn id_request() -> Self {
        Self::connect(UNASSIGNED_PLAYER, ConnectDetail::IdRequest)
    }

    pub fn select_character(player_id: PlayerId, character: u8) -> Self {
        Self::header_only(EventKind::SelectCharacter, player_id, character)
    }

    pub fn lock_character(player_id: PlayerId, character: u8) -> Self {
        Self::header_only(EventKind::LockCharacter, player_id, character)
    }

    pub fn game_start(player_id: PlayerId, detail: StartDetail) -> Self {
        Self::header_only(EventKind::GameStart, player_id, detail as u8)
    }

    pub fn init_client_state(player_id: PlayerId, slots: u8) -> Self {
        Self::header_only(EventKind::InitClientState, player_id, slots)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn detail(&self) -> u8 {
        self.detail
    }

    pub fn transform(&self) -> Option<&TransformPayload> {
        self.transform.as_ref()
    }

    pub fn connect_detail(&self) -> Option<ConnectDetail> {
        match self.kind {
            EventKind::Connect => ConnectDetail::from_detail(self.detail),
            _ => None,
        }
    }

    pub fn start_detail(&self) -> Option<StartDetail> {
        match self.kind {
            EventKind::GameStart => StartDetail::from_detail(self.detail),
            _ => None,
        }
    }

    /// Copy of this event attributed to another player.
    pub fn with_player(&self, player_id: PlayerId) -> Self {
        Self {
            player_id,
            ..self.clone()
        }
    }

    pub fn encoded_len(&self) -> usize {
        if self.kind.carries_transform() {
            EVENT_HEADER_SIZE + TRANSFORM_PAYLOAD_SIZE
        } else {
            EVENT_HEADER_SIZE
        }
    }

    pub fn encode_into(&self, out: &mut impl BufMut) {
        out.put_u8(self.kind.tag());
        out.put_u8(self.player_id);
        out.put_u8(self.detail);
        if let Some(transform) = &self.transform {
            transform.encode_into(out);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Decodes one event, consuming exactly its bytes from `buf`.
    pub fn decode_from(buf: &mut impl Buf) -> Result<Self, PacketError> {
        if buf.remaining() < EVENT_HEADER_SIZE {
            return Err(PacketError::Truncated {
                needed: EVENT_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let tag = buf.get_u8();
        let kind = EventKind::from_tag(tag).ok_or(PacketError::UnknownEventKind(tag))?;
        let player_id = buf.get_u8();
        let detail = buf.get_u8();

        let transform = if kind.carries_transform() {
            Some(TransformPayload::decode_from(buf)?)
        } else {
            None
        };

        Ok(Self {
            kind,
            player_id,
            detail,
            transform,
        })
    }

    /// Decodes a complete event payload; trailing bytes are an error.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        let mut buf = data;
        let event = Self::decode_from(&mut buf)?;
        if buf.has_remaining() {
            return Err(PacketError::TrailingBytes(buf.remaining()));
        }
        Ok(event)
    }
}
