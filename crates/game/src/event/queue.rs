use std::collections::{BTreeMap, VecDeque};

use glam::DMat4;

use crate::net::{ConnectionId, EntityId, TransformPayload};

use super::types::{EventKind, GameEvent};

/// Where an inbound event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The local player on this process.
    Local,
    /// The server, as seen by a client.
    Server,
    /// A remote client, as seen by the server.
    Connection(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub origin: Origin,
    pub event: GameEvent,
}

/// Everything to transmit at the end of one frame.
#[derive(Debug, Default, PartialEq)]
pub struct OutboundBatch {
    pub events: Vec<GameEvent>,
    pub transforms: Vec<TransformPayload>,
}

impl OutboundBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.transforms.is_empty()
    }
}

/// Per-frame buffers between the network and the game.
///
/// `to_commit` keeps receipt order. A Movement for an entity that is already
/// waiting replaces the earlier one and moves to the back. `to_send` keeps at
/// most one transform per entity; later changes within a frame overwrite
/// earlier ones.
#[derive(Debug, Default)]
pub struct PendingState {
    to_commit: VecDeque<InboundEvent>,
    to_send: BTreeMap<EntityId, DMat4>,
    outgoing: Vec<GameEvent>,
}

impl PendingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, origin: Origin, event: GameEvent) {
        if event.kind() == EventKind::Movement {
            if let Some(entity_id) = event.transform().map(|t| t.entity_id) {
                self.to_commit.retain(|pending| {
                    pending.event.kind() != EventKind::Movement
                        || pending.event.transform().map(|t| t.entity_id) != Some(entity_id)
                });
            }
        }
        self.to_commit.push_back(InboundEvent { origin, event });
    }

    pub fn queue_transform(&mut self, entity_id: EntityId, matrix: DMat4) {
        self.to_send.insert(entity_id, matrix);
    }

    pub fn queue_event(&mut self, event: GameEvent) {
        self.outgoing.push(event);
    }

    pub fn take_commit(&mut self) -> Vec<InboundEvent> {
        self.to_commit.drain(..).collect()
    }

    pub fn take_send(&mut self) -> OutboundBatch {
        OutboundBatch {
            events: std::mem::take(&mut self.outgoing),
            transforms: std::mem::take(&mut self.to_send)
                .into_iter()
                .map(|(entity_id, matrix)| TransformPayload::new(entity_id, matrix))
                .collect(),
        }
    }

    pub fn commit_len(&self) -> usize {
        self.to_commit.len()
    }

    pub fn send_len(&self) -> usize {
        self.to_send.len() + self.outgoing.len()
    }
}
