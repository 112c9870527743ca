use std::collections::HashMap;

use glam::DMat4;

use crate::net::EntityId;

/// The scene-side collaborator the coordinators write into.
pub trait EntityTree {
    fn lookup_entity(&self, entity_id: EntityId) -> Option<DMat4>;

    fn apply_transform(&mut self, entity_id: EntityId, transform: DMat4);
}

/// Flat entity store for headless processes and tests.
#[derive(Debug, Default)]
pub struct MemoryTree {
    entities: HashMap<EntityId, DMat4>,
    applied: u64,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, entity_id: EntityId, transform: DMat4) {
        self.entities.insert(entity_id, transform);
    }

    pub fn despawn(&mut self, entity_id: EntityId) -> Option<DMat4> {
        self.entities.remove(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Transforms applied from the network since creation.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}

impl EntityTree for MemoryTree {
    fn lookup_entity(&self, entity_id: EntityId) -> Option<DMat4> {
        self.entities.get(&entity_id).copied()
    }

    fn apply_transform(&mut self, entity_id: EntityId, transform: DMat4) {
        if let Some(slot) = self.entities.get_mut(&entity_id) {
            *slot = transform;
            self.applied += 1;
        }
    }
}
