use bytes::{Buf, BufMut};
use glam::DMat4;

use super::protocol::PacketError;

pub type EntityId = u32;

/// Entity id plus sixteen matrix components.
pub const TRANSFORM_PAYLOAD_SIZE: usize = 4 + 16 * 8;

/// World transform of one entity, as shipped inside a Movement event.
///
/// Components travel as `f64` in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPayload {
    pub entity_id: EntityId,
    pub matrix: DMat4,
}

impl TransformPayload {
    pub fn new(entity_id: EntityId, matrix: DMat4) -> Self {
        Self { entity_id, matrix }
    }

    pub fn row_major(&self) -> [f64; 16] {
        self.matrix.transpose().to_cols_array()
    }

    pub fn from_row_major(entity_id: EntityId, rows: &[f64; 16]) -> Self {
        Self {
            entity_id,
            matrix: DMat4::from_cols_array(rows).transpose(),
        }
    }

    pub fn encode_into(&self, out: &mut impl BufMut) {
        out.put_u32(self.entity_id);
        for component in self.row_major() {
            out.put_f64(component);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSFORM_PAYLOAD_SIZE);
        self.encode_into(&mut out);
        out
    }

    pub fn decode_from(buf: &mut impl Buf) -> Result<Self, PacketError> {
        if buf.remaining() < TRANSFORM_PAYLOAD_SIZE {
            return Err(PacketError::Truncated {
                needed: TRANSFORM_PAYLOAD_SIZE,
                available: buf.remaining(),
            });
        }

        let entity_id = buf.get_u32();
        let mut rows = [0.0f64; 16];
        for component in &mut rows {
            *component = buf.get_f64();
        }

        Ok(Self::from_row_major(entity_id, &rows))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        let mut buf = data;
        let payload = Self::decode_from(&mut buf)?;
        if buf.has_remaining() {
            return Err(PacketError::TrailingBytes(buf.remaining()));
        }
        Ok(payload)
    }
}
