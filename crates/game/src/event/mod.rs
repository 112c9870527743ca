mod queue;
mod types;

pub use queue::{InboundEvent, Origin, OutboundBatch, PendingState};
pub use types::{
    ConnectDetail, EVENT_HEADER_SIZE, EventKind, GameEvent, PlayerId, StartDetail,
    UNASSIGNED_PLAYER,
};
