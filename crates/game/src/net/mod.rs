mod connection;
mod protocol;
mod stats;
mod transform;
mod transport;

pub use connection::{
    AdmitError, ConnectionId, ConnectionInfo, ConnectionRecord, ConnectionTable, Liveness,
    PeerError, PeerEvent, PeerState, SyncOutcome,
};
pub use protocol::{
    DEFAULT_FRAME_RATE, DEFAULT_PORT, MAX_PACKET_SIZE, Packet, PacketError, PacketKind,
};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use transform::{EntityId, TRANSFORM_PAYLOAD_SIZE, TransformPayload};
pub use transport::{Received, TransportWorker};
