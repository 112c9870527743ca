use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use serde::Serialize;

use crate::fsm::{StateMachine, TransitionError};

use super::protocol::Packet;

pub type ConnectionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PeerState {
    Connected,
    AwaitingSync,
    TimedOut,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    Syncing,
    SyncAck,
    MissedLimit,
    Disconnect,
}

pub type PeerError = TransitionError<PeerState, PeerEvent>;

/// Liveness bookkeeping mutated by the per-connection state machine.
#[derive(Debug, Clone)]
pub struct Liveness {
    pub missed_syncs: u32,
    pub last_seen: Instant,
}

impl Liveness {
    fn new() -> Self {
        Self {
            missed_syncs: 0,
            last_seen: Instant::now(),
        }
    }
}

fn count_miss(liveness: &mut Liveness, _: Option<&Packet>) {
    liveness.missed_syncs += 1;
}

fn reset_misses(liveness: &mut Liveness, _: Option<&Packet>) {
    liveness.missed_syncs = 0;
    liveness.last_seen = Instant::now();
}

fn peer_machine() -> StateMachine<PeerState, PeerEvent, Liveness> {
    use PeerEvent as E;
    use PeerState as S;

    StateMachine::new("peer", S::Connected)
        .on(S::Connected, E::Syncing, S::AwaitingSync)
        .on_with(S::AwaitingSync, E::Syncing, S::AwaitingSync, count_miss)
        .on_with(S::AwaitingSync, E::SyncAck, S::Connected, reset_misses)
        .on_with(S::Connected, E::SyncAck, S::Connected, reset_misses)
        .on(S::AwaitingSync, E::MissedLimit, S::TimedOut)
        .on(S::TimedOut, E::Disconnect, S::Disconnected)
        .on(S::Connected, E::Disconnect, S::Disconnected)
        .on(S::AwaitingSync, E::Disconnect, S::Disconnected)
}

/// Result of one sync tick for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Alive,
    Expired,
}

#[derive(Debug)]
pub struct ConnectionRecord {
    id: ConnectionId,
    addr: SocketAddr,
    liveness: Liveness,
    machine: StateMachine<PeerState, PeerEvent, Liveness>,
    created_at: Instant,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            liveness: Liveness::new(),
            machine: peer_machine(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> PeerState {
        self.machine.state()
    }

    pub fn missed_syncs(&self) -> u32 {
        self.liveness.missed_syncs
    }

    pub fn last_seen(&self) -> Instant {
        self.liveness.last_seen
    }

    /// Advances the record for one periodic Sync. A Sync still unanswered
    /// from the previous tick counts as a miss; reaching `limit` misses moves
    /// the record through TimedOut to Disconnected.
    pub fn sync_tick(&mut self, limit: u32) -> Result<SyncOutcome, PeerError> {
        self.machine
            .fire(&mut self.liveness, PeerEvent::Syncing, None)?;

        if self.liveness.missed_syncs >= limit {
            self.machine
                .fire(&mut self.liveness, PeerEvent::MissedLimit, None)?;
            self.machine
                .fire(&mut self.liveness, PeerEvent::Disconnect, None)?;
            return Ok(SyncOutcome::Expired);
        }

        Ok(SyncOutcome::Alive)
    }

    pub fn acknowledge_sync(&mut self, packet: &Packet) -> Result<PeerState, PeerError> {
        self.machine
            .fire(&mut self.liveness, PeerEvent::SyncAck, Some(packet))
    }

    pub fn disconnect(&mut self) -> Result<PeerState, PeerError> {
        self.machine
            .fire(&mut self.liveness, PeerEvent::Disconnect, None)
    }

    pub fn touch(&mut self) {
        self.liveness.last_seen = Instant::now();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            addr: self.addr,
            state: self.state(),
            missed_syncs: self.liveness.missed_syncs,
            connected_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

/// Read-only view of a connection for roster snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub state: PeerState,
    pub missed_syncs: u32,
    pub connected_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("server full ({0} connections)")]
    Full(usize),
}

#[derive(Debug)]
pub struct ConnectionTable {
    by_addr: HashMap<SocketAddr, ConnectionId>,
    records: HashMap<ConnectionId, ConnectionRecord>,
    next_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            records: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Returns the record for `addr`, creating it when the address is new.
    /// The flag is true when a record was created.
    pub fn get_or_admit(
        &mut self,
        addr: SocketAddr,
    ) -> Result<(&mut ConnectionRecord, bool), AdmitError> {
        let existing = self
            .by_addr
            .get(&addr)
            .copied()
            .filter(|id| self.records.contains_key(id));

        let (id, created) = match existing {
            Some(id) => (id, false),
            None => {
                if self.records.len() >= self.max_connections {
                    return Err(AdmitError::Full(self.max_connections));
                }
                let id = self.next_id;
                self.next_id += 1;
                self.by_addr.insert(addr, id);
                (id, true)
            }
        };

        let record = self
            .records
            .entry(id)
            .or_insert_with(|| ConnectionRecord::new(id, addr));
        Ok((record, created))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.records.get_mut(&id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&ConnectionRecord> {
        self.by_addr.get(addr).and_then(|id| self.records.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut ConnectionRecord> {
        let id = *self.by_addr.get(addr)?;
        self.records.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        let record = self.records.remove(&id)?;
        self.by_addr.remove(&record.addr);
        Some(record)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionRecord> {
        self.records.values_mut()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.records.values().map(|r| r.addr).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
