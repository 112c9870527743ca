use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::PacketLossSimulation;

pub const MAX_PLAYERS: usize = 8;
pub const MISSED_SYNC_LIMIT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub socket_timeout_ms: u64,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    pub packet_loss: PacketLossSimulation,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_timeout_ms: 5000,
            outbound_capacity: 1024,
            inbound_capacity: 1024,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

impl TransportConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub connect_timeout_ms: u64,
    pub handshake_retry_ms: u64,
    pub ping_initial_delay_ms: u64,
    pub ping_period_ms: u64,
    pub ping_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            connect_timeout_ms: 5000,
            handshake_retry_ms: 500,
            ping_initial_delay_ms: 1000,
            ping_period_ms: 500,
            ping_timeout_ms: 2000,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    pub fn ping_initial_delay(&self) -> Duration {
        Duration::from_millis(self.ping_initial_delay_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: TransportConfig,
    pub max_connections: usize,
    pub max_players: usize,
    pub sync_initial_delay_ms: u64,
    pub sync_period_ms: u64,
    pub missed_sync_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            max_connections: 32,
            max_players: MAX_PLAYERS,
            sync_initial_delay_ms: 2000,
            sync_period_ms: 1000,
            missed_sync_limit: MISSED_SYNC_LIMIT,
        }
    }
}

impl ServerConfig {
    pub fn sync_initial_delay(&self) -> Duration {
        Duration::from_millis(self.sync_initial_delay_ms)
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_ms)
    }
}
