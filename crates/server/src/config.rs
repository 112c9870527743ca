use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use huddle::{DEFAULT_FRAME_RATE, DEFAULT_PORT, ServerConfig};

/// Everything the dedicated server reads from its TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub frame_rate: u32,
    /// Registers a player for this process, as a listen server would.
    pub host_player: bool,
    /// Entities spawned into the in-memory tree, ids `1..=entities`.
    pub entities: u32,
    pub session: ServerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            frame_rate: DEFAULT_FRAME_RATE,
            host_player: false,
            entities: 8,
            session: ServerConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
