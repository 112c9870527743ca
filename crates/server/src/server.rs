use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Result;
use glam::DMat4;

use huddle::{FixedTimestep, FramePhase, LobbyUpdate, MemoryTree, Server, ServerSession};

use crate::config::Settings;

/// Headless frame loop around one session server.
pub struct DedicatedServer {
    session: ServerSession<Server>,
    tree: MemoryTree,
    timestep: FixedTimestep,
}

impl DedicatedServer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let server = Arc::new(Server::bind(settings.bind_addr(), settings.session.clone())?);
        let mut session = ServerSession::new(server, settings.session.max_players);
        if settings.host_player {
            session.register_host()?;
        }

        let mut tree = MemoryTree::new();
        for entity_id in 1..=settings.entities {
            tree.spawn(entity_id, DMat4::IDENTITY);
        }

        Ok(Self {
            session,
            tree,
            timestep: FixedTimestep::new(settings.frame_rate),
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.session.link().local_addr()
    }

    pub fn run(&mut self) -> Result<()> {
        let mut last = Instant::now();
        while self.session.link().is_running() {
            let now = Instant::now();
            self.timestep.accumulate(now - last);
            last = now;

            while self.timestep.consume_frame() {
                self.frame()?;
            }
            thread::sleep(self.timestep.until_next());
        }

        self.session.link().shutdown();
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        self.session
            .on_frame_boundary(FramePhase::ReadyForChanges, &mut self.tree)?;
        for update in self.session.drain_updates() {
            log_update(&update);
        }
        self.session
            .on_frame_boundary(FramePhase::FinishedFrame, &mut self.tree)?;

        if self.timestep.frames() % (self.timestep.frame_rate() as u64 * 10) == 0 {
            let stats = self.session.link().stats();
            log::debug!(
                "{} connections, {} players, {} packets in, {} out",
                self.session.link().connection_count(),
                self.session.lobby().roster().len(),
                stats.packets_received,
                stats.packets_sent
            );
        }
        Ok(())
    }
}

fn log_update(update: &LobbyUpdate) {
    match update {
        LobbyUpdate::PlayerJoined(id) => log::info!("Player {} joined", id),
        LobbyUpdate::PlayerLeft(id) => log::info!("Player {} left", id),
        LobbyUpdate::CharacterSelected { player, character } => {
            log::info!("Player {} selected character {}", player, character)
        }
        LobbyUpdate::CharacterLocked { player, character } => {
            log::info!("Player {} locked character {}", player, character)
        }
        LobbyUpdate::PlayerReady(id) => log::info!("Player {} is ready", id),
        LobbyUpdate::GameStarted => log::info!("Game started"),
        other => log::debug!("{:?}", other),
    }
}
