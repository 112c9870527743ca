use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use glam::{DMat4, DVec3};

use huddle::{
    Client, ClientSession, EntityId, FixedTimestep, FramePhase, LobbyUpdate, MemoryTree,
    PlayerId,
};

/// Radians per second the streamed entity turns.
const TURN_RATE: f64 = 0.5;

/// Where the bot is in the lobby handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingId,
    Selecting,
    Locking,
    Readying,
    Waiting,
    Playing,
}

/// Joins a lobby, readies up and streams a rotating transform.
pub struct Bot {
    session: ClientSession<Client>,
    tree: MemoryTree,
    timestep: FixedTimestep,
    character: u8,
    entity: EntityId,
    stage: Stage,
    started: Instant,
}

impl Bot {
    pub fn new(client: Client, character: u8, entity: EntityId, frame_rate: u32) -> Self {
        let mut tree = MemoryTree::new();
        tree.spawn(entity, DMat4::IDENTITY);

        Self {
            session: ClientSession::new(Arc::new(client)),
            tree,
            timestep: FixedTimestep::new(frame_rate),
            character,
            entity,
            stage: Stage::AwaitingId,
            started: Instant::now(),
        }
    }

    pub fn run(&mut self, duration: Option<Duration>) -> Result<()> {
        self.session.request_id();

        let mut last = Instant::now();
        loop {
            if duration.is_some_and(|limit| self.started.elapsed() >= limit) {
                log::info!("Run time elapsed, leaving");
                break;
            }

            let now = Instant::now();
            self.timestep.accumulate(now - last);
            last = now;

            while self.timestep.consume_frame() {
                self.frame()?;
            }
            thread::sleep(self.timestep.until_next());
        }

        self.session.link().disconnect();
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        self.session
            .on_frame_boundary(FramePhase::ReadyForChanges, &mut self.tree)?;

        for update in self.session.drain_updates() {
            self.handle_update(update)?;
        }

        if self.stage == Stage::Playing {
            let angle = self.started.elapsed().as_secs_f64() * TURN_RATE;
            let transform = DMat4::from_rotation_y(angle)
                * DMat4::from_translation(DVec3::new(0.0, 0.0, 2.0));
            self.session
                .on_entity_transform_changed(self.entity, transform);
        }

        self.session
            .on_frame_boundary(FramePhase::FinishedFrame, &mut self.tree)?;

        if self.timestep.frames() % (self.timestep.frame_rate() as u64 * 5) == 0 {
            if let Some(rtt) = self.session.link().rtt() {
                log::info!("RTT {:.1} ms", rtt.as_secs_f64() * 1000.0);
            }
        }
        Ok(())
    }

    fn me(&self) -> Option<PlayerId> {
        self.session.local_player()
    }

    fn handle_update(&mut self, update: LobbyUpdate) -> Result<()> {
        match update {
            LobbyUpdate::AssignedId(id) => {
                log::info!("Joined as player {}", id);
                if self.stage == Stage::AwaitingId {
                    self.session.select_character(self.character);
                    self.stage = Stage::Selecting;
                }
            }
            LobbyUpdate::CharacterSelected { player, character } => {
                log::info!("Player {} selected character {}", player, character);
                if Some(player) == self.me() && self.stage == Stage::Selecting {
                    self.session.lock_character(character);
                    self.stage = Stage::Locking;
                }
            }
            LobbyUpdate::CharacterLocked { player, character } => {
                log::info!("Player {} locked character {}", player, character);
                if Some(player) == self.me() && self.stage == Stage::Locking {
                    self.session.ready();
                    self.stage = Stage::Readying;
                }
            }
            LobbyUpdate::PlayerReady(player) => {
                log::info!("Player {} is ready", player);
                if Some(player) == self.me() && self.stage == Stage::Readying {
                    self.stage = Stage::Waiting;
                }
            }
            LobbyUpdate::GameStarted => {
                log::info!("Game started, streaming entity {}", self.entity);
                self.stage = Stage::Playing;
            }
            LobbyUpdate::PlayerJoined(player) => log::info!("Player {} joined", player),
            LobbyUpdate::PlayerLeft(player) => log::info!("Player {} left", player),
            LobbyUpdate::Rejected => bail!("server refused to assign a player id"),
            LobbyUpdate::ConnectionLost => bail!("connection to server lost"),
        }
        Ok(())
    }
}
