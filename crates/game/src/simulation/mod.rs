mod client;
mod frame;
mod link;
mod server;
mod tick;
mod tree;

pub use client::ClientSession;
pub use frame::{FrameCycle, FrameError, FramePhase, FrameState};
pub use link::{ClientLink, ServerLink};
pub use server::ServerSession;
pub use tick::FixedTimestep;
pub use tree::{EntityTree, MemoryTree};
