mod config;
mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use config::Settings;
use huddle::PacketLossSimulation;
use server::DedicatedServer;

#[derive(Parser)]
#[command(name = "huddle-server")]
#[command(about = "Headless huddle session server")]
struct Args {
    #[arg(short, long, help = "TOML settings file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    frame_rate: Option<u32>,

    #[arg(short, long)]
    max_players: Option<usize>,

    #[arg(long, help = "Register a player for this process")]
    host: bool,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(frame_rate) = args.frame_rate {
        settings.frame_rate = frame_rate;
    }
    if let Some(max_players) = args.max_players {
        settings.session.max_players = max_players;
    }
    settings.host_player |= args.host;
    if args.simulate_packet_loss {
        settings.session.transport.packet_loss = PacketLossSimulation::with_loss(args.loss_percent);
    }

    let mut server = DedicatedServer::new(&settings)?;
    log::info!(
        "Server started on {} at {} fps",
        server.local_addr(),
        settings.frame_rate
    );
    server.run()?;
    log::info!("Server shutting down");

    Ok(())
}
