mod bot;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use bot::Bot;
use huddle::{Client, ClientConfig, DEFAULT_FRAME_RATE, DEFAULT_PORT, PacketLossSimulation};

#[derive(Parser)]
#[command(name = "huddle-client")]
#[command(about = "Headless huddle client")]
struct Args {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 0, help = "Character index to pick")]
    character: u8,

    #[arg(short, long, default_value_t = 1, help = "Entity id to stream")]
    entity: u32,

    #[arg(short, long, default_value_t = DEFAULT_FRAME_RATE)]
    frame_rate: u32,

    #[arg(short, long, help = "Leave after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Enable outbound packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ClientConfig::default();
    if args.simulate_packet_loss {
        config.transport.packet_loss = PacketLossSimulation::with_loss(args.loss_percent);
    }

    let client = Client::connect(&args.host, args.port, config)?;
    log::info!(
        "Connected to {} from {}",
        client.server_addr(),
        client.local_addr()
    );

    let mut bot = Bot::new(client, args.character, args.entity, args.frame_rate);
    bot.run(args.duration.map(Duration::from_secs))
}
