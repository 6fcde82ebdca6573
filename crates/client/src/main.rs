mod bot;
mod client;
mod prediction;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use bot::{BotDriver, BotPattern};
use client::{ClientConfig, GameClient};

pub const GHOST_TYPE_PLAYER: u8 = 0;

#[derive(Parser)]
#[command(name = "ghostwire-client")]
#[command(about = "Headless ghostwire client bot")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = ghostwire::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = 0, help = "Seconds to run; 0 runs forever")]
    duration_secs: u64,

    #[arg(long, value_enum, default_value = "circle")]
    pattern: BotPattern,

    #[arg(long, help = "Expose this world's stats to a visualiser on this port")]
    debug_port: Option<u16>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let server: SocketAddr = format!("{}:{}", args.server, args.port)
        .parse()
        .with_context(|| format!("invalid server address {}:{}", args.server, args.port))?;

    let config = ClientConfig {
        server,
        move_speed: 5.0,
        debug_stats_port: args.debug_port,
    };
    let mut game = GameClient::connect(config, BotDriver::new(args.pattern))?;
    log::info!("connecting to {server}");

    let started = Instant::now();
    let mut last_update = Instant::now();
    let mut last_report = Instant::now();

    loop {
        let now = Instant::now();
        let delta = (now - last_update).as_secs_f32();
        last_update = now;

        game.update(delta)?;

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if game.is_connected() {
                log::info!(
                    "tick {} | rtt {:.1}ms | snapshots {} | prediction error {:.3}m",
                    game.predicted_tick().to_wire(),
                    game.rtt_ms(),
                    game.snapshots_received(),
                    game.last_prediction_error()
                );
            }
        }

        if args.duration_secs > 0 && started.elapsed() >= Duration::from_secs(args.duration_secs) {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    game.disconnect();
    log::info!("client shut down");
    Ok(())
}
