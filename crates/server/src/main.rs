mod config;
mod events;
mod server;
mod tui;

use std::io;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use ghostwire::LinkConditioner;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;

#[derive(Parser)]
#[command(name = "ghostwire-server")]
#[command(about = "Ghostwire simulation server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = ghostwire::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value_t = ghostwire::DEBUG_STATS_PORT, help = "Debug visualiser port")]
    debug_port: u16,

    #[arg(long, help = "Enable outgoing link conditioning")]
    condition_link: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let link_conditioner = if args.condition_link {
        Some(LinkConditioner {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        })
    } else {
        None
    };

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        debug_stats_port: args.debug_port,
        link_conditioner,
        ..Default::default()
    };

    let mut server = GameServer::new(&bind_addr, config)?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("server started on {}", server.local_addr());
        run_headless(&mut server);
        log::info!("server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_headless(server: &mut GameServer) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        server.update();
        for event in server.drain_events() {
            log_event(&event);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    server.shutdown_connections();
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            log::info!("connection request from {addr}");
        }
        ServerEvent::ClientConnected {
            network_id,
            addr,
            ghost_id,
        } => {
            log::info!("client {network_id} connected from {addr} (ghost {ghost_id})");
        }
        ServerEvent::ClientDisconnected { network_id, reason } => {
            log::info!("client {network_id} {}", reason.as_str());
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            log::warn!("connection denied to {addr}: {reason}");
        }
        ServerEvent::DebuggerAttached => {
            log::info!("debug visualiser attached");
        }
        ServerEvent::Error { message } => {
            log::error!("{message}");
        }
    }
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();

    while running.load(Ordering::SeqCst) {
        server.update();
        // Events are rendered through the stats panes; drop the queue.
        server.drain_events().for_each(drop);

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats_snapshot();
        terminal.draw(|frame| {
            tui::render(frame, &stats);
        })?;
    }

    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
