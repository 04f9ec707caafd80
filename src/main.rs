//! Park Lockstep
//!
//! Runs the sandbox park offline with in-process clients, or as a
//! WebSocket server or client.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use park_lockstep::{
    config::EngineConfig,
    core::money::{format_money, money},
    core::rng::{derive_seed, DeterministicRng},
    game::{events::GameEventData, run_frame, Command, SimulationContext},
    network::{
        auth::{AuthConfig, AuthRequest},
        server::{connect, WebSocketListener},
        sync::NetworkSync,
        transport::{channel_server, NetworkMode},
    },
    sandbox::{self, SandboxPark},
    GAME_UPDATE_TIME_MS, VERSION,
};

type Park = SimulationContext<SandboxPark>;

#[derive(Debug, Parser)]
#[command(name = "park-lockstep", version)]
#[command(about = "Deterministic park simulation with lockstep multiplayer")]
struct Args {
    /// JSON engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Host plus in-process clients, with a scripted command stream
    Demo {
        /// Server ticks to run
        #[arg(long, default_value_t = 2_000)]
        ticks: u32,
        /// In-process clients
        #[arg(long, default_value_t = 2)]
        clients: usize,
    },
    /// Host a park over WebSocket
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:11753")]
        bind: SocketAddr,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Join a hosted park
    Join {
        /// Server URL, e.g. ws://127.0.0.1:11753
        #[arg(long)]
        url: String,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
        /// Server password
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;

    info!("Park Lockstep v{}", VERSION);

    match args.command {
        Mode::Demo { ticks, clients } => run_demo(config, ticks, clients),
        Mode::Serve { bind, frames } => serve(config, bind, frames).await,
        Mode::Join { url, frames, password } => join(config, &url, frames, password).await,
    }
}

// =============================================================================
// DEMO
// =============================================================================

/// Scripted actions, drawn from a generator separate from the park's.
fn scripted_command(script: &mut DeterministicRng) -> Command {
    let x = script.next_range(0, 64);
    let y = script.next_range(0, 64);
    match script.next_max(8) {
        0 | 1 | 2 => sandbox::place_scenery(x, y, 10 + script.next_range(0, 40)),
        3 => sandbox::create_ride(script.next_range(0, 5)),
        4 => sandbox::demolish_ride(script.next_range(0, 3)),
        5 => sandbox::set_ride_price(script.next_range(0, 3), script.next_range(0, 60)),
        6 => sandbox::set_ride_status(script.next_range(0, 3), true),
        _ => sandbox::hire_staff_member(),
    }
}

fn run_demo(config: EngineConfig, ticks: u32, client_count: usize) -> Result<()> {
    info!("=== Starting Demo Park ===");

    let (transport, acceptor) = channel_server();
    let network = NetworkSync::server(config.network.clone(), Box::new(transport), AuthConfig::default());
    let mut host = sandbox::new_context(config.clone()).with_network(network);
    let seed = derive_seed("park-lockstep-demo", 0);
    host.load_scenario(seed, money(20_000, 0));
    host.execute(&mut sandbox::set_park_open(true));
    info!("Seed: {:08x} {:08x}", seed[0], seed[1]);

    let mut clients = Vec::with_capacity(client_count);
    for i in 0..client_count {
        let link = acceptor.connect_loopback()?;
        let request = AuthRequest {
            name: format!("Guest {}", i + 1),
            ..Default::default()
        };
        let network = NetworkSync::client(config.network.clone(), Box::new(link), request);
        clients.push(sandbox::new_context(config.clone()).with_network(network));
    }

    let mut script = DeterministicRng::from_seed(derive_seed("park-lockstep-script", 0));
    let mut history = BTreeMap::new();
    let mut mismatches = 0usize;

    while host.tick() < ticks {
        run_frame(&mut host, GAME_UPDATE_TIME_MS, 1);

        // Roughly one command every fourth frame, from a random peer
        if script.next_max(4) == 0 {
            let actor = script.next_max(client_count as u32 + 1) as usize;
            let mut cmd = scripted_command(&mut script);
            match actor.checked_sub(1).and_then(|i| clients.get_mut(i)) {
                Some(client) => {
                    client.execute(&mut cmd);
                }
                None => {
                    host.execute(&mut cmd);
                }
            }
        }
        history.insert(host.tick(), host.checksum());
        log_events(&mut host, "host");

        for (i, client) in clients.iter_mut().enumerate() {
            run_frame(client, GAME_UPDATE_TIME_MS, 1);
            if let Some(expected) = history.get(&client.tick()) {
                if *expected != client.checksum() {
                    mismatches += 1;
                }
            }
            log_events(client, &format!("guest {}", i + 1));
        }

        if host.tick() % 500 == 0 {
            info!(
                "Tick {}: {} rides, {} scenery, {} guests, cash {}",
                host.tick(),
                host.world.rides.len(),
                host.world.scenery.len(),
                host.world.guests,
                format_money(host.finances.cash)
            );
        }
    }

    info!("=== Demo Results ===");
    info!("Final checksum: {}", host.checksum());
    for session in host.network.players.iter() {
        info!(
            "{}: {} - {} commands, spent {}",
            session.id,
            session.name,
            session.commands_ran,
            format_money(session.money_spent)
        );
    }

    let desynced = clients.iter().filter(|c| c.network.is_desynchronised()).count();
    if mismatches == 0 && desynced == 0 {
        info!("DETERMINISM VERIFIED: every client matched the host at every tick");
        Ok(())
    } else {
        bail!("{mismatches} checksum mismatches, {desynced} clients desynchronised")
    }
}

// =============================================================================
// WEBSOCKET
// =============================================================================

async fn serve(config: EngineConfig, bind: SocketAddr, frames: Option<u64>) -> Result<()> {
    let (transport, listener) = WebSocketListener::bind(bind).await?;
    info!("Listening on ws://{}", listener.local_addr());

    let network = NetworkSync::server(config.network.clone(), Box::new(transport), AuthConfig::from_env());
    let mut host = sandbox::new_context(config).with_network(network);
    let nonce = chrono::Utc::now().timestamp_millis() as u64;
    host.load_scenario(derive_seed("park-lockstep-serve", nonce), money(20_000, 0));
    host.execute(&mut sandbox::set_park_open(true));

    drive(&mut host, frames, "host").await;
    host.network.disconnect();
    listener.shutdown();
    Ok(())
}

async fn join(config: EngineConfig, url: &str, frames: Option<u64>, password: Option<String>) -> Result<()> {
    let transport = connect(url).await?;
    let request = AuthRequest {
        name: config.network.player_name.clone(),
        password,
        token: std::env::var("PARK_JWT_TOKEN").ok(),
    };
    let network = NetworkSync::client(config.network.clone(), Box::new(transport), request);
    let mut guest = sandbox::new_context(config).with_network(network);

    drive(&mut guest, frames, "guest").await;
    if guest.network.mode() == NetworkMode::Client {
        guest.network.disconnect();
    }
    Ok(())
}

/// Run frames on a fixed interval until `frames` elapse or Ctrl-C.
async fn drive(park: &mut Park, frames: Option<u64>, label: &str) {
    let mut interval = tokio::time::interval(Duration::from_millis(u64::from(GAME_UPDATE_TIME_MS)));
    let mut frame = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
        run_frame(park, GAME_UPDATE_TIME_MS, 1);
        log_events(park, label);

        frame += 1;
        if frames.is_some_and(|limit| frame >= limit) {
            break;
        }
        if park.network.mode() == NetworkMode::None && label == "guest" {
            warn!("No longer connected");
            break;
        }
    }
    info!("{} stopped at tick {} ({})", label, park.tick(), park.checksum());
}

fn log_events(park: &mut Park, label: &str) {
    for event in park.take_events() {
        match event.data {
            GameEventData::ErrorWindow { title, body } => info!("[{}] {}: {}", label, title, body),
            GameEventData::PlayerJoined { name, .. } => info!("[{}] {} joined", label, name),
            GameEventData::PlayerLeft { player_id } => info!("[{}] player {} left", label, player_id),
            GameEventData::Desynchronised { tick, .. } => warn!("[{}] desynchronised at tick {}", label, tick),
            GameEventData::Disconnected { reason } => warn!("[{}] disconnected: {}", label, reason),
            GameEventData::LoadCompleted { tick } => info!("[{}] park loaded at tick {}", label, tick),
            _ => {}
        }
    }
}
