//! deepmine - headless host and client for the deepmine multiplayer protocol.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::{load_or_default, ClientConfig, HostConfig, DEFAULT_CLIENT_PATH, DEFAULT_SERVER_PATH};
use deepmine_client::{ClientPhase, MultiplayerClient};
use deepmine_core::{BlockGrid, PlayerClass, PlayerTeam};
use deepmine_net::{GameEvent, QuicClientTransport, QuicHostTransport};
use deepmine_server::{Host, LanResponder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(author, version, about = "deepmine multiplayer host and headless client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List hosts on the LAN and in the directory
    Browse {
        #[arg(long, default_value = DEFAULT_CLIENT_PATH)]
        config: PathBuf,
    },

    /// Join a host and stay connected until Ctrl-C or disconnect
    Join {
        /// Host game address, e.g. 192.168.1.20:5566
        addr: SocketAddr,

        #[arg(long, default_value = DEFAULT_CLIENT_PATH)]
        config: PathBuf,

        /// Override the configured handle
        #[arg(long)]
        name: Option<String>,

        #[arg(long, value_enum, default_value_t = TeamArg::Red)]
        team: TeamArg,

        #[arg(long, value_enum, default_value_t = ClassArg::Miner)]
        class: ClassArg,
    },

    /// Run a host
    Host {
        #[arg(long, default_value = DEFAULT_SERVER_PATH)]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TeamArg {
    Red,
    Blue,
}

impl From<TeamArg> for PlayerTeam {
    fn from(team: TeamArg) -> Self {
        match team {
            TeamArg::Red => PlayerTeam::Red,
            TeamArg::Blue => PlayerTeam::Blue,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClassArg {
    Prospector,
    Miner,
    Engineer,
    Sapper,
}

impl From<ClassArg> for PlayerClass {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::Prospector => PlayerClass::Prospector,
            ClassArg::Miner => PlayerClass::Miner,
            ClassArg::Engineer => PlayerClass::Engineer,
            ClassArg::Sapper => PlayerClass::Sapper,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting deepmine v{}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Commands::Browse { config } => {
            let cfg: ClientConfig = load_or_default(&config, DEFAULT_CLIENT_PATH);
            browse(&cfg).await
        }
        Commands::Join {
            addr,
            config,
            name,
            team,
            class,
        } => {
            let mut cfg: ClientConfig = load_or_default(&config, DEFAULT_CLIENT_PATH);
            if let Some(name) = name {
                cfg.handle = name;
            }
            join(&cfg, addr, team.into(), class.into()).await
        }
        Commands::Host { config } => {
            let cfg: HostConfig = load_or_default(&config, DEFAULT_SERVER_PATH);
            host(&cfg).await
        }
    }
}

async fn browse(cfg: &ClientConfig) -> Result<()> {
    let mut client = MultiplayerClient::new(QuicClientTransport::new(), cfg.handle.clone());
    let servers = client.browse(&cfg.discovery()).await?;
    if servers.is_empty() {
        println!("No hosts found.");
    }
    for server in &servers {
        println!("{:<24} {}", server.endpoint, server.describe());
    }
    Ok(())
}

async fn join(cfg: &ClientConfig, addr: SocketAddr, team: PlayerTeam, class: PlayerClass) -> Result<()> {
    let mut client = MultiplayerClient::new(QuicClientTransport::new(), cfg.handle.clone());
    let mut store = BlockGrid::default();
    let mut events: Vec<GameEvent> = Vec::new();
    client
        .join(addr)
        .with_context(|| format!("joining {addr}"))?;
    info!(%addr, handle = %cfg.handle, "joining");

    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                client.disconnect("quit");
                break;
            }
        }
        client.update(TICK.as_secs_f64(), &mut events, &mut store, &mut ());
        for event in events.drain(..) {
            match event {
                GameEvent::Chat { text, .. } => info!("chat: {text}"),
                GameEvent::Rejected(reason) => warn!(%reason, "host refused the connection"),
                GameEvent::Disconnected { reason } => warn!(%reason, "disconnected"),
                other => debug!(?other, "event"),
            }
        }
        match client.phase() {
            ClientPhase::TeamSelection => client.select_team(team),
            ClientPhase::ClassSelection => client.select_class(class),
            ClientPhase::ServerBrowser | ClientPhase::Title => break,
            ClientPhase::Loading | ClientPhase::Playing => {}
        }
    }
    // Let the close frame go out before the runtime shuts down.
    tokio::time::sleep(TICK).await;
    Ok(())
}

async fn host(cfg: &HostConfig) -> Result<()> {
    let transport = QuicHostTransport::bind(cfg.bind_address)?;
    let game_port = transport.local_addr().port();
    let mut host = Host::new(transport, cfg.settings());
    info!(addr = %cfg.bind_address, name = %cfg.server_name, "hosting");

    if !cfg.public_host.is_empty() {
        match cfg.public_host.parse::<Ipv4Addr>() {
            Ok(ip) => println!("{}", host.directory_line(ip)),
            Err(err) => warn!("public_host {:?} is not an IPv4 address: {err}", cfg.public_host),
        }
    }

    let (announce, announcements) = watch::channel(host.announcement(game_port));
    if cfg.lan_discovery {
        let responder =
            LanResponder::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cfg.lan_port))
                .await?;
        tokio::spawn(async move {
            if let Err(err) = responder.run(announcements).await {
                warn!("LAN responder stopped: {err:#}");
            }
        });
    }

    let mut ticker = tokio::time::interval(TICK);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        for action in host.tick() {
            debug!(player_id = action.player_id, intent = ?action.intent, "unhandled intent");
        }
        announce.send_if_modified(|current| {
            let latest = host.announcement(game_port);
            let changed = *current != latest;
            *current = latest;
            changed
        });
    }
    info!("host shutting down");
    Ok(())
}
