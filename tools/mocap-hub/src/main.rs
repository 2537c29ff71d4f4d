//! mocap-hub - routes motion-capture frames between local consumers and
//! linked rooms, and replays recorded sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mocap_core::replay::DeliveryMode;
use mocap_core::{DEFAULT_BROKER_PORT, PROTOCOL_VERSION};
use mocap_link::{ConnectionBroker, HttpIpResolver, LinkEvent, PeerLink, RendezvousBroker};
use mocap_router::{EndpointRegistry, HrriRouter, LinkHealth, PeerLinkMonitor, SessionPlayer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{HubConfig, PeerConfig};

/// Motion-capture frame distribution hub
#[derive(Parser)]
#[command(name = "mocap-hub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "MOCAP_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub
    Run {
        /// Override the configured location token
        #[arg(short = 'L', long)]
        location: Option<String>,

        /// Replay a recorded session (JSON) in a loop
        #[arg(short, long)]
        replay: Option<PathBuf>,

        /// Deliver only frames whose timestamp matches a tick exactly
        #[arg(long)]
        exact_replay: bool,

        /// Do not link to a remote room even if configured
        #[arg(long)]
        no_peer: bool,
    },

    /// Run a rendezvous broker that pairs hubs
    Broker {
        /// Bind address
        #[arg(short, long, default_value_t = format!("0.0.0.0:{}", DEFAULT_BROKER_PORT))]
        bind: String,
    },

    /// Show version and protocol info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for ctrl+c: {}", e),
            }
            cancel.cancel();
        });
    }

    let config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };

    match cli.command {
        Commands::Run {
            location,
            replay,
            exact_replay,
            no_peer,
        } => {
            let mut config = config;
            if let Some(location) = location {
                config.location = location;
            }
            if no_peer {
                config.peer.enabled = false;
            }
            let mode = if exact_replay {
                DeliveryMode::Exact
            } else {
                DeliveryMode::CatchUp
            };
            run_hub(config, replay, mode, cancel).await?;
        }

        Commands::Broker { bind } => {
            run_broker(&bind, cancel).await?;
        }

        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

async fn run_hub(
    config: HubConfig,
    replay: Option<PathBuf>,
    mode: DeliveryMode,
    cancel: CancellationToken,
) -> Result<()> {
    println!(
        "{} Starting hub for location {}",
        "MOCAP".cyan().bold(),
        config.location.green()
    );

    let registry = Arc::new(EndpointRegistry::new());
    let router = Arc::new(
        HrriRouter::bind(&config.location, &config.local_bind, registry)
            .await
            .context("Failed to start router")?,
    );

    for receiver in &config.receivers {
        match receiver.resolve() {
            Ok((endpoint, hrri)) => {
                router.register_local(endpoint, hrri);
            }
            Err(e) => warn!("Skipping receiver: {:#}", e),
        }
    }

    let player = match replay {
        Some(path) => {
            let player = SessionPlayer::with_options(
                router.clone(),
                mode,
                mocap_router::player::DEFAULT_TICK,
            )?;
            player
                .load_file(&path)
                .await
                .with_context(|| format!("Failed to load session {}", path.display()))?;
            player.play()?;
            println!(
                "{} Replaying {} ({} ms loop)",
                "OK".green().bold(),
                path.display(),
                player.duration()
            );
            Some(player)
        }
        None => None,
    };

    let peer = if config.peer.enabled {
        Some(tokio::spawn(run_peer(
            config.peer.clone(),
            router.clone(),
            cancel.clone(),
        )))
    } else {
        None
    };

    println!(
        "{} Hub running with {} local receiver(s)",
        "OK".green().bold(),
        router.local_endpoints().len()
    );
    cancel.cancelled().await;

    if let Some(player) = &player {
        player.stop();
    }
    if let Some(peer) = peer {
        match peer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Peer link ended with error: {:#}", e),
            Err(e) => warn!("Peer link task failed: {}", e),
        }
    }
    router.shutdown();

    info!("Hub stopped");
    Ok(())
}

/// Establish the link to the remote room and keep it monitored until
/// shutdown
async fn run_peer(peer: PeerConfig, router: Arc<HrriRouter>, cancel: CancellationToken) -> Result<()> {
    peer.validate().context("Invalid peer configuration")?;
    let broker_config = peer.broker_config();
    broker_config.validate().context("Invalid peer configuration")?;

    let resolver = Arc::new(HttpIpResolver::new(&peer.public_ip_url)?);
    let broker = Arc::new(ConnectionBroker::new(broker_config, resolver)?);
    let mut events = broker.subscribe();
    let establish = broker.spawn(cancel.clone());

    let link = tokio::select! {
        _ = cancel.cancelled() => {
            establish.abort();
            return Ok(());
        }
        event = events.recv() => match event {
            Ok(LinkEvent::Established(link)) => link,
            Ok(LinkEvent::Failed { reason }) => {
                error!("Could not link to remote room: {}", reason);
                return Ok(());
            }
            Err(e) => {
                // lagged or closed; the task result still tells us what happened
                warn!("Link event stream: {}", e);
                establish.await.context("Link task failed")??
            }
        },
    };

    let monitor = attach_link(&peer, &router, link)?;
    let mut health = monitor.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = health.recv() => match event {
                Ok(LinkHealth::Down { silent_for }) => {
                    warn!("Remote room silent for {:?}", silent_for);
                }
                Ok(LinkHealth::Restored) => info!("Remote room is back"),
                Err(_) => break,
            },
        }
    }

    monitor.stop().await;
    Ok(())
}

fn attach_link(
    peer: &PeerConfig,
    router: &Arc<HrriRouter>,
    link: PeerLink,
) -> Result<PeerLinkMonitor> {
    let hrri = peer.remote_hrri();
    println!(
        "{} Linked to {} at {}",
        "OK".green().bold(),
        hrri.location().green(),
        link.peer_rx
    );

    router.register_remote(link.peer_rx, hrri, Arc::new(link.tx.sender_to(link.peer_rx)));
    let monitor =
        PeerLinkMonitor::start(link.rx, router.clone(), router.clone(), peer.monitor_config())
            .context("Failed to start peer link monitor")?;
    Ok(monitor)
}

async fn run_broker(bind: &str, cancel: CancellationToken) -> Result<()> {
    let broker = RendezvousBroker::bind(bind)
        .await
        .with_context(|| format!("Failed to bind rendezvous broker on {}", bind))?;
    println!(
        "{} Rendezvous broker listening on {}",
        "OK".green().bold(),
        broker.local_addr()?
    );

    broker.run(cancel).await?;
    info!("Rendezvous broker stopped");
    Ok(())
}

fn print_info(config: &HubConfig) {
    println!("{}", "mocap-hub".cyan().bold());
    println!("  version:   {}", env!("CARGO_PKG_VERSION"));
    println!("  protocol:  {}", PROTOCOL_VERSION);
    println!("  location:  {}", config.location);
    println!("  receivers: {}", config.receivers.len());
    if config.peer.enabled {
        println!(
            "  peer:      via {}:{} (tx {}, rx {})",
            config.peer.broker_host,
            config.peer.broker_port,
            config.peer.tx_port,
            config.peer.broker_config().rx_port()
        );
    } else {
        println!("  peer:      {}", "disabled".yellow());
    }
}
