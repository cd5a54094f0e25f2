//! syncwatch - Synchronized playback over a peer-to-peer swarm

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use syncwatch::config::{config_path, load_config, save_config, AppConfig};
use syncwatch::server::{self, AppState};
use syncwatch::swarm::{hash_file, LocalSwarm, ResourceId};
use syncwatch::sync::{MediaClock, Role};
use syncwatch::{Session, SimulatedPlayer};

#[derive(Parser)]
#[command(name = "syncwatch")]
#[command(about = "Watch a video in sync with peers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: platform config directory)
    #[arg(short, long, global = true, env = "SYNCWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective settings, flags included, back to the config file
    #[arg(long, global = true)]
    save_config: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed a file and host the session as its authority
    Host {
        /// Video file to share
        file: PathBuf,

        /// Peer listen address (IP:PORT)
        #[arg(short, long)]
        listen: Option<String>,

        /// HTTP listen address (IP:PORT)
        #[arg(long)]
        http: Option<String>,

        /// Peer to connect to (ws://HOST:PORT), repeatable
        #[arg(short, long)]
        peer: Vec<String>,
    },

    /// Join a session as a follower
    Join {
        /// Resource id printed by the host
        id: String,

        /// Peer to connect to (ws://HOST:PORT), repeatable
        #[arg(short, long)]
        peer: Vec<String>,

        /// Local copy of the video
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Peer listen address (IP:PORT)
        #[arg(short, long)]
        listen: Option<String>,

        /// HTTP listen address (IP:PORT)
        #[arg(long)]
        http: Option<String>,
    },

    /// Print the resource id of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref()).context("Failed to load config")?;
    let save_to = if cli.save_config {
        Some(config_path(cli.config.as_deref())?)
    } else {
        None
    };

    match cli.command {
        Commands::Host {
            file,
            listen,
            http,
            peer,
        } => {
            let config = override_config(config, listen, http, peer, save_to.as_deref())?;
            run_host(&file, config).await
        }
        Commands::Join {
            id,
            peer,
            file,
            listen,
            http,
        } => {
            let id: ResourceId = id.parse().context("Invalid resource id")?;
            let config = override_config(config, listen, http, peer, save_to.as_deref())?;
            run_join(id, file.as_deref(), config).await
        }
        Commands::Hash { file } => {
            let (id, length) = hash_file(&file)
                .await
                .with_context(|| format!("Failed to hash {}", file.display()))?;
            println!("{}  {} ({} bytes)", id, file.display(), length);
            Ok(())
        }
    }
}

/// Apply CLI flags on top of file configuration, persisting the result to `save_to`
fn override_config(
    mut config: AppConfig,
    listen: Option<String>,
    http: Option<String>,
    peers: Vec<String>,
    save_to: Option<&Path>,
) -> Result<AppConfig> {
    if let Some(listen) = listen {
        config.peer_listen_addr = listen;
    }
    if let Some(http) = http {
        config.http_addr = http;
    }
    config.add_peers(peers);
    config.validate()?;

    if let Some(path) = save_to {
        save_config(&config, path)
            .with_context(|| format!("Failed to save config to {}", path.display()))?;
        info!("Saved config to {}", path.display());
    }
    Ok(config)
}

/// Listen for peers, dial configured ones and serve HTTP
async fn start_network(
    swarm: &Arc<LocalSwarm>,
    session: &Session,
    player: Arc<dyn MediaClock>,
    config: &AppConfig,
) -> Result<()> {
    let (peer_addr, _) = swarm
        .listen(&config.peer_listen_addr)
        .await
        .with_context(|| format!("Failed to listen on {}", config.peer_listen_addr))?;
    println!("Peers can connect to ws://{}", peer_addr);

    for url in &config.peers {
        if let Err(e) = swarm.connect(url).await {
            warn!("Failed to connect to {}: {}", url, e);
        }
    }

    let state = AppState {
        engine: swarm.clone(),
        reconciler: session.reconciler().clone(),
        clock: player,
        metadata_timeout: config.metadata_timeout(),
    };
    server::serve(&config.http_addr, state)
        .await
        .with_context(|| format!("Failed to serve HTTP on {}", config.http_addr))?;

    Ok(())
}

async fn fatal_error(fatal: &mut watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = fatal.borrow_and_update().clone() {
            return reason;
        }
        if fatal.changed().await.is_err() {
            // Sender gone without a fatal error; never resolve
            std::future::pending::<()>().await;
        }
    }
}

async fn run_host(file: &Path, config: AppConfig) -> Result<()> {
    let swarm = LocalSwarm::new();
    let resource = swarm
        .seed_file(file)
        .await
        .with_context(|| format!("Failed to seed {}", file.display()))?;

    let mut session = Session::new(config.session_config(Role::Authority));
    session.attach(swarm.clone());

    let player = Arc::new(SimulatedPlayer::new());
    start_network(&swarm, &session, player.clone(), &config).await?;
    session.start(player.clone());

    println!("Resource id: {}", resource.id());
    println!(
        "Stream: http://{}/watch/magnet/{}",
        config.http_addr,
        resource.id()
    );
    println!("Commands: play, pause, seek <secs>, status, quit");

    let reconciler = session.reconciler().clone();
    let mut fatal = swarm.fatal_errors();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            reason = fatal_error(&mut fatal) => {
                bail!("Swarm failed: {}", reason);
            }
            line_result = stdin.next_line() => {
                let line = match line_result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        break;
                    }
                };

                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("play"), None) => player.play(),
                    (Some("pause"), None) => player.pause(),
                    (Some("seek"), Some(secs)) => match secs.parse::<f64>() {
                        Ok(secs) if secs.is_finite() && secs >= 0.0 => player.seek(secs),
                        _ => {
                            println!("Invalid position: {}", secs);
                            continue;
                        }
                    },
                    (Some("status"), None) => {
                        let status = player.status();
                        println!(
                            "{} at {:.2}s, {} peer(s)",
                            if status.paused { "paused" } else { "playing" },
                            status.current_time,
                            swarm.connection_count()
                        );
                        continue;
                    }
                    (Some("quit"), None) => break,
                    (None, _) => continue,
                    _ => {
                        println!("Commands: play, pause, seek <secs>, status, quit");
                        continue;
                    }
                }

                reconciler.originate_status(player.status());
            }
        }
    }

    session.stop();
    Ok(())
}

async fn run_join(id: ResourceId, file: Option<&Path>, config: AppConfig) -> Result<()> {
    if config.peers.is_empty() {
        bail!("No peers to join; pass --peer ws://HOST:PORT");
    }

    let swarm = LocalSwarm::new();
    if let Some(file) = file {
        let resource = swarm
            .seed_file(file)
            .await
            .with_context(|| format!("Failed to open {}", file.display()))?;
        if resource.id() != &id {
            warn!(
                "{} hashes to {}, not the session resource {}",
                file.display(),
                resource.id(),
                id
            );
        }
    }

    let mut session = Session::new(config.session_config(Role::Follower));
    session.attach(swarm.clone());

    let player = Arc::new(SimulatedPlayer::new());
    start_network(&swarm, &session, player.clone(), &config).await?;
    session.start(player.clone());

    println!(
        "Stream: http://{}/watch/magnet/{}",
        config.http_addr, id
    );

    let mut decisions = session.reconciler().subscribe_decisions();
    let mut fatal = swarm.fatal_errors();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            reason = fatal_error(&mut fatal) => {
                bail!("Swarm failed: {}", reason);
            }
            decision = decisions.recv() => {
                match decision {
                    Ok(decision) => {
                        if let Some(paused) = decision.set_paused {
                            println!("{}", if paused { "Paused" } else { "Playing" });
                        }
                        if let Some(position) = decision.seek_to {
                            println!("Seeked to {:.2}s", position);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.stop();
    Ok(())
}
