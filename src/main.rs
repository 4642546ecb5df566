use clap::{Args, Parser, Subcommand};
use log::info;
use peer_tracker::core::{load_config, PeerConfig, TrackerConfig};
use peer_tracker::tracker::TrackerStore;
use peer_tracker::utils::{setup_logging, SystemClock};
use peer_tracker::{
    MemoryStore, PeerNode, Result, SqliteStore, TrackerServer, TrackerService, TransferClient,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "peer-tracker")]
#[command(about = "Presence tracker and direct peer-to-peer file transfer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PeerArgs {
    /// Peer config file (JSON)
    #[arg(short, long, default_value = "peer.json")]
    config: PathBuf,
    /// Tracker address, overrides the config file
    #[arg(short, long)]
    tracker: Option<SocketAddr>,
    /// Transfer listener address, overrides the config file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

impl PeerArgs {
    fn load(&self) -> PeerConfig {
        let mut config: PeerConfig = load_config(&self.config);
        if let Some(tracker) = self.tracker {
            config.tracker_addr = tracker;
        }
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker with periodic stale-peer eviction
    Tracker {
        /// Tracker config file (JSON)
        #[arg(short, long, default_value = "tracker.json")]
        config: PathBuf,
        /// Address to listen on, overrides the config file
        #[arg(short, long)]
        listen: Option<SocketAddr>,
        /// Keep state in memory only
        #[arg(long)]
        in_memory: bool,
    },
    /// Create an account on the tracker
    Register {
        #[command(flatten)]
        peer: PeerArgs,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in, publish the shared directory and serve it until Ctrl+C
    Share {
        #[command(flatten)]
        peer: PeerArgs,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        /// Directory to share, overrides the config file
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Search the tracker for files held by live peers
    Search {
        #[command(flatten)]
        peer: PeerArgs,
        /// Substring of the filename
        #[arg(short, long)]
        filename: Option<String>,
        /// Substring of the owner's username
        #[arg(short, long)]
        owner: Option<String>,
    },
    /// Download a file directly from a peer
    Fetch {
        #[command(flatten)]
        peer: PeerArgs,
        /// Transfer address of the peer holding the file
        #[arg(long)]
        from: SocketAddr,
        /// Name of the file to fetch
        #[arg(long)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging("info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Tracker {
            config,
            listen,
            in_memory,
        } => {
            let mut config: TrackerConfig = load_config(&config);
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if in_memory {
                config.database_path = None;
            }
            config.validate()?;
            run_tracker(config).await?;
        }
        Commands::Register {
            peer,
            username,
            password,
        } => {
            let mut node = PeerNode::new(peer.load()).await?;
            node.register(&username, &password).await?;
            node.shutdown().await?;
            println!("Registered {}", username);
        }
        Commands::Share {
            peer,
            username,
            password,
            dir,
        } => {
            let mut config = peer.load();
            if let Some(dir) = dir {
                config.shared_dir = dir;
            }

            let mut node = PeerNode::new(config).await?;
            let files = node.login(&username, &password).await?;
            println!(
                "Sharing {} files from {:?} at {}",
                files.len(),
                node.shared().root(),
                node.advertised_address()
                    .map(|a| a.to_string())
                    .unwrap_or_default()
            );

            tokio::signal::ctrl_c().await?;
            info!("Ctrl+C received, shutting down");
            node.shutdown().await?;
        }
        Commands::Search {
            peer,
            filename,
            owner,
        } => {
            let node = PeerNode::new(peer.load()).await?;
            let files = node.search(filename.as_deref(), owner.as_deref()).await?;

            println!("Available files:");
            for file in files {
                println!("  {} - {} at {}", file.filename, file.owner, file.address);
            }
        }
        Commands::Fetch { peer, from, file } => {
            let config = peer.load();
            let client = TransferClient::new(config.download_dir.clone(), config.request_timeout());
            let report = client.fetch(from, &file).await?;
            println!(
                "Download completed: {:?} ({} bytes, {:.1} KiB/s)",
                report.path,
                report.bytes,
                report.average_rate_bytes_per_sec / 1024.0
            );
        }
    }

    Ok(())
}

async fn run_tracker(config: TrackerConfig) -> Result<()> {
    let store: Arc<dyn TrackerStore> = match &config.database_path {
        Some(path) => {
            info!("Using SQLite store at {:?}", path);
            Arc::new(SqliteStore::open(path)?)
        }
        None => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let service = Arc::new(TrackerService::from_config(
        store,
        Arc::new(SystemClock),
        &config,
    ));
    let mut sweeper = service.start_liveness_monitor(config.sweep_interval());

    let server = TrackerServer::bind(service, config.listen_addr, config.max_message_size)?;
    let mut handle = server.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");

    handle.shutdown().await;
    sweeper.stop().await;
    Ok(())
}
