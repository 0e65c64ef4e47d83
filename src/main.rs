use chordling::{
    chord::RingConfig,
    instruction::Instruction,
    network::{node::ChordPeer, PeerConfig},
};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "chordling")]
#[command(about = "One node of a Chord ring")]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOptions {
    /// Address to listen on; peers derive this node's id from it, so it
    /// must be one they can dial (not 0.0.0.0 or ::)
    #[arg(long = "bind", global = true, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,
    /// Deadline for lookups and successor refreshes
    #[arg(long = "rpc-timeout-ms", global = true, default_value_t = 1000)]
    rpc_timeout_ms: u64,
    /// Deadline for the bootstrap join exchange
    #[arg(long = "join-timeout-ms", global = true, default_value_t = 3000)]
    join_timeout_ms: u64,
    /// Deadline for the predecessor liveness probe
    #[arg(long = "liveness-timeout-ms", global = true, default_value_t = 500)]
    liveness_timeout_ms: u64,
    /// Period of the stabilization worker
    #[arg(long = "stabilize-interval-ms", global = true, default_value_t = 5000)]
    stabilize_interval_ms: u64,
}

impl GlobalOptions {
    fn ring_config(&self) -> RingConfig {
        RingConfig {
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            liveness_timeout: Duration::from_millis(self.liveness_timeout_ms),
            stabilize_interval: Duration::from_millis(self.stabilize_interval_ms),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new ring with this node as its first member
    #[command(name = "start-bootstrap")]
    StartBootstrap {
        /// Listen port (random if not specified)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Join an existing ring through one of its members
    #[command(name = "join")]
    Join {
        /// Listen port for this node (random if not specified)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
        /// Port of the member to join through
        #[arg(short = 'b', long = "bootstrap-port")]
        bootstrap_port: u16,
        /// Host of the member to join through
        #[arg(short = 'n', long = "host", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        host: IpAddr,
    },
    /// Listen without joining; use `join` or `self-boot` on stdin
    #[command(name = "listen")]
    Listen {
        /// Listen port (random if not specified)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
}

/// Reads operator lines on a plain thread; stdin never blocks the runtime
/// or its shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn dispatch_instructions(peer: Arc<ChordPeer>, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        if line.trim().is_empty() {
            continue;
        }
        let instruction = match line.parse::<Instruction>() {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        let peer = peer.clone();
        tokio::spawn(async move {
            if let Err(e) = peer.execute(instruction).await {
                error!("Instruction failed: {}", e);
            }
        });
    }
    info!("Operator input closed");
}

#[tokio::main]
async fn main() -> Result<(), String> {
    // Initialize logging with timestamp
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let ring = cli.options.ring_config();
    let port = match cli.command {
        Commands::StartBootstrap { port } | Commands::Join { port, .. } | Commands::Listen { port } => port,
    };

    let config = PeerConfig {
        host: cli.options.bind,
        port,
        ring,
    };
    let peer = Arc::new(
        ChordPeer::new(config)
            .await
            .map_err(|e| format!("Failed to create peer: {}", e))?,
    );
    let node_port = peer.get_port();

    match cli.command {
        Commands::StartBootstrap { .. } => {
            peer.create_network()
                .await
                .map_err(|e| format!("Failed to create network: {}", e))?;
            info!("Bootstrap node is running on port: {}", node_port);
            info!("Other nodes can join using: chordling join -b {} -p <PORT>", node_port);
        }
        Commands::Join {
            bootstrap_port,
            host,
            ..
        } => {
            let bootstrap_addr = SocketAddr::new(host, bootstrap_port);
            info!("Attempting to join network through: {}", bootstrap_addr);
            let successor = peer
                .join(bootstrap_addr)
                .await
                .map_err(|e| format!("Failed to join network: {}", e))?;
            info!("Joined on port {}; successor is {}", node_port, successor);
        }
        Commands::Listen { .. } => {
            info!("Listening on port {}; waiting for join or self-boot", node_port);
        }
    }

    tokio::spawn(dispatch_instructions(peer.clone(), spawn_stdin_reader()));
    peer.run().await;
    Ok(())
}
