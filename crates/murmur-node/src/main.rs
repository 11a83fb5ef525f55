//! murmur node daemon.
//!
//! A standalone node that joins the gossip overlay: it listens for
//! authenticated connections, keeps its peer directory fresh through
//! periodic ping sweeps, and relays cast, multicast and broadcast
//! payloads.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use murmur_crypto::{Keypair, Signatory};
use murmur_net::{AllowAll, Client, ClientOptions, Handshaker, Server, ServerOptions};
use murmur_peer::{Peer, PeerOptions};
use murmur_protocol::{BincodeAddressCodec, Event, PeerAddr, TcpPeerAddress};
use murmur_store::SledStore;

/// Capacity of the outbound and inbound message channels. Saturation is
/// the node's backpressure signal.
const MESSAGE_CHANNEL_SIZE: usize = 1024;

/// murmur gossip overlay node.
#[derive(Parser, Debug)]
#[command(name = "murmur-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Listen address for peer connections
    #[arg(short, long, env = "MURMUR_LISTEN_ADDR", default_value = "0.0.0.0:4040")]
    listen: SocketAddr,

    /// Address advertised to other peers (defaults to the listen address)
    #[arg(long, env = "MURMUR_ADVERTISE_ADDR")]
    advertise: Option<SocketAddr>,

    /// Bootstrap peers as comma-separated `<signatory-hex>@<host:port>`
    #[arg(short, long, env = "MURMUR_BOOTSTRAP")]
    bootstrap: String,

    /// Node identity key file (created if it does not exist)
    #[arg(short, long, env = "MURMUR_KEY_FILE", default_value = "murmur.key")]
    key_file: PathBuf,

    /// Data directory for persistent peer and broadcast state
    #[arg(short, long, env = "MURMUR_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Seconds between bootstrap sweeps (0 = default, one hour)
    #[arg(long, env = "MURMUR_BOOTSTRAP_SECS", default_value = "0")]
    bootstrap_secs: u64,

    /// Bootstrap worker count (0 = 2x CPU count)
    #[arg(long, env = "MURMUR_BOOTSTRAP_WORKERS", default_value = "0")]
    bootstrap_workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MURMUR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "MURMUR_LOG_FORMAT", default_value = "plain")]
    log_format: String,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Load the node keypair, generating and persisting a fresh one if the
/// file does not exist yet.
fn load_or_generate_keypair(path: &Path) -> Result<Keypair> {
    if path.exists() {
        let hex_key = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        let bytes = hex::decode(hex_key.trim()).context("Key file is not valid hex")?;
        return Keypair::from_bytes(&bytes).map_err(|e| anyhow!("Invalid key file: {}", e));
    }

    let keypair = Keypair::generate();
    std::fs::write(path, hex::encode(keypair.to_bytes()))
        .with_context(|| format!("Failed to write key file {}", path.display()))?;
    info!(path = %path.display(), "Generated new node identity");
    Ok(keypair)
}

/// Parse `<signatory-hex>@<host:port>` bootstrap entries.
fn parse_bootstrap(spec: &str) -> Result<Vec<PeerAddr>> {
    let mut out = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (sig_hex, locator) = entry
            .split_once('@')
            .ok_or_else(|| anyhow!("Bootstrap entry {entry:?} is not <signatory>@<host:port>"))?;
        let sig_bytes = hex::decode(sig_hex)
            .with_context(|| format!("Bootstrap entry {entry:?}: signatory is not hex"))?;
        let signatory = Signatory::from_bytes(&sig_bytes)
            .map_err(|e| anyhow!("Bootstrap entry {entry:?}: {e}"))?;
        let addr: SocketAddr = locator
            .parse()
            .with_context(|| format!("Bootstrap entry {entry:?}: bad address"))?;
        out.push(Arc::new(TcpPeerAddress::new(signatory, addr, 0)) as PeerAddr);
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level, &args.log_format)?;

    let keypair = load_or_generate_keypair(&args.key_file)?;
    let signatory = keypair.signatory();

    // Advertise with a fresh nonce so peers holding an older locator for
    // this identity accept the replacement.
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let advertise = args.advertise.unwrap_or(args.listen);
    let me: PeerAddr = Arc::new(TcpPeerAddress::new(signatory, advertise, nonce));

    let bootstrap = parse_bootstrap(&args.bootstrap)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        signatory = %signatory,
        listen = %args.listen,
        advertise = %advertise,
        bootstrap = bootstrap.len(),
        "Starting murmur node"
    );

    let mut options = PeerOptions::new(me, bootstrap, Arc::new(BincodeAddressCodec::new()))
        .with_bootstrap_workers(args.bootstrap_workers)
        .with_bootstrap_duration(Duration::from_secs(args.bootstrap_secs));
    if let Some(dir) = &args.data_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        options = options
            .with_dht_store(Arc::new(SledStore::open(&dir.join("peers"), "peers")?))
            .with_broadcaster_store(Arc::new(SledStore::open(&dir.join("broadcast"), "broadcast")?));
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(MESSAGE_CHANNEL_SIZE);
    let (inbound_tx, inbound_rx) = mpsc::channel(MESSAGE_CHANNEL_SIZE);
    let (event_tx, mut event_rx) = options.event_channel();

    let mut peer = Peer::new(options, inbound_rx, outbound_tx, event_tx)
        .context("Failed to initialize peer")?;

    let handshaker = Arc::new(Handshaker::new(keypair, Arc::new(AllowAll)));
    let cancel = CancellationToken::new();

    let server = Server::new(ServerOptions::default(), Arc::clone(&handshaker), inbound_tx);
    let server_cancel = cancel.clone();
    let listen = args.listen;
    tokio::spawn(async move {
        if let Err(e) = server.listen(server_cancel, listen).await {
            warn!(error = %e, "Server terminated");
        }
    });

    let client = Client::new(ClientOptions::default(), handshaker);
    tokio::spawn(client.run(cancel.clone(), outbound_rx));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                Event::PeerChanged { address, .. } => {
                    info!(peer = %address, "Peer changed");
                }
                Event::MessageReceived { from, message, .. } => {
                    info!(
                        from = ?from,
                        variant = %message.variant,
                        bytes = message.body.len(),
                        "Message received"
                    );
                }
            }
        }
    });

    let run_cancel = cancel.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            cancel.cancel();
        }
        _ = peer.run(run_cancel) => {
            warn!("Peer loop exited");
        }
    }

    info!("murmur node stopped");
    Ok(())
}
