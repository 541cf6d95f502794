// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lango Agent Node
//!
//! Entry point for the `lango-node` binary. Wires the trust core to real
//! sockets: one libp2p swarm carrying discovery gossip, handshakes and
//! tool calls, a sled reputation database and the status API.
//!
//! ```text
//!            ┌────────────── lango-node ──────────────┐
//!  libp2p ◄─►┤ swarm ◄──► GossipService ─► directory  │
//!  :9740     │   │                                    │
//!   hs 1.x ──┤   ├─► ProtocolRouter ─► sessions ◄─ security
//!   a2a ─────┤   └─► CapabilityGateway ─► firewall ▲  │
//!            │                            └─► reputation
//!  http ────►┤ status API + /metrics                  │
//!  :9742     └────────────────────────────────────────┘
//! ```

mod api;
mod cli;
mod inbound;
mod logging;
mod metrics;
mod settings;
mod swarm;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libp2p::Multiaddr;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, info_span, warn};

use lango_p2p::capability::{CapabilityGateway, PricedGate, PricingTable};
use lango_p2p::config::{HandshakeConfig, NONCE_SWEEP_INTERVAL};
use lango_p2p::discovery::{GossipCard, GossipService, PeerDirectory, ProverCredentialVerifier};
use lango_p2p::firewall::{Firewall, ResponseAttestor};
use lango_p2p::handshake::{
    initiate, HandshakeContext, HandshakeProtocol, ProtocolRouter, SecurityEventHandler,
};
use lango_p2p::identity::{Ed25519Wallet, IdentityProvider, WalletProvider};
use lango_p2p::reputation::ReputationStore;
use lango_p2p::zkp::ProverService;

use cli::{Commands, LangoNodeCli};
use inbound::{BuiltinTools, InboundHandlers};
use metrics::NodeMetrics;
use swarm::{NodeSwarm, SwarmOptions};
use settings::{NodeConfig, REPUTATION_DIR, WALLET_KEY_FILE};

/// How often the directory and session gauges are refreshed.
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LangoNodeCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format);

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Handshake(args) => dial_handshake(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut config = NodeConfig::load(args.config.as_deref(), &args.data_dir)?;
    config.apply_args(&args);
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    // --- Identity ---
    let wallet = Arc::new(load_or_create_wallet(&data_dir)?);
    let identity = Arc::new(IdentityProvider::new(
        Arc::clone(&wallet) as Arc<dyn WalletProvider>
    ));
    let did = identity.did().context("failed to derive DID from wallet")?;
    info!(did = %did, peer_id = %did.peer_id(), data_dir = %data_dir.display(), "starting lango-node");

    let metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Prover ---
    let prover = start_prover(&config).await?;

    // --- Reputation ---
    let reputation_path = data_dir.join(REPUTATION_DIR);
    let reputation = Arc::new(
        ReputationStore::open(&reputation_path)
            .with_context(|| format!("failed to open reputation store at {}", reputation_path.display()))?
            .with_span(info_span!("reputation", did = %did)),
    );

    // --- Handshake ---
    let handshake_config = config.p2p.handshake.clone();
    let ctx = handshake_context(Arc::clone(&identity), handshake_config, prover.clone())
        .with_span(info_span!("handshake", did = %did));
    let security = Arc::new(SecurityEventHandler::new(
        Arc::clone(&ctx.sessions),
        config.p2p.handshake.max_auth_failures,
        config.p2p.firewall.min_trust_score,
    ));
    reputation.add_observer(Arc::clone(&security) as _);
    let ctx = Arc::new(ctx.with_security(security));
    ctx.nonces
        .start_sweeper(NONCE_SWEEP_INTERVAL, Some(Arc::clone(&ctx.sessions)));
    let router = Arc::new(ProtocolRouter::new(Arc::clone(&ctx)));

    // --- Firewall, pricing, gateway ---
    let pricing = Arc::new(PricingTable::new(
        config.pricing.currency.clone(),
        config.pricing.default_price,
    ));
    for (tool, amount) in &config.pricing.tools {
        pricing.set_price(tool.clone(), *amount);
    }
    let firewall = Firewall::new(&config.p2p.firewall)
        .with_reputation(Arc::clone(&reputation) as _)
        .with_payment_gate(Arc::new(PricedGate::new(Arc::clone(&pricing))))
        .with_span(info_span!("firewall", did = %did));
    for rule in &config.acl {
        firewall
            .add_rule(rule.clone())
            .with_context(|| format!("invalid ACL rule for {}", rule.peer_did))?;
    }
    let firewall = Arc::new(firewall);

    let mut gateway = CapabilityGateway::new(
        Arc::clone(&ctx.sessions),
        Arc::clone(&firewall),
        Arc::new(BuiltinTools::new(
            did.id(),
            config.node.capabilities.clone(),
        )),
        Arc::clone(&pricing),
    )
    .with_reputation(Arc::clone(&reputation))
    .with_span(info_span!("gateway", did = %did));
    if let (true, Some(prover)) = (config.p2p.firewall.attestation_enabled, &prover) {
        gateway = gateway.with_attestor(Arc::new(ResponseAttestor::new(
            Arc::clone(prover),
            Arc::clone(&identity),
            config.p2p.firewall.attestation_window(),
        )));
    }
    let gateway = Arc::new(gateway);

    // --- Swarm & discovery ---
    let listen: Multiaddr = format!("/ip4/{}/tcp/{}", config.node.listen_host, config.node.p2p_port)
        .parse()
        .context("invalid p2p listen address")?;
    let bootstrap = parse_multiaddrs(&config.node.bootstrap)?;
    let keypair = wallet.to_libp2p_keypair()?;
    let handlers = Arc::new(InboundHandlers::new(
        Arc::clone(&router),
        Arc::clone(&gateway),
        Arc::clone(&metrics),
    ));
    let (node_swarm, inbound) = NodeSwarm::spawn(
        keypair,
        SwarmOptions {
            listen: Some(listen),
            topic: config.p2p.discovery.topic.clone(),
            bootstrap,
            request_timeout: config.p2p.handshake.timeout(),
        },
        Some(handlers),
        Arc::clone(&metrics),
    )?;

    let directory = Arc::new(PeerDirectory::new());
    let mut gossip = GossipService::new(
        Arc::clone(&identity),
        Arc::clone(&directory),
        Arc::new(node_swarm.handle.clone()),
        config.p2p.discovery.clone(),
    )
    .with_span(info_span!("discovery", did = %did));
    if let Some(prover) = &prover {
        gossip = gossip.with_verifier(Arc::new(ProverCredentialVerifier::new(Arc::clone(prover))));
    }
    let mut card = GossipCard::new(config.node.name.clone(), &did);
    card.capabilities = config.node.capabilities.clone();
    card.multiaddrs = node_swarm.local_addrs.iter().map(|a| a.to_string()).collect();
    let quotes = pricing.quotes();
    if !quotes.is_empty() {
        card.pricing = Some(quotes);
    }
    gossip.set_local_card(card);
    gossip.start(inbound)?;

    // --- Gauges ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gauge_task = {
        let metrics = Arc::clone(&metrics);
        let sessions = Arc::clone(&ctx.sessions);
        let directory = Arc::clone(&directory);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                metrics.active_sessions.set(sessions.len() as i64);
                metrics.known_peers.set(directory.len() as i64);
                tokio::select! {
                    _ = tokio::time::sleep(GAUGE_REFRESH_INTERVAL) => {}
                    _ = shutdown.changed() => break,
                }
            }
        })
    };

    // --- API ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        did: did.id().to_string(),
        peer_id: did.peer_id().to_string(),
        router: Arc::clone(&router),
        firewall: Arc::clone(&firewall),
        reputation: Arc::clone(&reputation),
        pricing: Arc::clone(&pricing),
        directory: Arc::clone(&directory),
        metrics: Arc::clone(&metrics),
    };
    let api_addr = socket_addr(&config.node.listen_host, config.node.api_port)?;
    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {api_addr}"))?;
    info!(%api_addr, "status API listening");

    tokio::select! {
        res = axum::serve(api_listener, api::create_router(app_state)) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // --- Shutdown ---
    let _ = shutdown_tx.send(true);
    gossip.stop().await;
    ctx.nonces.stop().await;
    node_swarm.stop().await;
    let _ = gauge_task.await;
    if let Err(e) = reputation.flush() {
        warn!(error = %e, "reputation flush failed");
    }
    info!("lango-node stopped");
    Ok(())
}

/// Compile the circuits when anything needs them. Setup is CPU-bound and
/// slow, so it runs off the async workers.
async fn start_prover(config: &NodeConfig) -> Result<Option<Arc<ProverService>>> {
    let p2p = &config.p2p;
    if !p2p.handshake.zk_enabled && !p2p.firewall.attestation_enabled {
        return Ok(None);
    }
    let prover = Arc::new(
        ProverService::from_config(&p2p.prover).with_span(info_span!("prover")),
    );
    let compiling = Arc::clone(&prover);
    tokio::task::spawn_blocking(move || compiling.compile_standard_circuits())
        .await
        .context("circuit compilation panicked")?
        .context("failed to compile circuits")?;
    info!(scheme = %prover.scheme(), circuits = prover.compiled_circuits().len(), "prover ready");
    Ok(Some(prover))
}

fn handshake_context(
    identity: Arc<IdentityProvider>,
    config: HandshakeConfig,
    prover: Option<Arc<ProverService>>,
) -> HandshakeContext {
    let ctx = HandshakeContext::new(identity, config);
    match prover {
        Some(prover) => ctx.with_prover(prover),
        None => ctx,
    }
}

fn parse_multiaddrs(addrs: &[String]) -> Result<Vec<Multiaddr>> {
    addrs
        .iter()
        .map(|a| a.parse().with_context(|| format!("invalid multiaddr {a}")))
        .collect()
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

// ---------------------------------------------------------------------------
// init / wallet
// ---------------------------------------------------------------------------

fn init_node(args: cli::InitArgs) -> Result<()> {
    let key_path = args.data_dir.join(WALLET_KEY_FILE);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            key_path.display()
        );
    }
    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory {}", args.data_dir.display())
    })?;
    let wallet = Ed25519Wallet::generate();
    write_wallet(&key_path, &wallet)?;
    let public_key = hex::encode(wallet.public_key_bytes());

    let did = IdentityProvider::new(Arc::new(wallet)).did()?;
    println!("Node initialized.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Wallet key     : {}", key_path.display());
    println!("  Public key     : {}", public_key);
    println!("  DID            : {}", did);
    println!("  Peer ID        : {}", did.peer_id());
    Ok(())
}

fn load_or_create_wallet(data_dir: &Path) -> Result<Ed25519Wallet> {
    let key_path = data_dir.join(WALLET_KEY_FILE);
    if !key_path.exists() {
        warn!(path = %key_path.display(), "no wallet key found, generating one");
        let wallet = Ed25519Wallet::generate();
        write_wallet(&key_path, &wallet)?;
        return Ok(wallet);
    }
    let text = std::fs::read_to_string(&key_path)
        .with_context(|| format!("failed to read wallet key {}", key_path.display()))?;
    Ed25519Wallet::from_hex(text.trim())
        .with_context(|| format!("invalid wallet key in {}", key_path.display()))
}

fn write_wallet(path: &Path, wallet: &Ed25519Wallet) -> Result<()> {
    std::fs::write(path, wallet.secret_key_hex())
        .with_context(|| format!("failed to write wallet key to {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// handshake / status / version
// ---------------------------------------------------------------------------

/// Dial a remote node from a throwaway dial-only swarm, run one handshake
/// and print the resulting session.
async fn dial_handshake(args: cli::HandshakeArgs) -> Result<()> {
    let config = NodeConfig::load(args.config.as_deref(), &args.data_dir)?;
    let wallet = load_or_create_wallet(&config.data_dir())?;
    let keypair = wallet.to_libp2p_keypair()?;
    let identity = Arc::new(IdentityProvider::new(Arc::new(wallet) as Arc<dyn WalletProvider>));
    let prover = start_prover(&config).await?;
    let ctx = Arc::new(handshake_context(identity, config.p2p.handshake.clone(), prover));

    let protocol = if args.legacy {
        HandshakeProtocol::V1_0
    } else {
        ctx.preferred_protocol()
    };
    let addr: Multiaddr = args
        .peer
        .parse()
        .with_context(|| format!("invalid multiaddr {}", args.peer))?;
    let metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let (node_swarm, _cards) = NodeSwarm::spawn(
        keypair,
        SwarmOptions {
            listen: None,
            topic: config.p2p.discovery.topic.clone(),
            bootstrap: Vec::new(),
            request_timeout: config.p2p.handshake.timeout(),
        },
        None,
        metrics,
    )?;

    let result = async {
        let peer = node_swarm.handle.dial(addr.clone()).await?;
        let (_cancel_tx, cancel) = watch::channel(false);
        initiate(&node_swarm.handle, ctx, protocol, peer, cancel)
            .await
            .with_context(|| format!("handshake with {addr} failed"))
    }
    .await;
    node_swarm.stop().await;

    let session = result?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

/// Raw HTTP/1.1 GET against the status API.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(args.api)
        .await
        .with_context(|| format!("failed to connect to {}", args.api))?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.path, args.api
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b)
        .unwrap_or(&response);
    println!("{body}");
    Ok(())
}

fn print_version() {
    println!("lango-node {}", env!("CARGO_PKG_VERSION"));
    println!("agent      {}", lango_p2p::config::AGENT_VERSION);
    println!(
        "protocols  {}, {}",
        lango_p2p::config::HANDSHAKE_PROTOCOL_V1_0,
        lango_p2p::config::HANDSHAKE_PROTOCOL_V1_1
    );
}

/// SIGINT or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
