use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use streamgate::client::{
    monitor, parse_script, ClientResult, HttpSignalingApi, InputReplay, LocalPeer, SignalingLoop,
    StreamRequest, WebRtcPeer,
};
use streamgate::config::{self, AppConfig};
use streamgate::provider::GameLiftStreamsClient;
use streamgate::session::{
    spawn_expiry_sweeper, MemorySessionStore, SessionService, SessionSettings,
};
use streamgate::state::AppState;
use streamgate::web::{self, ClientRateLimiter};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// streamgate command line arguments
#[derive(Parser, Debug)]
#[command(name = "streamgate")]
#[command(version, about = "WebRTC session gateway for Amazon GameLift Streams", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Serve(ServeArgs),
    /// Start a stream and receive it headlessly
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Listen port (overrides config and PORT)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Enable HTTPS (overrides config)
    #[arg(long)]
    enable_https: bool,

    /// Path to SSL certificate file (generates self-signed if not provided)
    #[arg(long, value_name = "FILE", requires = "ssl_key")]
    ssl_cert: Option<PathBuf>,

    /// Path to SSL private key file
    #[arg(long, value_name = "FILE", requires = "ssl_cert")]
    ssl_key: Option<PathBuf>,

    /// Data directory for generated certificates
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Directory holding the web client
    #[arg(long, value_name = "DIR")]
    static_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Gateway base URL
    #[arg(short = 's', long, default_value = "http://localhost:8000")]
    server: String,

    /// Application identifier (ID or ARN)
    #[arg(long, value_name = "ID")]
    app_id: String,

    /// Stream group (ignored by hosted gateways)
    #[arg(long, value_name = "ID")]
    stream_group: Option<String>,

    /// Player identifier forwarded to the provider
    #[arg(long)]
    user_id: Option<String>,

    /// Preferred locations, in order
    #[arg(long = "region", value_name = "REGION")]
    regions: Vec<String>,

    /// Extra launch argument for the application
    #[arg(long = "launch-arg", value_name = "ARG", allow_hyphen_values = true)]
    launch_args: Vec<String>,

    /// Extra environment variable for the application
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    environment: Vec<(String, String)>,

    /// STUN server URL
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    stun: Vec<String>,

    /// Seconds between answer polls
    #[arg(long, default_value_t = 1)]
    poll_interval: u64,

    /// Seconds to stay connected
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Seconds between metrics samples
    #[arg(long, default_value_t = 2)]
    metrics_interval: u64,

    /// Times to reconnect after the peer connection fails
    #[arg(long, default_value_t = 1)]
    max_reconnects: u32,

    /// Replay keyboard and gamepad events from a JSON lines file
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Leave the stream session running on exit
    #[arg(long)]
    keep: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging with CLI arguments
    init_logging(args.log_level, args.verbose, args.log_format);

    // Install default crypto provider (required by rustls 0.23+)
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    match args.command {
        Some(Command::Connect(connect)) => run_client(connect).await,
        Some(Command::Serve(serve)) => run_server(serve).await,
        None => run_server(ServeArgs::default()).await,
    }
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    tracing::info!("Starting streamgate v{}", env!("CARGO_PKG_VERSION"));

    // defaults -> TOML -> environment -> CLI
    let mut config = config::load_config(args.config.as_deref())?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    tracing::info!(
        deployment = ?config.deployment,
        region = %config.provider.region,
        stream_group = config.provider.stream_group_id.as_deref().unwrap_or("<per request>"),
        "Configuration loaded"
    );

    let data_dir = args.data_dir.clone().unwrap_or_else(get_data_dir);

    // Provider client; credentials resolve through the AWS default chain
    let provider = GameLiftStreamsClient::from_config(&config.provider).await;
    tracing::info!(
        endpoint = config.provider.endpoint_override().as_deref().unwrap_or("<regional>"),
        max_attempts = config.provider.max_attempts,
        "GameLift Streams client ready"
    );

    // Session registry and lifecycle
    let store = Arc::new(MemorySessionStore::new());
    let sessions = Arc::new(SessionService::new(
        Arc::new(provider),
        store.clone(),
        SessionSettings::from_config(&config),
    ));

    let sweeper = spawn_expiry_sweeper(
        store,
        Duration::from_secs(config.session.connection_timeout_secs),
        Duration::from_millis(config.session.cleanup_interval_ms),
        sessions.shutdown_token(),
    );

    let rate_limiter = Arc::new(ClientRateLimiter::new(&config.rate_limit));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = AppState::new(
        Arc::new(config.clone()),
        sessions,
        rate_limiter,
        shutdown_tx.clone(),
    );

    spawn_rate_limit_pruner(state.clone(), Duration::from_millis(config.rate_limit.window_ms));

    // Create router
    let app = web::create_router(state.clone());
    let addr = resolve_bind_address(&config)?;

    // Setup graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    // Start server
    if config.web.https_enabled {
        let tls_config = load_tls_config(&config, &data_dir).await?;
        tracing::info!("Starting HTTPS server on {}", addr);

        let server = axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTPS server error: {}", e);
                }
            }
        }
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        );

        tokio::select! {
            _ = shutdown_signal => {}
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
        }
    }

    cleanup(&state).await;
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweeper ended abnormally: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &ServeArgs) {
    if let Some(ref address) = args.address {
        config.web.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.web.port = port;
    }
    if args.enable_https {
        config.web.https_enabled = true;
    }
    if let (Some(cert), Some(key)) = (&args.ssl_cert, &args.ssl_key) {
        config.web.ssl_cert_path = Some(cert.to_string_lossy().to_string());
        config.web.ssl_key_path = Some(key.to_string_lossy().to_string());
    }
    if let Some(ref dir) = args.static_dir {
        config.web.static_dir = Some(dir.to_string_lossy().to_string());
    }
}

fn resolve_bind_address(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    Ok(SocketAddr::new(ip, config.web.port))
}

async fn load_tls_config(config: &AppConfig, data_dir: &Path) -> anyhow::Result<RustlsConfig> {
    if let (Some(cert_path), Some(key_path)) =
        (&config.web.ssl_cert_path, &config.web.ssl_key_path)
    {
        return Ok(RustlsConfig::from_pem_file(cert_path, key_path).await?);
    }

    let cert_dir = data_dir.join("certs");
    let cert_path = cert_dir.join("server.crt");
    let key_path = cert_dir.join("server.key");

    // Check if certificate already exists, only generate if missing
    if !cert_path.exists() || !key_path.exists() {
        tracing::info!("Generating new self-signed TLS certificate");
        let cert = generate_self_signed_cert()?;
        tokio::fs::create_dir_all(&cert_dir).await?;
        tokio::fs::write(&cert_path, cert.cert.pem()).await?;
        tokio::fs::write(&key_path, cert.key_pair.serialize_pem()).await?;
    } else {
        tracing::info!("Using existing TLS certificate from {}", cert_dir.display());
    }

    Ok(RustlsConfig::from_pem_file(&cert_path, &key_path).await?)
}

/// Periodically drop rate-limit state for idle clients
fn spawn_rate_limit_pruner(state: Arc<AppState>, period: Duration) {
    let mut shutdown_rx = state.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    state.rate_limiter.prune();
                    tracing::trace!(clients = state.rate_limiter.tracked_clients(), "Rate limiter pruned");
                }
            }
        }
    });
}

async fn cleanup(state: &Arc<AppState>) {
    // Stops the sweeper and every pending token expiry timer
    state.sessions.shutdown();
    let _ = state.shutdown_tx.send(());

    let remaining = state.sessions.store().len();
    if remaining > 0 {
        // Provider sessions outlive the gateway and end on their own timeout
        tracing::info!(remaining, "Dropping unexpired session tokens");
    }
}

async fn run_client(args: ConnectArgs) -> anyhow::Result<()> {
    // Read the script before starting a session so a bad file costs nothing
    let script = match &args.input {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let events = parse_script(&text)?;
            tracing::info!(events = events.len(), "Loaded input script {}", path.display());
            Some(events)
        }
        None => None,
    };

    let api = HttpSignalingApi::new(&args.server, Duration::from_secs(15))?;
    let signaling = SignalingLoop::new(api, Duration::from_secs(args.poll_interval.max(1)));

    let request = StreamRequest {
        stream_group: args.stream_group.clone(),
        app_identifier: args.app_id.clone(),
        user_id: args.user_id.clone(),
        regions: args.regions.clone(),
        launch_args: args.launch_args.clone(),
        environment: args.environment.iter().cloned().collect::<BTreeMap<_, _>>(),
    };

    tracing::info!("Requesting stream of {} from {}", args.app_id, args.server);
    let mut peer = WebRtcPeer::new(&args.stun).await?;
    let token = tokio::select! {
        result = signaling.connect(&peer, &request) => result?,
        _ = tokio::signal::ctrl_c() => {
            signaling.cancel();
            peer.close().await;
            anyhow::bail!("Interrupted while connecting");
        }
    };

    let mut replay = script.map(|events| InputReplay::new(events, tokio::time::Instant::now()));
    let outcome = stream(&args, &signaling, &mut peer, &token, replay.as_mut()).await;
    signaling.finish(&peer, &token, args.keep, outcome).await?;
    Ok(())
}

/// Watch the stream until the deadline, reconnecting when the peer fails
async fn stream(
    args: &ConnectArgs,
    signaling: &SignalingLoop<HttpSignalingApi>,
    peer: &mut WebRtcPeer,
    token: &str,
    mut replay: Option<&mut InputReplay>,
) -> ClientResult<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration);
    let metrics_interval = Duration::from_secs(args.metrics_interval.max(1));
    let mut reconnects = 0;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }

        let mut state_rx = peer.state_watch();
        let failed = async {
            loop {
                if state_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *state_rx.borrow() == RTCPeerConnectionState::Failed {
                    return;
                }
            }
        };

        let replaying = replay.as_ref().is_some_and(|r| !r.is_finished());
        let input = async {
            match replay.as_deref_mut() {
                Some(replay) => replay.run(&*peer).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = monitor(&*peer, metrics_interval, remaining) => return Ok(()),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
            result = input, if replaying => {
                if let Err(e) = result {
                    tracing::warn!("Input replay stopped: {}", e);
                    replay = None;
                }
            }
            _ = failed => {
                if reconnects >= args.max_reconnects {
                    tracing::warn!("Peer connection failed, giving up");
                    return Ok(());
                }
                reconnects += 1;
                tracing::warn!(attempt = reconnects, "Peer connection failed, reconnecting");
                peer.close().await;
                *peer = WebRtcPeer::new(&args.stun).await?;
                signaling.reconnect(&*peer, token).await?;
            }
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, format: LogFormat) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "streamgate=error,tower_http=error",
        LogLevel::Warn => "streamgate=warn,tower_http=warn",
        LogLevel::Info => "streamgate=info,tower_http=info",
        LogLevel::Verbose => "streamgate=debug,tower_http=info",
        LogLevel::Debug => "streamgate=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "streamgate=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let result = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    // Check environment variable first
    if let Ok(path) = std::env::var("STREAMGATE_DATA_DIR") {
        return PathBuf::from(path);
    }

    PathBuf::from("./data")
}

/// Generate a self-signed TLS certificate
fn generate_self_signed_cert() -> anyhow::Result<rcgen::CertifiedKey> {
    use rcgen::generate_simple_self_signed;

    let subject_alt_names = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];

    let certified_key = generate_simple_self_signed(subject_alt_names)?;
    Ok(certified_key)
}
