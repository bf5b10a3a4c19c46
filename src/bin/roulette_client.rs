use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use url::Url;

use roulette_sync::config::ClientConfig;
use roulette_sync::driver::{DriverHandle, RoundDriver};
use roulette_sync::logging::init_tracing;
use roulette_sync::round::SessionMode;
use roulette_sync::server::{run_server, shutdown_signal, ServerConfig};
use roulette_sync::session::{RoundSession, SessionEvent};
use roulette_sync::source::{
    GraphQlOutcomeSource, GraphQlSourceConfig, InMemoryOutcomeSource, InMemorySourceConfig,
    OutcomeSource,
};
use roulette_sync::stats::JsonFileStatsStore;
use roulette_sync::time::SystemClock;

const LOG_TARGET: &str = "bin::roulette_client";
const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Solo,
    Host,
    Join,
}

impl From<Mode> for SessionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Solo => SessionMode::Solo,
            Mode::Host => SessionMode::Host,
            Mode::Join => SessionMode::Join,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "roulette_client")]
#[command(about = "Run a roulette client session and expose it over HTTP", long_about = None)]
struct Args {
    /// Whether this client plays alone, hosts a shared round, or joins one
    #[arg(long, env = "ROULETTE_MODE", value_enum, default_value = "solo")]
    mode: Mode,

    /// Participant id bets and statistics are attributed to
    #[arg(long, env = "ROULETTE_PARTICIPANT")]
    participant: Option<String>,

    /// Display name used when registering the participant at startup
    #[arg(long, env = "ROULETTE_NAME")]
    name: Option<String>,

    /// Chips granted on registration
    #[arg(long, env = "ROULETTE_INITIAL_BALANCE", default_value_t = 1_000)]
    initial_balance: u64,

    /// Run against an in-process ledger instead of a node
    #[arg(long, env = "ROULETTE_SIMULATE", default_value_t = false)]
    simulate: bool,

    /// RNG seed for the simulated ledger
    #[arg(long, env = "ROULETTE_SEED")]
    seed: Option<u64>,

    /// Node service base URL
    #[arg(long, env = "ROULETTE_NODE_URL", default_value = "http://localhost:8080")]
    node_url: Url,

    #[arg(long, env = "ROULETTE_APPLICATION_ID")]
    application_id: Option<String>,

    /// Chain this client submits mutations on
    #[arg(long, env = "ROULETTE_CHAIN_ID")]
    chain_id: Option<String>,

    /// Chain hosting the shared round, when joining someone else's
    #[arg(long, env = "ROULETTE_HOST_CHAIN_ID")]
    host_chain_id: Option<String>,

    /// Address to bind the HTTP API to (host:port)
    #[arg(long, env = "ROULETTE_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Directory holding per-participant statistics
    #[arg(long, env = "ROULETTE_STATS_DIR", default_value = ".roulette")]
    stats_dir: PathBuf,

    #[arg(long, env = "ROULETTE_POLL_MS", default_value_t = 1_000)]
    poll_ms: u64,

    /// Betting window length used by the simulated ledger
    #[arg(long, env = "ROULETTE_BETTING_WINDOW_SECS", default_value_t = 30)]
    betting_window_secs: u64,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "ROULETTE_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;

    let config = client_config(&args);
    let source = build_source(&args, &config).context("failed to build outcome source")?;
    let stats = Arc::new(JsonFileStatsStore::new(config.stats_dir.clone()));
    let session = RoundSession::new(&config, stats);
    let (driver, join) = RoundDriver::spawn(session, source, Arc::new(SystemClock), &config);

    tokio::spawn(log_events(driver.clone()));

    if let Some(name) = args.name.clone() {
        match driver.register(name, args.initial_balance).await {
            Ok(()) => info!(target: LOG_TARGET, "participant registered"),
            Err(err) => warn!(target: LOG_TARGET, error = %err, "registration failed"),
        }
    }

    let server = ServerConfig {
        bind: args.bind,
        ..ServerConfig::default()
    };
    run_server(driver, server, shutdown_signal()).await?;
    join.await.context("round driver panicked")?;
    Ok(())
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    dotenv::from_filename(PathBuf::from(manifest_env).join(".env")).ok();
    dotenv::dotenv().ok();
}

fn client_config(args: &Args) -> ClientConfig {
    ClientConfig {
        poll_interval: Duration::from_millis(args.poll_ms.max(50)),
        betting_window: Duration::from_secs(args.betting_window_secs),
        stats_dir: args.stats_dir.clone(),
        ..ClientConfig::new(args.mode.into(), args.participant.clone())
    }
}

fn build_source(args: &Args, config: &ClientConfig) -> Result<Arc<dyn OutcomeSource>> {
    if args.simulate {
        info!(target: LOG_TARGET, seed = ?args.seed, "using simulated ledger");
        return Ok(Arc::new(InMemoryOutcomeSource::new(InMemorySourceConfig {
            betting_window: config.betting_window,
            seed: args.seed,
        })));
    }

    let application_id = args
        .application_id
        .clone()
        .context("ROULETTE_APPLICATION_ID is required unless --simulate is set")?;
    let chain_id = args
        .chain_id
        .clone()
        .context("ROULETTE_CHAIN_ID is required unless --simulate is set")?;
    let source = GraphQlOutcomeSource::new(GraphQlSourceConfig {
        node_url: args.node_url.clone(),
        application_id,
        chain_id,
        host_chain_id: args.host_chain_id.clone(),
        request_timeout: Duration::from_secs(10),
    })?;
    info!(target: LOG_TARGET, node = %args.node_url, "using node service");
    Ok(Arc::new(source))
}

async fn log_events(driver: DriverHandle) {
    let mut events = BroadcastStream::new(driver.subscribe());
    while let Some(event) = events.next().await {
        match event {
            Ok(SessionEvent::Countdown { .. }) => {}
            Ok(event) => info!(target: LOG_TARGET, kind = event.name(), ?event, "session event"),
            Err(err) => warn!(target: LOG_TARGET, error = %err, "event log lagged"),
        }
    }
}
