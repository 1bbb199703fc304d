//! OPR Miner - Oracle Price Record mining client
//!
//! Runs as a coordinator that announces intervals, as a miner that follows
//! a coordinator, or standalone with a local interval clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use opr_miner::{
    config::{Config, KEY_COORDINATOR, KEY_INTERVAL_SECONDS, KEY_LISTEN},
    network::{Client, CoordinatorEvent, Message, Server},
    oracle::{FixedPrices, Randomized},
    types::{Entry, EntrySink},
    CoordinatorHandler, HashEngine, LxrParams, MiningCoordinator,
};

/// Prefix of environment variables overriding config keys
const ENV_PREFIX: &str = "OPR";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Announce intervals to connected miners
    Coordinator,
    /// Mine the intervals a coordinator announces
    Miner,
    /// Mine on a local interval clock
    Local,
}

#[derive(Clone, Debug)]
struct Options {
    mode: Mode,
    config_path: Option<String>,
    start_height: i32,
    small_table: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            config_path: None,
            start_height: 1,
            small_table: false,
        }
    }
}

/// Writes entries to the log instead of a ledger
struct LogSink;

impl EntrySink for LogSink {
    fn submit(&self, entry: &Entry) -> anyhow::Result<()> {
        let hash = entry.hash()?;
        info!(
            entry = %hex::encode(hash),
            nonce = %hex::encode(entry.ext_ids.first().map(Vec::as_slice).unwrap_or_default()),
            bytes = entry.content.len(),
            "Submitted entry"
        );
        Ok(())
    }
}

fn load_config(options: &Options) -> anyhow::Result<Config> {
    let config = match &options.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {path}"))?;
            Config::from_ini_str(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => Config::unit_test(),
    };
    Ok(config.with_env_overrides(ENV_PREFIX))
}

async fn init_engine(small_table: bool) -> anyhow::Result<Arc<HashEngine>> {
    let params = if small_table {
        LxrParams::small(LxrParams::PRODUCTION.seed)
    } else {
        LxrParams::PRODUCTION
    };

    info!(bits = params.map_size_bits, passes = params.passes, "Building hash table...");
    let engine = Arc::new(HashEngine::new());
    let building = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || building.init(params).map(|_| ()))
        .await
        .context("hash table generation panicked")??;
    info!("Hash table ready");
    Ok(engine)
}

fn interval_duration(config: &Config) -> anyhow::Result<Duration> {
    let seconds = if config.contains(KEY_INTERVAL_SECONDS) {
        config.int(KEY_INTERVAL_SECONDS)?
    } else {
        60
    };
    let seconds = u64::try_from(seconds).context("interval must not be negative")?;
    Ok(Duration::from_secs(seconds.max(1)))
}

async fn build_coordinator(config: &Config, options: &Options) -> anyhow::Result<MiningCoordinator> {
    let engine = init_engine(options.small_table).await?;
    let prices = Randomized::from_config(FixedPrices::with_defaults(), config)?;
    let coordinator = MiningCoordinator::new(
        config.clone(),
        engine,
        Arc::new(prices),
        Arc::new(LogSink),
    )?;
    Ok(coordinator)
}

async fn run_coordinator(config: Config, options: Options) -> anyhow::Result<()> {
    let listen = config.string(KEY_LISTEN)?.to_string();
    let period = interval_duration(&config)?;

    let server = Arc::new(Server::bind(listen.as_str()).await?);
    let serving = Arc::clone(&server);
    tokio::spawn(async move { serving.serve().await });

    let mut ticker = tokio::time::interval(period);
    let mut height = options.start_height;
    loop {
        ticker.tick().await;
        let msg = Message::forward_event(&CoordinatorEvent::IntervalStarted { height, minute: 1 })?;
        let sent = server.broadcast(&msg).await;
        info!(height, miners = sent, "Announced interval");
        height += 1;
    }
}

async fn run_miner(config: Config, options: Options) -> anyhow::Result<()> {
    let mut coordinator = build_coordinator(&config, &options).await?;
    let addr = config.string(KEY_COORDINATOR)?.to_string();

    let (tx, rx) = mpsc::channel(16);
    let (_conn, _reader) = Client::connect(addr.as_str(), Arc::new(CoordinatorHandler::new(tx)))
        .await
        .with_context(|| format!("connecting to coordinator {addr}"))?;

    coordinator.run(rx).await?;
    warn!("Coordinator connection ended");
    Ok(())
}

async fn run_local(config: Config, options: Options) -> anyhow::Result<()> {
    let mut coordinator = build_coordinator(&config, &options).await?;
    let period = interval_duration(&config)?;

    let (tx, rx) = mpsc::channel(16);
    let start_height = options.start_height;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut height = start_height;
        loop {
            ticker.tick().await;
            let event = CoordinatorEvent::IntervalStarted { height, minute: 1 };
            if tx.send(event).await.is_err() {
                break;
            }
            height += 1;
        }
    });

    coordinator.run(rx).await?;
    Ok(())
}

fn parse_args() -> anyhow::Result<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "coordinator" => options.mode = Mode::Coordinator,
            "miner" => options.mode = Mode::Miner,
            "local" => options.mode = Mode::Local,
            "--config" | "-c" => {
                i += 1;
                options.config_path = args.get(i).cloned();
            }
            "--height" => {
                i += 1;
                if let Some(h) = args.get(i) {
                    options.start_height = h.parse().context("--height expects an integer")?;
                }
            }
            "--small-table" => options.small_table = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => warn!(arg = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    Ok(options)
}

fn print_help() {
    println!("OPR Miner v{}", opr_miner::VERSION);
    println!();
    println!("USAGE:");
    println!("    opr-miner [coordinator|miner|local] [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>     INI config file (default: built-in test config)");
    println!("    --height <N>            First block height (default: 1)");
    println!("    --small-table           Use a small hash table, for local testing");
    println!("    -h, --help              Print help");
    println!();
    println!("Config keys can be overridden with {ENV_PREFIX}_<SECTION>_<KEY> variables.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args()?;
    let config = load_config(&options)?;
    info!(version = opr_miner::VERSION, mode = ?options.mode, "OPR miner starting");

    match options.mode {
        Mode::Coordinator => run_coordinator(config, options).await,
        Mode::Miner => run_miner(config, options).await,
        Mode::Local => run_local(config, options).await,
    }
}
