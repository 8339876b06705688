mod handlers;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use horde_core::client::HordeClient;
use horde_core::config::{ClientConfig, GlobalConfig};
use horde_core::infrastructure_in_memory::InMemoryAgentStore;
use horde_core::workspace::LoadBalancer;

use handlers::{CliResponse, EvictResponse};

#[derive(Parser)]
#[command(
    name = "horde",
    about = "Horde admission control: evaluate lease, pool, workspace and ACL decisions",
    version
)]
struct Cli {
    /// Storage backend for stateful commands: "memory" or "sqlite:<path>"
    #[arg(long, global = true, default_value = "memory", env = "HORDE_STORAGE")]
    storage: String,

    /// Path to a JSON file with Perforce cluster configuration
    #[arg(long, global = true, env = "HORDE_CONFIG")]
    config: Option<PathBuf>,

    /// Attempts before a contended agent update is abandoned
    #[arg(long, global = true, default_value_t = 10)]
    max_update_attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a lease request against an agent snapshot (JSON on stdin)
    Check,

    /// List the pools an agent belongs to (JSON on stdin)
    Pools,

    /// Resolve an action through a chain of ACL scopes (JSON on stdin)
    Authorize,

    /// Resolve Perforce servers and credentials for workspaces (JSON on stdin)
    Resolve,

    /// Grant a lease on a stored agent (JSON on stdin)
    Assign,

    /// Print the agents held by the storage backend
    Agents,

    /// Cancel expired leases in the storage backend
    Evict {
        /// Evaluation time in milliseconds since the epoch; defaults to now
        #[arg(long)]
        now: Option<u64>,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        print_json(&CliResponse::<()>::err(format!("{:#}", e)));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check => {
            let verdict = handlers::check(read_stdin()?);
            print_json(&CliResponse::ok(verdict));
        }
        Commands::Pools => {
            print_json(&CliResponse::ok(handlers::pools(read_stdin()?)));
        }
        Commands::Authorize => {
            print_json(&CliResponse::ok(handlers::authorize(read_stdin()?)));
        }
        Commands::Resolve => {
            let globals = load_globals(cli.config.as_ref())?;
            let messages = handlers::resolve(read_stdin()?, &globals, &LoadBalancer::new()).await?;
            print_json(&CliResponse::ok(messages));
        }
        Commands::Assign => {
            let globals = load_globals(cli.config.as_ref())?;
            let client = create_client(&cli.storage, cli.max_update_attempts)?;
            let grant = handlers::assign(&client, read_stdin()?, &globals, &LoadBalancer::new()).await?;
            print_json(&CliResponse::ok(grant));
        }
        Commands::Agents => {
            let client = create_client(&cli.storage, cli.max_update_attempts)?;
            print_json(&CliResponse::ok(client.list_agents()?));
        }
        Commands::Evict { now } => {
            let client = create_client(&cli.storage, cli.max_update_attempts)?;
            let now = now.unwrap_or_else(now_ms);
            let evicted = client.evict_expired(now)?;
            print_json(&CliResponse::ok(EvictResponse { evicted }));
        }
        Commands::Version => {
            println!("horde {}", env!("CARGO_PKG_VERSION"));
            println!("Admission control core for the Horde build farm");
        }
    }
    Ok(())
}

fn read_stdin<T: DeserializeOwned>() -> Result<T> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;
    serde_json::from_str(&input).context("invalid JSON input")
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn load_globals(path: Option<&PathBuf>) -> Result<GlobalConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading perforce configuration");
            GlobalConfig::from_json_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
        None => Ok(GlobalConfig::default()),
    }
}

fn create_client(storage: &str, max_update_attempts: u32) -> Result<HordeClient> {
    let config = ClientConfig {
        max_update_attempts,
        ..ClientConfig::default()
    };

    if storage == "memory" {
        info!("storage backend: in-memory (agents will not persist)");
        let store = Arc::new(InMemoryAgentStore::new());
        return Ok(HordeClient::with_store(store, config));
    }

    let Some(path) = storage.strip_prefix("sqlite:") else {
        bail!("unknown storage backend '{}'; use 'memory' or 'sqlite:<path>'", storage);
    };

    open_sqlite(path, config)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &str, config: ClientConfig) -> Result<HordeClient> {
    info!(path, "storage backend: sqlite");
    HordeClient::with_sqlite(path, config)
        .with_context(|| format!("failed to open sqlite store at {}", path))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_path: &str, _config: ClientConfig) -> Result<HordeClient> {
    bail!("sqlite storage requested but the `sqlite` feature is not enabled")
}
