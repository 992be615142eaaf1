//! cue-relay: pub/sub relay for the cue lobby, plus a few admin commands.
//!
//! ```text
//! cue-relay serve   [--bind 127.0.0.1:9191]
//! cue-relay tables  --store ./lobby-data
//! cue-relay sweep   --store ./lobby-data
//! cue-relay history --store ./lobby-data [--limit 20] [--rule snooker]
//! cue-relay tail    lobby [--url ws://127.0.0.1:9191]
//! ```
//!
//! Every command reads an optional TOML config (`--config`) and then applies
//! `CUE_LOBBY_*` environment overrides. Log level comes from `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use cue_lobby::bus::NotificationBus;
use cue_lobby::config::LobbyConfig;
use cue_lobby::history::{MatchHistory, DEFAULT_RESULTS_LIMIT};
use cue_lobby::model::RuleType;
use cue_lobby::relay::{RelayConfig, RelayServer};
use cue_lobby::store::{RocksStore, StoreConfig};
use cue_lobby::tables::TableCoordinator;

#[derive(Debug, Parser)]
#[command(name = "cue-relay", version)]
#[command(about = "Pub/sub relay and lobby admin tool", long_about = None)]
struct Cli {
    /// TOML file with lobby settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the WebSocket relay until interrupted
    Serve {
        /// Address to listen on (host:port); overrides `[relay] bind_addr`
        #[arg(long)]
        bind: Option<String>,

        /// Per-channel broadcast buffer; overrides `[relay] channel_capacity`
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// List live tables, newest first
    Tables {
        #[arg(long)]
        store: PathBuf,
    },
    /// Remove expired tables
    Sweep {
        #[arg(long)]
        store: PathBuf,
    },
    /// Show recent match results
    History {
        #[arg(long)]
        store: PathBuf,

        #[arg(long, default_value_t = DEFAULT_RESULTS_LIMIT)]
        limit: usize,

        /// Only results of this rule type (nineball, eightball, snooker, threecushion)
        #[arg(long)]
        rule: Option<RuleType>,
    },
    /// Print every frame published on a channel
    Tail {
        channel: String,

        /// Relay base URL; defaults to the configured bus URL
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind, capacity } => serve(&config, bind, capacity).await,
        Command::Tables { store } => list_tables(&config, &store).await,
        Command::Sweep { store } => sweep(&config, &store).await,
        Command::History { store, limit, rule } => history(&config, &store, limit, rule).await,
        Command::Tail { channel, url } => tail(config, &channel, url).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<LobbyConfig> {
    let mut config = match path {
        Some(path) => LobbyConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LobbyConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn open_store(path: &Path) -> Result<Arc<RocksStore>> {
    let store = RocksStore::open(StoreConfig {
        path: path.to_path_buf(),
        ..StoreConfig::default()
    })
    .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn coordinator(config: &LobbyConfig, store: &Path) -> Result<TableCoordinator> {
    let store = open_store(store)?;
    let bus = NotificationBus::websocket(&config.bus);
    Ok(TableCoordinator::new(store, bus, config))
}

async fn serve(config: &LobbyConfig, bind: Option<String>, capacity: Option<usize>) -> Result<()> {
    let relay = RelayServer::new(RelayConfig {
        bind_addr: bind.unwrap_or_else(|| config.relay.bind_addr.clone()),
        channel_capacity: capacity.unwrap_or(config.relay.channel_capacity),
    });
    info!("Starting relay on {}", relay.bind_addr());

    tokio::select! {
        result = relay.run() => result.context("relay stopped"),
        _ = tokio::signal::ctrl_c() => {
            let stats = relay.hub().stats().await;
            info!(
                "Shutting down: {} channels, {} frames relayed",
                relay.hub().channel_count().await,
                stats.frames_delivered
            );
            Ok(())
        }
    }
}

/// Expired tables are removed before listing: the background cleanup of
/// `get_tables` would not outlive this process.
async fn list_tables(config: &LobbyConfig, store: &Path) -> Result<()> {
    let coordinator = coordinator(config, store)?;
    let removed = coordinator.expire_tables().await?;
    if removed > 0 {
        info!("Removed {removed} expired tables");
    }
    let tables = coordinator.get_tables().await?;
    if tables.is_empty() {
        println!("No live tables");
        return Ok(());
    }
    for table in tables {
        let players: Vec<&str> = table.players.iter().map(|p| p.name.as_str()).collect();
        let status = if table.completed {
            "completed"
        } else if table.is_pending() {
            "waiting"
        } else {
            "playing"
        };
        println!(
            "{}  {:<12} {:<9} {}  (created {}, last used {})",
            table.id,
            table.rule_type,
            status,
            players.join(" vs "),
            table.created_at,
            table.last_used_at
        );
    }
    Ok(())
}

async fn sweep(config: &LobbyConfig, store: &Path) -> Result<()> {
    let removed = coordinator(config, store)?.expire_tables().await?;
    info!("Removed {removed} expired tables");
    Ok(())
}

async fn history(config: &LobbyConfig, store: &Path, limit: usize, rule: Option<RuleType>) -> Result<()> {
    let history = MatchHistory::new(open_store(store)?, &config.history);
    let results = history.get_match_results(limit, rule).await?;
    for result in &results {
        let loser = match (&result.loser, result.loser_score) {
            (Some(loser), Some(score)) => format!(" beat {loser} {}-{score}", result.winner_score),
            _ => format!(" scored {}", result.winner_score),
        };
        let replay = if result.has_replay() { "  [replay]" } else { "" };
        println!(
            "{}  {:<12} {}{loser}{replay}",
            result.timestamp, result.rule_type, result.winner
        );
    }
    println!(
        "{} shown, {} recorded in total",
        results.len(),
        history.total_recorded().await?
    );
    Ok(())
}

async fn tail(mut config: LobbyConfig, channel: &str, url: Option<String>) -> Result<()> {
    if let Some(url) = url {
        config.bus.url = url;
    }
    let bus = NotificationBus::websocket(&config.bus);
    info!("Tailing {channel} on {}", config.bus.url);

    let subscription = bus.subscribe(channel, &config.bus.kind, |frame| println!("{frame}"), None);
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    subscription.stop();
    Ok(())
}
