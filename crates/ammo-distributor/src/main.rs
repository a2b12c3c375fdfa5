//! `ammo`: inspect and maintain a distributor ledger.
//!
//! Reads `ammo.toml` (or the path given with `--config`) plus `AMMO_*`
//! environment overrides, opens the ledger, and runs one maintenance
//! command.
//!
//! ```text
//! ammo route sensor/temperature --category postal
//! ammo --config ~/.config/ammo/ammo.toml stats
//! ```

use std::path::{Path, PathBuf};

use ammo_core::{
  channel::ChannelChange,
  policy::Category,
  request::RequestType,
};
use ammo_distributor::{DistributorConfig, load_policy};
use ammo_store_sqlite::DistributorStore;
use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ammo", version, about = "AMMO distributor ledger tool")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ammo.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Show the routing rule a topic resolves to.
  Route {
    topic: String,
    #[arg(long, default_value = "postal")]
    category: Category,
  },
  /// List known channels and their recorded state.
  Channels,
  /// Print ledger row counts as JSON.
  Stats,
  /// List the requests held in one table.
  List { table: RequestType },
  /// Delete expired requests and orphaned disposals now.
  Gc,
  /// Mark a channel repaired so its BAD disposals are retried.
  Repair { channel: String },
  /// Delete every request in one table.
  Purge { table: RequestType },
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(expand_tilde(&cli.config)).required(false))
    .add_source(config::Environment::with_prefix("AMMO"))
    .build()
    .context("failed to read config file")?;

  let mut cfg: DistributorConfig = settings
    .try_deserialize()
    .context("failed to deserialise DistributorConfig")?;
  cfg.store_path = expand_tilde(&cfg.store_path);
  cfg.policy_path = cfg.policy_path.as_deref().map(expand_tilde);

  match cli.command {
    Command::Route { topic, category } => {
      let policy = load_policy(&cfg).context("failed to load routing policy")?;
      let matched = policy.match_topic(category, &topic);
      let routing = &matched.routing;
      let out = json!({
        "topic":       topic,
        "matched":     matched.name,
        "fallback":    routing.is_fallback(),
        "priority":    routing.priority,
        "lifespan_ms": routing.lifespan.map(|l| l.num_milliseconds()),
        "relay":       routing.relay,
        "clauses":     routing.clauses,
      });
      println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Command::Channels => {
      for channel in open_ledger(&cfg)?.channels()? {
        println!("{:<24} {}", channel.name, channel.state);
      }
    }
    Command::Stats => {
      let stats = open_ledger(&cfg)?.stats()?;
      let requests: serde_json::Map<_, _> =
        stats.requests.iter().map(|(t, n)| (t.to_string(), json!(n))).collect();
      let disposals: serde_json::Map<_, _> =
        stats.disposals.iter().map(|(s, n)| (s.to_string(), json!(n))).collect();
      let out = json!({
        "requests":  requests,
        "disposals": disposals,
        "channels":  stats.channels,
      });
      println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Command::List { table } => {
      for r in open_ledger(&cfg)?.list(table)? {
        println!(
          "{:>6} {} {:<10} p={:<3} {} {}",
          r.id.unwrap_or_default(),
          r.uuid,
          r.disposition,
          r.priority,
          r.topic,
          r.provider,
        );
      }
    }
    Command::Gc => {
      let report = open_ledger(&cfg)?.garbage_collect(Utc::now())?;
      tracing::info!(requests = report.requests, disposals = report.disposals, "garbage collected");
    }
    Command::Repair { channel } => {
      let store = open_ledger(&cfg)?;
      store.upsert_channel(&channel, ChannelChange::Repair.resulting_state())?;
      let reset = store.repair_by_channel(&channel)?;
      tracing::info!(%channel, reset, "channel repaired");
    }
    Command::Purge { table } => {
      let removed = open_ledger(&cfg)?.purge(table)?;
      tracing::info!(%table, removed, "purged");
    }
  }

  Ok(())
}

fn open_ledger(cfg: &DistributorConfig) -> anyhow::Result<DistributorStore> {
  DistributorStore::open_or_recover(&cfg.store_path)
    .with_context(|| format!("failed to open ledger at {:?}", cfg.store_path))
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
