//! harvestd: runs the mode-resolution engine against the real attribution
//! and decision services.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! state store, then feeds newline-delimited JSON signals from stdin into the
//! engine. Every published presentation is printed to stdout as one JSON
//! line; logs go to stderr.
//!
//! ```text
//! {"type":"conversion","data":{"af_status":"Non-organic"}}
//! {"type":"deep_link_found","data":{"deep_link_value":"promo"}}
//! {"type":"connectivity_lost"}
//! {"type":"push_payload","data":{"url":"https://example.com/offer"}}
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use harvest_cli::{CollectorInput, HarvestConfig, Input};
use harvest_engine::{AttributionCollector, EngineHandle, Orchestrator};
use harvest_fetch::{AttributionClient, DecisionClient};
use harvest_store_sqlite::SqliteStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Harvest mode-resolution engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Override the state database path from the config file.
  #[arg(long, env = "HARVEST_STORE")]
  store: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Stdout carries presentations, so logs go to stderr.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("HARVEST").separator("__"))
    .build()
    .context("failed to read config file")?;

  let mut harvest_cfg: HarvestConfig = settings
    .try_deserialize()
    .context("failed to deserialise HarvestConfig")?;
  if let Some(store) = cli.store {
    harvest_cfg.store_path = store;
  }

  let store_path = expand_tilde(&harvest_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let attribution = AttributionClient::new(harvest_cfg.attribution.clone())
    .context("failed to build attribution client")?;
  let decision = DecisionClient::new(harvest_cfg.decision.clone())
    .context("failed to build decision client")?;

  let engine_cfg = harvest_cfg.engine_config();
  let combine_window = engine_cfg.timings.combine_window;
  let (orchestrator, handle) = Orchestrator::new(
    Arc::clone(&store),
    Arc::new(attribution),
    Arc::new(decision),
    engine_cfg,
  );
  let engine = orchestrator.spawn();
  let collector = AttributionCollector::new(store, handle.clone(), combine_window);
  let printer = tokio::spawn(print_presentations(handle.clone()));

  tracing::info!(store = ?store_path, "engine running; reading signals from stdin");
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    let line = tokio::select! {
      line = lines.next_line() => line.context("failed to read stdin")?,
      _ = tokio::signal::ctrl_c() => {
        tracing::info!("interrupted");
        None
      }
    };
    let Some(line) = line else { break };
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    match serde_json::from_str::<Input>(line) {
      Ok(input) => dispatch(&handle, &collector, input).await?,
      Err(e) => tracing::warn!(error = %e, "ignoring malformed input line"),
    }
  }

  // Let in-flight fetches and timers finish before exiting.
  drop(collector);
  drop(handle);
  engine.await.context("engine task panicked")?;
  printer.await.context("printer task panicked")?;
  Ok(())
}

async fn dispatch(
  handle: &EngineHandle,
  collector: &AttributionCollector<SqliteStore>,
  input: Input,
) -> anyhow::Result<()> {
  match input {
    Input::Signal(signal) => handle.send(signal)?,
    Input::Collector(CollectorInput::Conversion(record)) => {
      collector.on_conversion_success(record).await
    }
    Input::Collector(CollectorInput::ConversionFailed(reason)) => {
      collector.on_conversion_failure(&reason).await
    }
    Input::Collector(CollectorInput::DeepLinkFound(link)) => {
      collector.on_deep_link(link).await
    }
  }
  Ok(())
}

/// Print the current presentation, then every change, until the engine
/// stops.
async fn print_presentations(handle: EngineHandle) {
  let mut presentations = handle.subscribe();
  drop(handle);
  loop {
    let current = presentations.borrow_and_update().clone();
    match serde_json::to_string(&current) {
      Ok(line) => println!("{line}"),
      Err(e) => tracing::warn!(error = %e, "failed to encode presentation"),
    }
    if presentations.changed().await.is_err() {
      break;
    }
  }
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
