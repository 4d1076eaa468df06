//! Andamio indexer process
//! Wires the chain-sync client, ingest pipeline, housekeeping and REST API
//! over one pair of stores.

use andamio_common::configuration::IndexerConfig;
#[cfg(unix)]
use andamio_module_chain_sync::NodeUtxoSource;
use andamio_module_chain_sync::{
    resolver::DEFAULT_RECENT_OUTPUTS, BlobUtxoSource, PeerChainSync, PeerConfig, UtxoResolver,
};
use andamio_module_rest_api::ApiState;
use andamio_module_tx_indexer::{IngestPipeline, RelevanceCache};
use andamio_module_tx_store::{
    housekeeping::{self, HousekeepingConfig},
    Database,
};
use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use std::{process::ExitCode, sync::Arc, time::Duration};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,fjall=warn,sqlx=warn";

#[derive(Debug, clap::Parser)]
#[command(version, about = "Indexes Andamio platform transactions from a Cardano node")]
struct Args {
    /// Configuration file; later files override earlier ones
    #[arg(long, value_name = "PATH", default_values_t = vec!["indexer.toml".to_string()])]
    config: Vec<String>,

    /// Open the stores, apply schema migrations and exit
    #[arg(long)]
    migrate_only: bool,
}

/// Built-in defaults, then `files` in order, then `ANDAMIO_*` variables
/// (`ANDAMIO_NETWORK__MAGIC=1` sets `network.magic`)
fn load_config(files: &[String]) -> Result<IndexerConfig> {
    let mut builder = Config::builder();
    for file in files {
        builder = builder.add_source(File::with_name(file));
    }
    let config = builder
        .add_source(
            Environment::with_prefix("ANDAMIO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Cannot read configuration")?;
    IndexerConfig::try_load(&config).context("Invalid configuration")
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Cannot install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => result.context("Cannot install SIGINT handler")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await.context("Cannot install Ctrl+C handler")?;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args.config)?;
    let db = Database::open(&config.database.database_dir)
        .await
        .with_context(|| format!("Cannot open stores in {}", config.database.database_dir.display()))?;

    if args.migrate_only {
        info!("Schema is up to date");
        db.close().await?;
        return Ok(());
    }

    let intercept = config.indexer.intercept_point()?;
    let cache = Arc::new(RelevanceCache::load(db.clone(), config.andamio.clone()).await?);

    let mut resolver = UtxoResolver::new(DEFAULT_RECENT_OUTPUTS)
        .with_source(BlobUtxoSource::new(db.blob().clone()));
    match &config.network.node_socket_path {
        #[cfg(unix)]
        Some(socket) => {
            resolver = resolver.with_source(NodeUtxoSource::new(socket, config.network.magic));
        }
        #[cfg(not(unix))]
        Some(_) => warn!("network.nodeSocketPath is only supported on unix"),
        None => warn!("network.nodeSocketPath is not set; inputs the indexer never stored stay unresolved"),
    }
    let source = PeerChainSync::new(PeerConfig::from(&config.network), resolver);
    info!(
        endpoint = %config.network.local_cardano_node_endpoint,
        magic = config.network.magic,
        "Starting indexer"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = IngestPipeline::new(
        db.clone(),
        Box::new(source),
        cache.clone(),
        config.indexer.transaction_cache_limit,
        intercept,
    );
    let mut pipeline_task = tokio::spawn(pipeline.run(shutdown_rx.clone()));

    let housekeeping_task = tokio::spawn(housekeeping::run(
        db.clone(),
        HousekeepingConfig {
            interval: Duration::from_secs(config.database.housekeeping_interval_secs.max(1)),
            prune_after_slots: config.database.prune_after_slots,
        },
        shutdown_rx.clone(),
    ));

    let state = ApiState::new(
        db.clone(),
        cache,
        config.api.clone(),
        config.andamio.addresses.clone(),
    );
    let mut api_task = tokio::spawn(andamio_module_rest_api::serve(state, shutdown_rx));

    let mut pipeline_done = None;
    let mut api_done = None;
    tokio::select! {
        signalled = shutdown_signal() => match signalled {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("{e:#}"),
        },
        result = &mut pipeline_task => pipeline_done = Some(result),
        result = &mut api_task => api_done = Some(result),
    }
    let _ = shutdown_tx.send(true);

    let pipeline_result = match pipeline_done {
        Some(result) => result,
        None => pipeline_task.await,
    };
    let api_result = match api_done {
        Some(result) => result,
        None => api_task.await,
    };
    if let Err(e) = housekeeping_task.await {
        warn!("Housekeeping task failed: {e}");
    }

    db.close().await.context("Cannot close stores")?;
    info!("Stores closed");

    pipeline_result.context("Ingest task panicked")?.context("Ingest pipeline failed")?;
    api_result.context("REST task panicked")??;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_repeated_config_flags() {
        let args = Args::try_parse_from([
            "andamio-indexer",
            "--config",
            "base.toml",
            "--config",
            "local.toml",
            "--migrate-only",
        ])
        .unwrap();
        assert_eq!(args.config, vec!["base.toml", "local.toml"]);
        assert!(args.migrate_only);

        let args = Args::try_parse_from(["andamio-indexer"]).unwrap();
        assert_eq!(args.config, vec!["indexer.toml"]);
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let base = toml_file(
            r#"
            [network]
            magic = 1
            localCardanoNodeEndpoint = "relay-a.example:3001"

            [indexer]
            trancactionCacheLimit = 50
            "#,
        );
        let local = toml_file(
            r#"
            [network]
            localCardanoNodeEndpoint = "relay-b.example:3001"
            "#,
        );
        let files = [&base, &local].map(|f| f.path().to_string_lossy().into_owned());
        let config = load_config(&files).unwrap();
        assert_eq!(config.network.magic, 1);
        assert_eq!(config.network.local_cardano_node_endpoint, "relay-b.example:3001");
        assert_eq!(config.indexer.transaction_cache_limit, 50);
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let file = toml_file("[network]\nmagic = 2\n");
        let files = [file.path().to_string_lossy().into_owned()];
        assert!(load_config(&files).is_err());
    }
}
