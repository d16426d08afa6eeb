//! Gateway daemon: wires the store, the two chain clients, both watchers,
//! the controller and the HTTP façade together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tngate_chain::{to_raw_units, Chain, ChainClient, OtherClient, TnClient};
use tngate_store::{Direction, Storage};
use tngate_watcher::policy::{AmountLimits, SideFees};
use tngate_watcher::{
    Controller, ControllerConfig, HealthSnapshot, SharedHealth, Verifier, Watcher, WatcherConfig,
};

mod api;
mod config;

use config::GatewayConfig;

#[derive(Debug, Parser)]
#[command(name = "gatewayd", about = "Bidirectional TN <-> Other asset gateway")]
struct Options {
    /// Path to the gateway configuration file.
    #[arg(long, default_value = "config.json")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    let config = Arc::new(GatewayConfig::load(&options.config)?);
    anyhow::ensure!(
        config.main.storage_backend == "sqlite",
        "unsupported storage backend {}",
        config.main.storage_backend
    );

    let storage = Storage::load_or_initialize(&config.main.storage_path).await?;
    if let Some(legacy) = &config.main.legacy_path {
        storage
            .import_legacy(legacy)
            .await
            .context("legacy datastore import failed, refusing to start")?;
    }

    // One long-lived client per chain, shared by every component.
    let tn: Arc<dyn ChainClient> = Arc::new(TnClient::new(
        &config.tn.rpc_endpoint,
        config.tn.rpc_credentials.clone(),
        &config.tn.gateway_address,
        &config.tn.asset_id,
        config.tn.decimals,
        to_raw_units(config.tn.network_fee, config.tn.decimals) as u64,
    )?);
    let other: Arc<dyn ChainClient> = Arc::new(OtherClient::new(
        &config.other.rpc_endpoint,
        config.other.rpc_credentials.clone(),
        &config.other.gateway_address,
        config.other.decimals,
    )?);

    // Seed the scan cursors at the current tips on first start.
    for (chain, client) in [(Chain::Tn, &tn), (Chain::Other, &other)] {
        if storage.get_height(chain).await?.is_none() {
            let tip = client.current_block().await?;
            storage.ensure_height(chain, tip).await?;
            tracing::info!(%chain, tip, "seeded scan cursor");
        }
    }

    let verifier = Verifier::new(
        storage.clone(),
        tn.clone(),
        other.clone(),
        config.tn.confirmations,
        config.other.confirmations,
        config.main.max_verify_attempts,
    );
    let health: SharedHealth = Arc::new(Mutex::new(HealthSnapshot::default()));
    let shutdown = CancellationToken::new();

    let limits = AmountLimits {
        min: config.main.min,
        max: config.main.max,
    };

    let tn_watcher = Watcher::new(
        tn.clone(),
        other.clone(),
        storage.clone(),
        verifier.clone(),
        WatcherConfig {
            chain: Chain::Tn,
            direction: Direction::Tn2Other,
            gateway_address: config.tn.gateway_address.clone(),
            confirmations: config.tn.confirmations,
            tick: Duration::from_secs(config.tn.time_in_between_checks),
            decimals: config.tn.decimals,
            limits,
            destination_fees: SideFees {
                gateway_fee: config.other.gateway_fee,
                network_fee: config.other.network_fee,
            },
        },
    );
    let other_watcher = Watcher::new(
        other.clone(),
        tn.clone(),
        storage.clone(),
        verifier.clone(),
        WatcherConfig {
            chain: Chain::Other,
            direction: Direction::Other2Tn,
            gateway_address: config.other.gateway_address.to_lowercase(),
            confirmations: config.other.confirmations,
            tick: Duration::from_secs(config.other.time_in_between_checks),
            decimals: config.other.decimals,
            limits,
            destination_fees: SideFees {
                gateway_fee: config.tn.gateway_fee,
                network_fee: config.tn.network_fee,
            },
        },
    );
    let controller = Controller::new(
        storage.clone(),
        tn.clone(),
        other.clone(),
        verifier,
        ControllerConfig {
            interval: Duration::from_secs(config.main.controller_interval_secs),
            sending_timeout: Duration::from_secs(config.main.sending_timeout_secs),
            recheck_grace: Duration::from_secs(config.main.controller_interval_secs),
            tn_decimals: config.tn.decimals,
            other_decimals: config.other.decimals,
        },
        health.clone(),
    );

    let tasks = vec![
        tokio::spawn(tn_watcher.run(shutdown.clone())),
        tokio::spawn(other_watcher.run(shutdown.clone())),
        tokio::spawn(controller.run(shutdown.clone())),
    ];

    let state = api::AppState {
        config: config.clone(),
        storage,
        tn,
        other,
        health,
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.main.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, name = %config.main.name, "gateway API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested, finishing current blocks");
                shutdown.cancel();
            }
        })
        .await?;

    // Let each loop finish its current block; partial blocks are never
    // committed.
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("gateway stopped");
    Ok(())
}
