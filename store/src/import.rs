//! One-shot import of the legacy file-backed datastore.
//!
//! The previous deployment kept its state in a flat JSON file. On first
//! startup against that file, every row is imported inside a single
//! transaction and the file is renamed with an `.imported` suffix; any
//! failure aborts startup with nothing committed.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDateTime;
use serde::Deserialize;

use tngate_chain::Chain;

use crate::{Direction, ErrorReason, Storage, TunnelStatus};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
struct LegacyState {
    #[serde(default)]
    heights: BTreeMap<String, u64>,
    #[serde(default)]
    tunnels: Vec<LegacyTunnel>,
    #[serde(default)]
    executed: Vec<LegacyExecuted>,
    #[serde(default)]
    errors: Vec<LegacyError>,
}

#[derive(Deserialize)]
struct LegacyTunnel {
    source_address: String,
    target_address: String,
    status: TunnelStatus,
}

#[derive(Deserialize)]
struct LegacyExecuted {
    source_address: String,
    target_address: String,
    outbound_txid: String,
    inbound_txid: String,
    amount: f64,
    fee: f64,
    direction: Direction,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct LegacyError {
    #[serde(default)]
    source_address: String,
    #[serde(default)]
    target_address: String,
    #[serde(default)]
    inbound_txid: String,
    #[serde(default)]
    outbound_txid: String,
    #[serde(default)]
    amount: f64,
    reason: ErrorReason,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    timestamp: Option<String>,
}

fn parse_timestamp(raw: &Option<String>) -> anyhow::Result<NaiveDateTime> {
    match raw {
        Some(s) => NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid legacy timestamp {}", s)),
        None => Ok(chrono::Utc::now().naive_utc()),
    }
}

impl Storage {
    /// Import the legacy datastore at `path` if it exists. Returns whether
    /// an import ran. The insert set is conflict-ignoring, so a crash
    /// between commit and rename re-runs harmlessly.
    pub async fn import_legacy(&self, path: impl AsRef<Path>) -> anyhow::Result<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        tracing::info!(path = %path.display(), "importing legacy datastore");

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading legacy datastore {}", path.display()))?;
        let state: LegacyState =
            serde_json::from_str(&raw).context("parsing legacy datastore")?;

        let mut tx = self.pool.begin().await?;

        for (chain, height) in &state.heights {
            // reject unknown chain identifiers before anything lands
            let chain: Chain = chain.parse()?;
            sqlx::query("INSERT OR IGNORE INTO heights (chain, height) VALUES (?, ?)")
                .bind(chain.as_str())
                .bind(*height as i64)
                .execute(&mut *tx)
                .await?;
        }

        let now = chrono::Utc::now().naive_utc();
        for tunnel in &state.tunnels {
            sqlx::query(
                "INSERT OR IGNORE INTO tunnels
                     (source_address, target_address, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&tunnel.source_address)
            .bind(&tunnel.target_address)
            .bind(tunnel.status)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for executed in &state.executed {
            let timestamp = parse_timestamp(&executed.timestamp)?;
            sqlx::query(
                "INSERT OR IGNORE INTO executed
                     (source_address, target_address, outbound_txid, inbound_txid,
                      amount, fee, direction, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&executed.source_address)
            .bind(&executed.target_address)
            .bind(&executed.outbound_txid)
            .bind(&executed.inbound_txid)
            .bind(executed.amount)
            .bind(executed.fee)
            .bind(executed.direction)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
        }

        for error in &state.errors {
            let timestamp = parse_timestamp(&error.timestamp)?;
            sqlx::query(
                "INSERT INTO errors
                     (source_address, target_address, inbound_txid, outbound_txid,
                      amount, reason, detail, timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&error.source_address)
            .bind(&error.target_address)
            .bind(&error.inbound_txid)
            .bind(&error.outbound_txid)
            .bind(error.amount)
            .bind(error.reason)
            .bind(&error.detail)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let renamed = format!("{}.imported", path.display());
        std::fs::rename(path, &renamed)
            .with_context(|| format!("renaming legacy datastore to {}", renamed))?;
        tracing::info!(%renamed, "legacy import complete");
        Ok(true)
    }
}
