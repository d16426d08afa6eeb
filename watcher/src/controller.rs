//! Periodic reconciler: re-drives verification, recovers stuck transfers
//! and publishes gateway health.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use tngate_chain::{Chain, ChainClient};
use tngate_store::{ErrorReason, Storage, TunnelStatus};

use crate::verifier::Verifier;

/// Last observed operational state, published every controller tick and
/// read by the HTTP façade.
#[derive(Debug, Clone, Default)]
pub struct HealthSnapshot {
    pub connection_tn: bool,
    pub connection_other: bool,
    pub blocks_behind_tn: i64,
    pub blocks_behind_other: i64,
    pub balance_tn: f64,
    pub balance_other: f64,
    pub number_errors: u64,
    pub updated_at: Option<NaiveDateTime>,
}

impl HealthSnapshot {
    pub fn is_ok(&self) -> bool {
        self.connection_tn && self.connection_other
    }
}

pub type SharedHealth = Arc<Mutex<HealthSnapshot>>;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Time between reconciliation passes.
    pub interval: Duration,
    /// Age after which a `sending` tunnel with no executed row is lost.
    pub sending_timeout: Duration,
    /// Re-check grace: pending verifications checked within this window
    /// are left alone.
    pub recheck_grace: Duration,
    pub tn_decimals: u32,
    pub other_decimals: u32,
}

pub struct Controller {
    storage: Storage,
    tn: Arc<dyn ChainClient>,
    other: Arc<dyn ChainClient>,
    verifier: Verifier,
    config: ControllerConfig,
    health: SharedHealth,
}

impl Controller {
    pub fn new(
        storage: Storage,
        tn: Arc<dyn ChainClient>,
        other: Arc<dyn ChainClient>,
        verifier: Verifier,
        config: ControllerConfig,
        health: SharedHealth,
    ) -> Self {
        Self {
            storage,
            tn,
            other,
            verifier,
            config,
            health,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!("controller started");
        while !shutdown.is_cancelled() {
            if let Err(e) = self.tick().await {
                tracing::warn!("controller pass failed: {:#}", e);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        tracing::info!("controller stopped");
        Ok(())
    }

    pub(crate) async fn tick(&self) -> anyhow::Result<()> {
        self.drive_verification().await?;
        self.sweep_stuck_sending().await?;
        self.heal_errored_tunnels().await?;
        self.publish_health().await;
        Ok(())
    }

    /// Re-check every pending outbound tx that has not been looked at
    /// recently. Row-level failures are logged and do not stop the pass.
    async fn drive_verification(&self) -> anyhow::Result<()> {
        let grace = chrono::Duration::from_std(self.config.recheck_grace)?;
        let pending = self
            .storage
            .list_pending_verify(Utc::now().naive_utc() - grace)
            .await?;
        for entry in pending {
            if let Err(e) = self
                .verifier
                .check(&entry.outbound_txid, entry.direction)
                .await
            {
                tracing::warn!(
                    outbound = %entry.outbound_txid,
                    "verification check failed: {:#}",
                    e
                );
            }
        }
        Ok(())
    }

    /// A tunnel that has sat in `sending` past the timeout with no executed
    /// row means the send never happened (crash between the status write
    /// and the submission). Surface it; a block re-scan re-submits.
    async fn sweep_stuck_sending(&self) -> anyhow::Result<()> {
        let timeout = chrono::Duration::from_std(self.config.sending_timeout)?;
        let cutoff = Utc::now().naive_utc() - timeout;
        for tunnel in self.storage.tunnels_sending_older_than(cutoff).await? {
            if self
                .storage
                .latest_executed_for_pair(&tunnel.source_address, &tunnel.target_address)
                .await?
                .is_some()
            {
                continue;
            }
            tracing::error!(
                source = %tunnel.source_address,
                target = %tunnel.target_address,
                "tunnel stuck in sending with no executed transfer"
            );
            if self
                .storage
                .update_tunnel_status(
                    &tunnel.source_address,
                    &tunnel.target_address,
                    TunnelStatus::Error,
                    TunnelStatus::Sending,
                )
                .await?
            {
                self.storage
                    .insert_error(
                        &tunnel.source_address,
                        &tunnel.target_address,
                        "",
                        "",
                        0.0,
                        ErrorReason::SendLost,
                        "send lost",
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Self-heal: an errored tunnel whose outbound tx later shows up
    /// on-chain goes back into verification.
    async fn heal_errored_tunnels(&self) -> anyhow::Result<()> {
        for tunnel in self.storage.tunnels_in_error().await? {
            let Some(executed) = self
                .storage
                .latest_executed_for_pair(&tunnel.source_address, &tunnel.target_address)
                .await?
            else {
                continue;
            };
            let client = match executed.direction {
                tngate_store::Direction::Tn2Other => &self.other,
                tngate_store::Direction::Other2Tn => &self.tn,
            };
            match client.find_tx_height(&executed.outbound_txid).await {
                Ok(Some(_)) => {
                    if self
                        .storage
                        .update_tunnel_status(
                            &tunnel.source_address,
                            &tunnel.target_address,
                            TunnelStatus::Verifying,
                            TunnelStatus::Error,
                        )
                        .await?
                    {
                        tracing::info!(
                            outbound = %executed.outbound_txid,
                            "errored tunnel's outbound tx found on-chain, re-verifying"
                        );
                        self.storage
                            .enqueue_verify(
                                &executed.outbound_txid,
                                executed.direction,
                                &tunnel.source_address,
                                &tunnel.target_address,
                            )
                            .await?;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        outbound = %executed.outbound_txid,
                        "self-heal lookup failed: {:#}",
                        e
                    );
                }
            }
        }
        Ok(())
    }

    async fn publish_health(&self) {
        let (connection_tn, tn_tip) = match self.tn.current_block().await {
            Ok(tip) => (true, tip as i64),
            Err(e) => {
                tracing::warn!("TN node unreachable: {:#}", e);
                (false, 0)
            }
        };
        let (connection_other, other_tip) = match self.other.current_block().await {
            Ok(tip) => (true, tip as i64),
            Err(e) => {
                tracing::warn!("Other node unreachable: {:#}", e);
                (false, 0)
            }
        };

        let tn_height = self
            .storage
            .get_height(Chain::Tn)
            .await
            .ok()
            .flatten()
            .unwrap_or_default() as i64;
        let other_height = self
            .storage
            .get_height(Chain::Other)
            .await
            .ok()
            .flatten()
            .unwrap_or_default() as i64;

        let balance_tn = match self.tn.current_balance().await {
            Ok(raw) => crate::policy::decimal_amount(raw, self.config.tn_decimals),
            Err(_) => 0.0,
        };
        let balance_other = match self.other.current_balance().await {
            Ok(raw) => crate::policy::decimal_amount(raw, self.config.other_decimals),
            Err(_) => 0.0,
        };

        let number_errors = self.storage.error_count().await.unwrap_or_default();

        let snapshot = HealthSnapshot {
            connection_tn,
            connection_other,
            blocks_behind_tn: (tn_tip - tn_height).max(0),
            blocks_behind_other: (other_tip - other_height).max(0),
            balance_tn,
            balance_other,
            number_errors,
            updated_at: Some(Utc::now().naive_utc()),
        };

        gauge!("gateway_blocks_behind", "chain" => Chain::Tn.as_str())
            .set(snapshot.blocks_behind_tn as f64);
        gauge!("gateway_blocks_behind", "chain" => Chain::Other.as_str())
            .set(snapshot.blocks_behind_other as f64);
        gauge!("gateway_wallet_balance", "chain" => Chain::Tn.as_str()).set(balance_tn);
        gauge!("gateway_wallet_balance", "chain" => Chain::Other.as_str()).set(balance_other);

        *self.health.lock() = snapshot;
    }
}
