//! Confirmation-depth verification of outbound transfers.

use std::sync::Arc;

use metrics::counter;

use tngate_chain::ChainClient;
use tngate_store::{Direction, ErrorReason, Storage, TunnelStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The outbound tx reached the required depth; the tunnel is done.
    Verified,
    /// Not yet deep enough (or not yet tracked); check again later.
    Pending,
    /// The tx never appeared within the attempt budget.
    Failed,
}

/// Checks an outbound `(txid, direction)` against its destination chain.
/// Driven by the controller, and inline once right after each send.
#[derive(Clone)]
pub struct Verifier {
    storage: Storage,
    tn: Arc<dyn ChainClient>,
    other: Arc<dyn ChainClient>,
    tn_confirmations: u64,
    other_confirmations: u64,
    max_attempts: i64,
}

impl Verifier {
    pub fn new(
        storage: Storage,
        tn: Arc<dyn ChainClient>,
        other: Arc<dyn ChainClient>,
        tn_confirmations: u64,
        other_confirmations: u64,
        max_attempts: i64,
    ) -> Self {
        Self {
            storage,
            tn,
            other,
            tn_confirmations,
            other_confirmations,
            max_attempts,
        }
    }

    /// The chain an outbound transfer of `direction` lands on, and the
    /// depth it must reach there.
    fn outbound_side(&self, direction: Direction) -> (&Arc<dyn ChainClient>, u64) {
        match direction {
            Direction::Tn2Other => (&self.other, self.other_confirmations),
            Direction::Other2Tn => (&self.tn, self.tn_confirmations),
        }
    }

    pub async fn check(
        &self,
        outbound_txid: &str,
        direction: Direction,
    ) -> anyhow::Result<VerifyOutcome> {
        let Some(entry) = self.storage.get_verify(outbound_txid, direction).await? else {
            // not tracked: either already promoted or never enqueued
            return Ok(
                if self.storage.verified_for(outbound_txid, direction).await?.is_some() {
                    VerifyOutcome::Verified
                } else {
                    VerifyOutcome::Pending
                },
            );
        };

        let (client, confirmations) = self.outbound_side(direction);
        let tip = client.current_block().await?;
        let inclusion = client.find_tx_height(outbound_txid).await?;

        match inclusion {
            Some(height) if tip.saturating_sub(height) >= confirmations => {
                tracing::info!(outbound = outbound_txid, height, %direction, "outbound tx verified");
                self.storage
                    .insert_verified(outbound_txid, direction, height)
                    .await?;
                self.storage
                    .update_tunnel_status(
                        &entry.source_address,
                        &entry.target_address,
                        TunnelStatus::Verified,
                        TunnelStatus::Verifying,
                    )
                    .await?;
                self.storage.remove_verify(outbound_txid, direction).await?;
                counter!("gateway_transfers_verified", "direction" => direction.as_str())
                    .increment(1);
                Ok(VerifyOutcome::Verified)
            }
            None if entry.attempts >= self.max_attempts => {
                tracing::error!(
                    outbound = outbound_txid,
                    attempts = entry.attempts,
                    "outbound tx never appeared on-chain"
                );
                let amount = self
                    .storage
                    .executed_by_outbound(outbound_txid, direction)
                    .await?
                    .map(|record| record.amount)
                    .unwrap_or_default();
                self.storage
                    .insert_error(
                        &entry.source_address,
                        &entry.target_address,
                        "",
                        outbound_txid,
                        amount,
                        ErrorReason::Manual,
                        "tx not found",
                    )
                    .await?;
                self.storage
                    .update_tunnel_status(
                        &entry.source_address,
                        &entry.target_address,
                        TunnelStatus::Error,
                        TunnelStatus::Verifying,
                    )
                    .await?;
                self.storage.remove_verify(outbound_txid, direction).await?;
                Ok(VerifyOutcome::Failed)
            }
            _ => {
                self.storage
                    .increment_verify_attempts(outbound_txid, direction, tip)
                    .await?;
                Ok(VerifyOutcome::Pending)
            }
        }
    }
}
