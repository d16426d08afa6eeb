//! The generic block watcher. Two instances run concurrently, one per
//! chain, sharing nothing but the [`Storage`].

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use tngate_chain::{Attachment, Chain, ChainClient, ChainTx, SendOutcome};
use tngate_store::{Direction, ErrorReason, Storage, TunnelStatus};

use crate::policy::{self, AmountLimits, SideFees};
use crate::verifier::Verifier;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Inbound side of this instance.
    pub chain: Chain,
    pub direction: Direction,
    /// Custodial address deposits are sent to on the inbound chain.
    pub gateway_address: String,
    /// Confirmation depth before a block is considered final.
    pub confirmations: u64,
    /// Sleep between ticks when caught up.
    pub tick: Duration,
    /// Decimals of the inbound asset.
    pub decimals: u32,
    pub limits: AmountLimits,
    /// Fees charged on the destination side.
    pub destination_fees: SideFees,
}

pub struct Watcher {
    inbound: Arc<dyn ChainClient>,
    outbound: Arc<dyn ChainClient>,
    storage: Storage,
    verifier: Verifier,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(
        inbound: Arc<dyn ChainClient>,
        outbound: Arc<dyn ChainClient>,
        storage: Storage,
        verifier: Verifier,
        config: WatcherConfig,
    ) -> Self {
        Self {
            inbound,
            outbound,
            storage,
            verifier,
            config,
        }
    }

    /// Scan loop. Blocks are processed in strictly ascending order and the
    /// persisted cursor only advances after a block's side effects are
    /// durable; on any failure the same block is re-attempted next tick,
    /// which the per-transaction idempotence makes safe.
    #[instrument(skip_all, fields(chain = %self.config.chain))]
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut last_scanned = match self.storage.get_height(self.config.chain).await? {
            Some(height) => height,
            None => {
                let tip = self.inbound.current_block().await?;
                self.storage.ensure_height(self.config.chain, tip).await?;
                tip
            }
        };
        tracing::info!(last_scanned, "watcher started");

        while !shutdown.is_cancelled() {
            match self.tick(&mut last_scanned).await {
                // keep draining the backlog without sleeping
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(block = last_scanned + 1, "block iteration failed: {:#}", e);
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick) => {}
            }
        }
        tracing::info!("watcher stopped");
        Ok(())
    }

    /// One iteration; returns whether a block was processed.
    pub(crate) async fn tick(&self, last_scanned: &mut u64) -> anyhow::Result<bool> {
        let tip = self.inbound.current_block().await?;
        let next = *last_scanned + 1;
        if tip.saturating_sub(self.config.confirmations) < next {
            return Ok(false);
        }

        self.process_block(next).await?;
        self.storage.set_height(self.config.chain, next).await?;
        *last_scanned = next;
        Ok(true)
    }

    /// Handle every deposit in block `height`. Per-transaction problems are
    /// recorded and do not fail the block; only infrastructure errors
    /// propagate (and leave the cursor untouched).
    pub(crate) async fn process_block(&self, height: u64) -> anyhow::Result<()> {
        let block = self.inbound.get_block(height).await?;
        tracing::debug!(height, transactions = block.transactions.len(), "scanning block");

        for tx in &block.transactions {
            if tx.recipient == self.config.gateway_address {
                match self.inbound.attached_target(tx) {
                    Attachment::Target(raw_target) => {
                        self.handle_deposit(tx, &tx.sender, &raw_target).await?;
                    }
                    Attachment::Missing => {
                        self.fault(tx, "", ErrorReason::NoAttachment, "no attachment found on transaction")
                            .await?;
                    }
                }
            } else if let Some(tunnel) = self.storage.tunnel_by_source(&tx.recipient).await? {
                // deposit into a gateway-issued address; the registry
                // supplies the target
                self.handle_deposit(tx, &tx.recipient, &tunnel.target_address)
                    .await?;
            }
        }

        counter!("gateway_blocks_scanned", "chain" => self.config.chain.as_str()).increment(1);
        Ok(())
    }

    async fn handle_deposit(
        &self,
        tx: &ChainTx,
        source: &str,
        raw_target: &str,
    ) -> anyhow::Result<()> {
        let amount = policy::decimal_amount(tx.amount, self.config.decimals);

        if !self.outbound.validate_address(raw_target) {
            return self
                .fault(tx, raw_target, ErrorReason::TxError, "tx error, possible incorrect address")
                .await;
        }
        let target = self.outbound.normalize_address(raw_target);

        if !self.config.limits.contains(amount) {
            return self
                .fault(tx, &target, ErrorReason::SendError, "outside amount ranges")
                .await;
        }

        // Exactly-once: a re-scanned block re-delivers the same inbound
        // txid and must not trigger a second send.
        if self
            .storage
            .executed_exists(self.config.direction, &tx.id)
            .await?
        {
            tracing::debug!(inbound = %tx.id, "inbound tx already executed, skipping");
            return Ok(());
        }

        if !self.begin_sending(tx, source, &target).await? {
            return Ok(());
        }

        let credited = policy::credited(amount, &self.config.destination_fees);
        match self.outbound.send_tx(&target, credited).await {
            Ok(SendOutcome::Accepted { txid }) => {
                tracing::info!(
                    inbound = %tx.id,
                    outbound = %txid,
                    amount,
                    credited,
                    "outbound transfer submitted"
                );
                self.storage
                    .insert_executed(
                        source,
                        &target,
                        &txid,
                        &tx.id,
                        amount,
                        self.config.destination_fees.total(),
                        self.config.direction,
                    )
                    .await?;
                self.storage
                    .update_tunnel_status(source, &target, TunnelStatus::Verifying, TunnelStatus::Sending)
                    .await?;
                self.storage
                    .enqueue_verify(&txid, self.config.direction, source, &target)
                    .await?;
                counter!("gateway_transfers_sent", "direction" => self.config.direction.as_str())
                    .increment(1);

                // first confirmation check inline; almost always still
                // pending, the controller re-drives from here
                self.verifier.check(&txid, self.config.direction).await?;
            }
            Ok(SendOutcome::Rejected { reason }) => {
                tracing::error!(inbound = %tx.id, %reason, "outbound submission rejected");
                self.storage
                    .insert_error(source, &target, &tx.id, "", amount, ErrorReason::SendError, &reason)
                    .await?;
                self.storage
                    .update_tunnel_status(source, &target, TunnelStatus::Error, TunnelStatus::Sending)
                    .await?;
                counter!("gateway_send_failures", "direction" => self.config.direction.as_str())
                    .increment(1);
            }
            Err(e) => {
                // The submission raised without a txid: it may or may not
                // have reached the network, so an operator has to look.
                tracing::error!(inbound = %tx.id, "outbound submission failed: {:#}", e);
                self.storage
                    .insert_error(
                        source,
                        &target,
                        &tx.id,
                        "",
                        amount,
                        ErrorReason::Manual,
                        "tx failed to send - manual intervention required",
                    )
                    .await?;
                self.storage
                    .update_tunnel_status(source, &target, TunnelStatus::Error, TunnelStatus::Sending)
                    .await?;
                counter!("gateway_send_failures", "direction" => self.config.direction.as_str())
                    .increment(1);
            }
        }
        Ok(())
    }

    /// Move the tunnel for this pair into `sending`. Returns false when the
    /// deposit must be skipped: the pair already has a transfer in flight
    /// or completed (re-scanned block).
    async fn begin_sending(&self, tx: &ChainTx, source: &str, target: &str) -> anyhow::Result<bool> {
        let Some(tunnel) = self.storage.tunnel_by_source(source).await? else {
            self.storage
                .insert_tunnel(TunnelStatus::Sending, source, target)
                .await?;
            return Ok(true);
        };

        if tunnel.target_address != target {
            // the depositor attached a different target than the bound one
            return match tunnel.status {
                TunnelStatus::Sending | TunnelStatus::Verifying => Ok(false),
                _ => match self.storage.repoint_tunnel(source, target).await {
                    Ok(applied) => Ok(applied),
                    Err(_) => {
                        self.fault(
                            tx,
                            target,
                            ErrorReason::TxError,
                            "target address already bound to another tunnel",
                        )
                        .await?;
                        Ok(false)
                    }
                },
            };
        }

        match tunnel.status {
            TunnelStatus::Created => {
                self.storage
                    .update_tunnel_status(source, target, TunnelStatus::Sending, TunnelStatus::Created)
                    .await
            }
            // a re-scan after `sendlost` re-submits
            TunnelStatus::Error => {
                self.storage
                    .update_tunnel_status(source, target, TunnelStatus::Sending, TunnelStatus::Error)
                    .await
            }
            // crashed mid-send last time; retry
            TunnelStatus::Sending => Ok(true),
            // transfer in flight or completed for this pair
            TunnelStatus::Verifying | TunnelStatus::Verified => {
                tracing::debug!(source, target, status = %tunnel.status, "tunnel busy, skipping deposit");
                Ok(false)
            }
        }
    }

    /// Record a rejected deposit in the operator error log.
    async fn fault(
        &self,
        tx: &ChainTx,
        target: &str,
        reason: ErrorReason,
        detail: &str,
    ) -> anyhow::Result<()> {
        let amount = policy::decimal_amount(tx.amount, self.config.decimals);
        tracing::error!(
            inbound = %tx.id,
            sender = %tx.sender,
            %reason,
            "deposit rejected: {}",
            detail
        );
        counter!("gateway_deposit_faults", "reason" => reason.as_str()).increment(1);
        self.storage
            .insert_error(&tx.sender, target, &tx.id, "", amount, reason, detail)
            .await
    }
}
