//! Chain access for the gateway: the RPC contract both watchers program
//! against, plus the concrete TN and Other clients.
//!
//! The gateway never holds chain state in memory; clients are thin,
//! long-lived HTTP handles constructed once at startup and shared by the
//! watchers, the verifier and the controller.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;

pub mod mock;
pub mod other;
pub mod tn;

pub use other::OtherClient;
pub use tn::TnClient;

/// Identifier of one side of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    /// The token-issuing chain.
    Tn,
    /// The counterpart chain (EVM-style).
    Other,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Tn => "TN",
            Chain::Other => "Other",
        }
    }

    pub fn opposite(&self) -> Chain {
        match self {
            Chain::Tn => Chain::Other,
            Chain::Other => Chain::Tn,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TN" => Ok(Chain::Tn),
            "Other" => Ok(Chain::Other),
            other => Err(anyhow!("unknown chain identifier {}", other)),
        }
    }
}

/// A transaction as seen by a watcher: enough to recognize a deposit and
/// drive the outbound send. `amount` is in raw chain units.
#[derive(Debug, Clone)]
pub struct ChainTx {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: u128,
    pub attachment: Option<String>,
}

/// One scanned block.
#[derive(Debug, Clone)]
pub struct Block {
    pub height: u64,
    pub transactions: Vec<ChainTx>,
}

/// Result of an outbound submission.
///
/// A transport-level failure is an `Err` from [`ChainClient::send_tx`]
/// instead: the caller cannot know whether the transaction reached the
/// network, so it must not be treated as a clean rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { txid: String },
    Rejected { reason: String },
}

/// Target extraction from a deposit's memo, chain-specific.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// The transaction carried a decodable target address.
    Target(String),
    /// No memo on the transaction.
    Missing,
}

/// The RPC operations the gateway requires of each chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Which side of the gateway this client talks to.
    fn chain(&self) -> Chain;

    /// Current tip height.
    async fn current_block(&self) -> anyhow::Result<u64>;

    /// Gateway wallet balance in raw units.
    async fn current_balance(&self) -> anyhow::Result<u128>;

    /// Fetch a block with its transactions.
    async fn get_block(&self, height: u64) -> anyhow::Result<Block>;

    /// Whether `address` is well-formed for this chain.
    fn validate_address(&self, address: &str) -> bool;

    /// Canonical form of `address` (checksum/case). Identity on chains
    /// without a canonical casing.
    fn normalize_address(&self, address: &str) -> String;

    /// Issue a fresh deposit address owned by the gateway wallet.
    async fn get_new_address(&self) -> anyhow::Result<String>;

    /// Submit an outbound transfer of `amount` (decimal units, fees already
    /// deducted) to `to`.
    async fn send_tx(&self, to: &str, amount: f64) -> anyhow::Result<SendOutcome>;

    /// Decode the target address attached to a deposit, if the chain
    /// carries one.
    fn attached_target(&self, tx: &ChainTx) -> Attachment;

    /// Inclusion height of `txid`, or `None` while unmined.
    async fn find_tx_height(&self, txid: &str) -> anyhow::Result<Option<u64>>;
}

/// Convert a decimal amount to raw chain units.
pub fn to_raw_units(amount: f64, decimals: u32) -> u128 {
    (amount * 10f64.powi(decimals as i32)).round() as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_identifiers_round_trip() {
        for chain in [Chain::Tn, Chain::Other] {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert!("DCC".parse::<Chain>().is_err());
    }

    #[test]
    fn opposite_is_involutive() {
        assert_eq!(Chain::Tn.opposite(), Chain::Other);
        assert_eq!(Chain::Other.opposite().opposite(), Chain::Other);
    }

    #[test]
    fn raw_unit_conversion() {
        assert_eq!(to_raw_units(1.0, 6), 1_000_000);
        assert_eq!(to_raw_units(0.89, 6), 890_000);
        assert_eq!(to_raw_units(2.5, 18), 2_500_000_000_000_000_000);
    }
}
