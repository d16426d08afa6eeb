//! Row types shared by the watchers, the verifier, the controller and the
//! HTTP façade.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Tunnel lifecycle. Transitions only move forward, with two exceptions:
/// the controller's `error -> verifying` self-heal and the watcher's
/// `error -> sending` re-scan retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Created,
    Sending,
    Verifying,
    Verified,
    Error,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Created => "created",
            TunnelStatus::Sending => "sending",
            TunnelStatus::Verifying => "verifying",
            TunnelStatus::Verified => "verified",
            TunnelStatus::Error => "error",
        }
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TunnelStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TunnelStatus::Created),
            "sending" => Ok(TunnelStatus::Sending),
            "verifying" => Ok(TunnelStatus::Verifying),
            "verified" => Ok(TunnelStatus::Verified),
            "error" => Ok(TunnelStatus::Error),
            other => Err(anyhow!("unknown tunnel status {}", other)),
        }
    }
}

/// Transfer direction; keys the exactly-once constraint together with the
/// inbound txid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tn2Other,
    Other2Tn,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Tn2Other => "tn2other",
            Direction::Other2Tn => "other2tn",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tn2other" => Ok(Direction::Tn2Other),
            "other2tn" => Ok(Direction::Other2Tn),
            other => Err(anyhow!("unknown direction {}", other)),
        }
    }
}

/// Operator-visible error taxonomy, stored in `errors.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ErrorReason {
    /// Deposit without a memo/target.
    NoAttachment,
    /// Malformed or unroutable target address.
    TxError,
    /// Chain-level rejection or amount outside bounds.
    SendError,
    /// Tunnel stuck in `sending` with no executed row.
    SendLost,
    /// Ambiguous submission or exhausted verification; operator action
    /// required.
    Manual,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::NoAttachment => "noattachment",
            ErrorReason::TxError => "txerror",
            ErrorReason::SendError => "senderror",
            ErrorReason::SendLost => "sendlost",
            ErrorReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TunnelRecord {
    pub source_address: String,
    pub target_address: String,
    pub status: TunnelStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutedRecord {
    pub id: i64,
    pub source_address: String,
    pub target_address: String,
    pub outbound_txid: String,
    pub inbound_txid: String,
    pub amount: f64,
    pub fee: f64,
    pub direction: Direction,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerifyRecord {
    pub outbound_txid: String,
    pub direction: Direction,
    pub source_address: String,
    pub target_address: String,
    pub attempts: i64,
    pub last_checked_height: i64,
    pub last_checked_at: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerifiedRecord {
    pub outbound_txid: String,
    pub direction: Direction,
    pub height: i64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ErrorRecord {
    pub id: i64,
    pub source_address: String,
    pub target_address: String,
    pub inbound_txid: String,
    pub outbound_txid: String,
    pub amount: f64,
    pub reason: ErrorReason,
    pub detail: String,
    pub timestamp: NaiveDateTime,
}
