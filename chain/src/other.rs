//! JSON-RPC client for the Other (EVM-style) node.
//!
//! Deposits on this side are plain value transfers into gateway-issued
//! addresses; they carry no memo, so the tunnel registry supplies the
//! target address.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::{Attachment, Block, Chain, ChainClient, ChainTx, SendOutcome};

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address regex"));

#[derive(Debug, Clone)]
pub struct OtherClient {
    http: reqwest::Client,
    endpoint: String,
    gateway_address: String,
    /// Account-unlock secret for `personal_newAccount`.
    account_secret: Option<String>,
    decimals: u32,
}

impl OtherClient {
    pub fn new(
        endpoint: &str,
        account_secret: Option<String>,
        gateway_address: &str,
        decimals: u32,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building Other http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_owned(),
            gateway_address: gateway_address.to_lowercase(),
            account_secret,
            decimals,
        })
    }

    /// One JSON-RPC round trip; node-reported errors become `Err`.
    async fn rpc(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let rsp: Value = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1,
            }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = rsp.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown node error");
            return Err(anyhow!("{} failed: {}", method, message));
        }
        rsp.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{}: response without result", method))
    }

    fn parse_hex_u64(value: &Value) -> anyhow::Result<u64> {
        let s = value
            .as_str()
            .ok_or_else(|| anyhow!("expected hex quantity, got {}", value))?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .with_context(|| format!("parsing hex quantity {}", s))
    }

    fn parse_hex_u128(value: &Value) -> anyhow::Result<u128> {
        let s = value
            .as_str()
            .ok_or_else(|| anyhow!("expected hex quantity, got {}", value))?;
        u128::from_str_radix(s.trim_start_matches("0x"), 16)
            .with_context(|| format!("parsing hex quantity {}", s))
    }
}

#[async_trait]
impl ChainClient for OtherClient {
    fn chain(&self) -> Chain {
        Chain::Other
    }

    async fn current_block(&self) -> anyhow::Result<u64> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        Self::parse_hex_u64(&result)
    }

    async fn current_balance(&self) -> anyhow::Result<u128> {
        let result = self
            .rpc("eth_getBalance", json!([self.gateway_address, "latest"]))
            .await?;
        Self::parse_hex_u128(&result)
    }

    async fn get_block(&self, height: u64) -> anyhow::Result<Block> {
        let result = self
            .rpc(
                "eth_getBlockByNumber",
                json!([format!("{:#x}", height), true]),
            )
            .await?;
        if result.is_null() {
            return Err(anyhow!("block {} not available yet", height));
        }

        let mut transactions = Vec::new();
        for tx in result
            .get("transactions")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default()
        {
            // Contract creations have no recipient and cannot be deposits.
            let Some(to) = tx.get("to").and_then(|t| t.as_str()) else {
                continue;
            };
            let id = tx
                .get("hash")
                .and_then(|h| h.as_str())
                .ok_or_else(|| anyhow!("transaction without hash in block {}", height))?
                .to_owned();
            let sender = tx
                .get("from")
                .and_then(|f| f.as_str())
                .unwrap_or_default()
                .to_lowercase();
            let amount = Self::parse_hex_u128(tx.get("value").unwrap_or(&Value::Null))
                .unwrap_or_default();

            transactions.push(ChainTx {
                id,
                sender,
                recipient: to.to_lowercase(),
                amount,
                attachment: None,
            });
        }

        Ok(Block {
            height,
            transactions,
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        ADDRESS_RE.is_match(address)
    }

    fn normalize_address(&self, address: &str) -> String {
        address.to_lowercase()
    }

    async fn get_new_address(&self) -> anyhow::Result<String> {
        let secret = self
            .account_secret
            .as_deref()
            .ok_or_else(|| anyhow!("no account secret configured for address creation"))?;
        let result = self.rpc("personal_newAccount", json!([secret])).await?;
        result
            .as_str()
            .map(|a| a.to_lowercase())
            .ok_or_else(|| anyhow!("personal_newAccount returned a non-string"))
    }

    async fn send_tx(&self, to: &str, amount: f64) -> anyhow::Result<SendOutcome> {
        let raw = crate::to_raw_units(amount, self.decimals);
        let params = json!([{
            "from": self.gateway_address,
            "to": to,
            "value": format!("{:#x}", raw),
        }]);

        // A node-level rejection is a clean outcome; only transport errors
        // propagate as Err (the submission state is then unknown).
        let rsp: Value = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "eth_sendTransaction",
                "params": params,
                "id": 1,
            }))
            .send()
            .await?
            .json()
            .await?;
        tracing::debug!("eth_sendTransaction response: {}", rsp);

        if let Some(error) = rsp.get("error") {
            let reason = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown node error")
                .to_owned();
            return Ok(SendOutcome::Rejected { reason });
        }

        let txid = rsp
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow!("eth_sendTransaction: response without result"))?;
        Ok(SendOutcome::Accepted {
            txid: txid.to_owned(),
        })
    }

    fn attached_target(&self, _tx: &ChainTx) -> Attachment {
        Attachment::Missing
    }

    async fn find_tx_height(&self, txid: &str) -> anyhow::Result<Option<u64>> {
        let result = self
            .rpc("eth_getTransactionReceipt", json!([txid]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        match result.get("blockNumber") {
            Some(Value::Null) | None => Ok(None),
            Some(number) => Ok(Some(Self::parse_hex_u64(number)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OtherClient {
        OtherClient::new("http://localhost:8545", None, "0xAbCd000000000000000000000000000000000000", 18)
            .unwrap()
    }

    #[test]
    fn address_validation() {
        let client = client();
        assert!(client.validate_address("0x00a329c0648769a73afac7f9381e08fb43dbea72"));
        assert!(client.validate_address("0x00A329C0648769A73AFAC7F9381E08FB43DBEA72"));
        assert!(!client.validate_address("00a329c0648769a73afac7f9381e08fb43dbea72"));
        assert!(!client.validate_address("0x00a329"));
        assert!(!client.validate_address("not-an-address"));
    }

    #[test]
    fn normalization_lowercases() {
        let client = client();
        assert_eq!(
            client.normalize_address("0x00A329c0648769A73afAc7F9381E08FB43dBEA72"),
            "0x00a329c0648769a73afac7f9381e08fb43dbea72"
        );
    }

    #[test]
    fn hex_quantities() {
        assert_eq!(OtherClient::parse_hex_u64(&json!("0x10")).unwrap(), 16);
        assert_eq!(
            OtherClient::parse_hex_u128(&json!("0xde0b6b3a7640000")).unwrap(),
            1_000_000_000_000_000_000
        );
        assert!(OtherClient::parse_hex_u64(&json!(12)).is_err());
    }
}
