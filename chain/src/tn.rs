//! REST client for the TN node.
//!
//! Deposits on this side are asset transfers to the gateway address whose
//! base58 attachment carries the user's address on the Other chain.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;

use crate::{Attachment, Block, Chain, ChainClient, ChainTx, SendOutcome};

/// TN addresses are 26-byte base58 payloads with a leading version byte.
const ADDRESS_LEN: usize = 26;
const ADDRESS_VERSION: u8 = 1;

/// Asset-transfer transaction type on the TN node.
const TRANSFER_TYPE: u8 = 4;

#[derive(Debug, Clone)]
pub struct TnClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    gateway_address: String,
    asset_id: String,
    decimals: u32,
    /// Flat node fee for outbound transfers, in raw units.
    tx_fee: u64,
}

#[derive(Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u128,
}

#[derive(Deserialize)]
struct NewAddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct BlockResponse {
    height: u64,
    #[serde(default)]
    transactions: Vec<NodeTx>,
}

/// Raw node transaction; only asset transfers of the gateway asset become
/// [`ChainTx`]s.
#[derive(Deserialize)]
struct NodeTx {
    #[serde(rename = "type")]
    tx_type: u8,
    id: String,
    sender: String,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    amount: Option<u128>,
    #[serde(rename = "assetId", default)]
    asset_id: Option<String>,
    #[serde(default)]
    attachment: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TxInfoResponse {
    height: u64,
}

impl TnClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        gateway_address: &str,
        asset_id: &str,
        decimals: u32,
        tx_fee: u64,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building TN http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            api_key,
            gateway_address: gateway_address.to_owned(),
            asset_id: asset_id.to_owned(),
            decimals,
            tx_fee,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-API-Key", key),
            None => req,
        }
    }
}

#[async_trait]
impl ChainClient for TnClient {
    fn chain(&self) -> Chain {
        Chain::Tn
    }

    async fn current_block(&self) -> anyhow::Result<u64> {
        let rsp: HeightResponse = self
            .http
            .get(self.url("/blocks/height"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rsp.height)
    }

    async fn current_balance(&self) -> anyhow::Result<u128> {
        let rsp: BalanceResponse = self
            .http
            .get(self.url(&format!(
                "/assets/balance/{}/{}",
                self.gateway_address, self.asset_id
            )))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rsp.balance)
    }

    async fn get_block(&self, height: u64) -> anyhow::Result<Block> {
        let rsp: BlockResponse = self
            .http
            .get(self.url(&format!("/blocks/at/{}", height)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let transactions = rsp
            .transactions
            .into_iter()
            .filter(|tx| {
                tx.tx_type == TRANSFER_TYPE && tx.asset_id.as_deref() == Some(self.asset_id.as_str())
            })
            .filter_map(|tx| {
                Some(ChainTx {
                    id: tx.id,
                    sender: tx.sender,
                    recipient: tx.recipient?,
                    amount: tx.amount?,
                    attachment: tx.attachment.filter(|a| !a.is_empty()),
                })
            })
            .collect();

        Ok(Block {
            height: rsp.height,
            transactions,
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        match bs58::decode(address).into_vec() {
            Ok(bytes) => bytes.len() == ADDRESS_LEN && bytes[0] == ADDRESS_VERSION,
            Err(_) => false,
        }
    }

    fn normalize_address(&self, address: &str) -> String {
        // base58 payloads are already canonical
        address.to_owned()
    }

    async fn get_new_address(&self) -> anyhow::Result<String> {
        let rsp: NewAddressResponse = self
            .with_key(self.http.post(self.url("/addresses")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rsp.address)
    }

    async fn send_tx(&self, to: &str, amount: f64) -> anyhow::Result<SendOutcome> {
        let raw = crate::to_raw_units(amount, self.decimals);
        let body = serde_json::json!({
            "assetId": self.asset_id,
            "recipient": to,
            "amount": raw,
            "fee": self.tx_fee,
        });

        let rsp: SendResponse = self
            .with_key(self.http.post(self.url("/assets/transfer")))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        match rsp {
            SendResponse { id: Some(id), .. } => {
                tracing::debug!(txid = %id, "asset transfer accepted");
                Ok(SendOutcome::Accepted { txid: id })
            }
            SendResponse {
                error, message, ..
            } => Ok(SendOutcome::Rejected {
                reason: message
                    .unwrap_or_else(|| format!("node error {}", error.unwrap_or(-1))),
            }),
        }
    }

    fn attached_target(&self, tx: &ChainTx) -> Attachment {
        let Some(raw) = tx.attachment.as_deref() else {
            return Attachment::Missing;
        };
        // Undecodable attachments fall through to address validation on the
        // opposite chain, which rejects them.
        match bs58::decode(raw)
            .into_vec()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(decoded) => Attachment::Target(decoded),
            None => Attachment::Target(raw.to_owned()),
        }
    }

    async fn find_tx_height(&self, txid: &str) -> anyhow::Result<Option<u64>> {
        let rsp = self
            .http
            .get(self.url(&format!("/transactions/info/{}", txid)))
            .send()
            .await?;

        if rsp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: TxInfoResponse = rsp
            .error_for_status()
            .map_err(|e| anyhow!("tx info for {}: {}", txid, e))?
            .json()
            .await?;
        Ok(Some(info.height))
    }
}
