//! Gateway configuration: loaded once at startup from a JSON file and
//! passed around as an immutable value.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_ADMIN: &str = "admin";

fn default_max_verify_attempts() -> i64 {
    60
}

fn default_controller_interval_secs() -> u64 {
    30
}

fn default_sending_timeout_secs() -> u64 {
    900
}

fn default_storage_backend() -> String {
    "sqlite".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub main: MainConfig,
    pub tn: SideConfig,
    pub other: SideConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainConfig {
    /// Public name of this gateway.
    pub name: String,
    pub company: String,
    pub contact_email: String,
    pub contact_telegram: String,
    pub recovery_amount: f64,
    pub recovery_fee: f64,
    /// Accepted deposit bounds, in decimal units.
    pub min: f64,
    pub max: f64,
    pub disclaimer: String,
    pub port: u16,
    pub admin_username: String,
    pub admin_password: String,
    /// Storage backend selector; only `sqlite` is supported.
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,
    /// SQLite database location.
    pub storage_path: String,
    /// Legacy file-backed datastore; imported once and renamed if present.
    #[serde(default)]
    pub legacy_path: Option<String>,
    #[serde(default = "default_max_verify_attempts")]
    pub max_verify_attempts: i64,
    #[serde(default = "default_controller_interval_secs")]
    pub controller_interval_secs: u64,
    #[serde(default = "default_sending_timeout_secs")]
    pub sending_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SideConfig {
    pub gateway_address: String,
    pub cold_wallet_address: String,
    /// Flat operator fee, decimal units.
    pub gateway_fee: f64,
    /// Estimated chain fee, decimal units.
    pub network_fee: f64,
    /// Combined fee as quoted to users.
    pub fee: f64,
    pub asset_id: String,
    pub decimals: u32,
    pub confirmations: u64,
    /// Watcher tick interval, seconds.
    pub time_in_between_checks: u64,
    pub network: String,
    pub rpc_endpoint: String,
    #[serde(default)]
    pub rpc_credentials: Option<String>,
}

impl SideConfig {
    pub fn total_fee(&self) -> f64 {
        self.gateway_fee + self.network_fee
    }
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: GatewayConfig =
            serde_json::from_str(&raw).context("parsing config file")?;
        Ok(config)
    }

    /// Admin pages refuse to serve while these are unchanged.
    pub fn has_default_admin_credentials(&self) -> bool {
        self.main.admin_username == DEFAULT_ADMIN && self.main.admin_password == DEFAULT_ADMIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "main": {
                "name": "TN Gateway",
                "company": "Example Ltd",
                "contact_email": "ops@example.com",
                "contact_telegram": "@example",
                "recovery_amount": 0.5,
                "recovery_fee": 0.1,
                "min": 0.5,
                "max": 100.0,
                "disclaimer": "use at your own risk",
                "port": 8080,
                "admin_username": "operator",
                "admin_password": "hunter2",
                "storage_path": "gateway.db"
            },
            "tn": {
                "gateway_address": "tn1gateway",
                "cold_wallet_address": "tn1cold",
                "gateway_fee": 0.1,
                "network_fee": 0.01,
                "fee": 0.11,
                "asset_id": "asset123",
                "decimals": 6,
                "confirmations": 5,
                "time_in_between_checks": 30,
                "network": "mainnet",
                "rpc_endpoint": "http://localhost:6869",
                "rpc_credentials": "apikey"
            },
            "other": {
                "gateway_address": "0xAbCd000000000000000000000000000000000000",
                "cold_wallet_address": "0xCo1d000000000000000000000000000000000000",
                "gateway_fee": 0.2,
                "network_fee": 0.05,
                "fee": 0.25,
                "asset_id": "",
                "decimals": 18,
                "confirmations": 12,
                "time_in_between_checks": 15,
                "network": "mainnet",
                "rpc_endpoint": "http://localhost:8545"
            }
        })
    }

    #[test]
    fn parses_a_full_config() {
        let config: GatewayConfig = serde_json::from_value(sample()).unwrap();
        assert_eq!(config.main.port, 8080);
        assert_eq!(config.tn.decimals, 6);
        assert_eq!(config.other.confirmations, 12);
        assert_eq!(config.other.rpc_credentials, None);
        assert!((config.tn.total_fee() - 0.11).abs() < 1e-9);
        assert!(!config.has_default_admin_credentials());

        // optional knobs fall back to defaults
        assert_eq!(config.main.storage_backend, "sqlite");
        assert_eq!(config.main.max_verify_attempts, 60);
        assert_eq!(config.main.controller_interval_secs, 30);
        assert_eq!(config.main.sending_timeout_secs, 900);
        assert_eq!(config.main.legacy_path, None);
    }

    #[test]
    fn detects_default_admin_credentials() {
        let mut value = sample();
        value["main"]["admin_username"] = "admin".into();
        value["main"]["admin_password"] = "admin".into();
        let config: GatewayConfig = serde_json::from_value(value).unwrap();
        assert!(config.has_default_admin_credentials());
    }
}
