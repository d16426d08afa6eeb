//! HTTP façade: thin read endpoints over the store, tunnel creation, and
//! basic-auth admin pages.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use tngate_chain::{Chain, ChainClient};
use tngate_store::{
    Direction, ExecutedRecord, Storage, TunnelRecord, TunnelStatus, VerifiedRecord,
};
use tngate_watcher::policy::decimal_amount;
use tngate_watcher::SharedHealth;

use crate::config::GatewayConfig;

static SANITIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9A-Za-z]").expect("sanitize regex"));

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub storage: Storage,
    pub tn: Arc<dyn ChainClient>,
    pub other: Arc<dyn ChainClient>,
    pub health: SharedHealth,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/heights", get(heights))
        .route("/tnAddress/{address}", get(tunnel_addresses))
        .route("/tunnel/{target_address}", get(create_tunnel))
        .route("/api/fullinfo", get(full_info))
        .route("/api/deposit/{address}", get(deposit_check))
        .route("/api/wd/{address}", get(wd_check))
        .route("/api/checktxs", get(check_txs_all))
        .route("/api/checktxs/{address}", get(check_txs_for))
        .route("/api/fees", get(fees_all))
        .route("/api/fees/{from}", get(fees_from))
        .route("/api/fees/{from}/{to}", get(fees_range))
        .route("/api/health", get(health))
        .route("/errors", get(admin_errors))
        .route("/executed", get(admin_executed))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Internal detail never leaks to callers; it goes to the log instead.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_owned(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", error);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Strip anything but alphanumerics from user-supplied addresses.
fn sanitize(address: &str) -> String {
    SANITIZE_RE.replace_all(address, "").into_owned()
}

// ---- public endpoints --------------------------------------------------

#[derive(Serialize)]
struct Heights {
    #[serde(rename = "TN")]
    tn: u64,
    #[serde(rename = "Other")]
    other: u64,
}

async fn heights(State(state): State<AppState>) -> Result<Json<Heights>, ApiError> {
    Ok(Json(Heights {
        tn: state.storage.get_height(Chain::Tn).await?.unwrap_or_default(),
        other: state
            .storage
            .get_height(Chain::Other)
            .await?
            .unwrap_or_default(),
    }))
}

#[derive(Serialize)]
struct TunnelAddresses {
    #[serde(rename = "sourceAddress")]
    source_address: String,
    #[serde(rename = "targetAddress")]
    target_address: String,
}

/// Tunnel lookup by either endpoint.
async fn tunnel_addresses(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<TunnelAddresses>, ApiError> {
    let address = sanitize(&address);
    let tunnel = match state.storage.tunnel_by_target(&address).await? {
        Some(tunnel) => Some(tunnel),
        None => state.storage.tunnel_by_source(&address).await?,
    };
    Ok(Json(match tunnel {
        Some(tunnel) => TunnelAddresses {
            source_address: tunnel.source_address,
            target_address: tunnel.target_address,
        },
        None => TunnelAddresses {
            source_address: String::new(),
            target_address: String::new(),
        },
    }))
}

#[derive(Serialize)]
struct ExecResult {
    successful: u8,
    address: String,
}

/// Create-or-return: 0 = invalid target, 1 = created, 2 = existing.
async fn create_tunnel(
    State(state): State<AppState>,
    Path(target_address): Path<String>,
) -> Result<Json<ExecResult>, ApiError> {
    let target = sanitize(&target_address);

    if !state.tn.validate_address(&target) || target == state.config.tn.gateway_address {
        return Ok(Json(ExecResult {
            successful: 0,
            address: String::new(),
        }));
    }
    let target = state.tn.normalize_address(&target);

    if let Some(tunnel) = state.storage.tunnel_by_target(&target).await? {
        return Ok(Json(ExecResult {
            successful: 2,
            address: tunnel.source_address,
        }));
    }

    let source = state.other.get_new_address().await?;
    state
        .storage
        .insert_tunnel(TunnelStatus::Created, &source, &target)
        .await?;
    tracing::info!(%source, %target, "tunnel created");
    Ok(Json(ExecResult {
        successful: 1,
        address: source,
    }))
}

#[derive(Serialize)]
struct FullInfo {
    #[serde(rename = "chainName")]
    chain_name: String,
    #[serde(rename = "assetID")]
    asset_id: String,
    tn_gateway_fee: f64,
    tn_network_fee: f64,
    tn_total_fee: f64,
    other_gateway_fee: f64,
    other_network_fee: f64,
    other_total_fee: f64,
    fee: f64,
    company: String,
    email: String,
    telegram: String,
    recovery_amount: f64,
    recovery_fee: f64,
    #[serde(rename = "otherHeight")]
    other_height: u64,
    #[serde(rename = "tnHeight")]
    tn_height: u64,
    #[serde(rename = "tnAddress")]
    tn_address: String,
    #[serde(rename = "tnColdAddress")]
    tn_cold_address: String,
    #[serde(rename = "otherAddress")]
    other_address: String,
    #[serde(rename = "otherNetwork")]
    other_network: String,
    disclaimer: String,
    tn_balance: f64,
    other_balance: f64,
    #[serde(rename = "minAmount")]
    min_amount: f64,
    #[serde(rename = "maxAmount")]
    max_amount: f64,
    #[serde(rename = "type")]
    kind: String,
    usageinfo: String,
}

/// Quote and capacity for the web front end.
async fn full_info(State(state): State<AppState>) -> Result<Json<FullInfo>, ApiError> {
    let config = &state.config;
    let tn_height = state.storage.get_height(Chain::Tn).await?.unwrap_or_default();
    let other_height = state
        .storage
        .get_height(Chain::Other)
        .await?
        .unwrap_or_default();
    let tn_balance = decimal_amount(state.tn.current_balance().await?, config.tn.decimals);
    let other_balance =
        decimal_amount(state.other.current_balance().await?, config.other.decimals);

    Ok(Json(FullInfo {
        chain_name: config.main.name.clone(),
        asset_id: config.tn.asset_id.clone(),
        tn_gateway_fee: config.tn.gateway_fee,
        tn_network_fee: config.tn.network_fee,
        tn_total_fee: config.tn.total_fee(),
        other_gateway_fee: config.other.gateway_fee,
        other_network_fee: config.other.network_fee,
        other_total_fee: config.other.total_fee(),
        fee: config.tn.fee,
        company: config.main.company.clone(),
        email: config.main.contact_email.clone(),
        telegram: config.main.contact_telegram.clone(),
        recovery_amount: config.main.recovery_amount,
        recovery_fee: config.main.recovery_fee,
        other_height,
        tn_height,
        tn_address: config.tn.gateway_address.clone(),
        tn_cold_address: config.tn.cold_wallet_address.clone(),
        other_address: config.other.gateway_address.clone(),
        other_network: config.other.network.clone(),
        disclaimer: config.main.disclaimer.clone(),
        tn_balance,
        other_balance,
        min_amount: config.main.min,
        max_amount: config.main.max,
        kind: "deposit".to_owned(),
        usageinfo: String::new(),
    }))
}

#[derive(Serialize)]
struct DepositWd {
    status: String,
    tx: String,
    block: String,
    error: String,
}

/// Shared shape of the deposit/withdrawal status endpoints.
async fn transfer_status(
    state: &AppState,
    tunnel: Option<TunnelRecord>,
    direction: Direction,
) -> Result<DepositWd, ApiError> {
    let Some(tunnel) = tunnel else {
        return Ok(DepositWd {
            status: "unknown".to_owned(),
            tx: String::new(),
            block: String::new(),
            error: "no tunnel found".to_owned(),
        });
    };

    let executed = state
        .storage
        .latest_executed_for_pair(&tunnel.source_address, &tunnel.target_address)
        .await?
        .filter(|record| record.direction == direction);

    let (tx, block) = match &executed {
        Some(record) => {
            let block = state
                .storage
                .verified_for(&record.outbound_txid, direction)
                .await?
                .map(|v| v.height.to_string())
                .unwrap_or_default();
            (record.outbound_txid.clone(), block)
        }
        None => (String::new(), String::new()),
    };

    let error = if tunnel.status == TunnelStatus::Error {
        state
            .storage
            .latest_error_for(&tunnel.target_address)
            .await?
            .map(|record| record.reason.as_str().to_owned())
            .unwrap_or_default()
    } else {
        String::new()
    };

    Ok(DepositWd {
        status: tunnel.status.as_str().to_owned(),
        tx,
        block,
        error,
    })
}

/// Deposit status: the path address is the user's TN address, i.e. the
/// tunnel target.
async fn deposit_check(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<DepositWd>, ApiError> {
    let address = sanitize(&address);
    let tunnel = state.storage.tunnel_by_target(&address).await?;
    Ok(Json(
        transfer_status(&state, tunnel, Direction::Other2Tn).await?,
    ))
}

/// Withdrawal status: the path address is the TN sender, i.e. the tunnel
/// source.
async fn wd_check(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<DepositWd>, ApiError> {
    let address = sanitize(&address);
    let tunnel = state.storage.tunnel_by_source(&address).await?;
    Ok(Json(
        transfer_status(&state, tunnel, Direction::Tn2Other).await?,
    ))
}

#[derive(Serialize)]
struct Tx {
    #[serde(rename = "sourceAddress")]
    source_address: String,
    #[serde(rename = "targetAddress")]
    target_address: String,
    #[serde(rename = "tnTxId")]
    tn_txid: String,
    #[serde(rename = "OtherTxId")]
    other_txid: String,
    #[serde(rename = "TNVerBlock")]
    tn_ver_block: i64,
    #[serde(rename = "OtherVerBlock")]
    other_ver_block: i64,
    amount: f64,
    #[serde(rename = "TypeTX")]
    type_tx: String,
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Serialize, Default)]
struct Txs {
    transactions: Vec<Tx>,
    error: String,
}

fn tx_row(record: &ExecutedRecord, verified: Option<&VerifiedRecord>) -> Tx {
    let ver_block = verified.map(|v| v.height).unwrap_or_default();
    let (tn_txid, other_txid, tn_ver_block, other_ver_block) = match record.direction {
        Direction::Tn2Other => (
            record.inbound_txid.clone(),
            record.outbound_txid.clone(),
            0,
            ver_block,
        ),
        Direction::Other2Tn => (
            record.outbound_txid.clone(),
            record.inbound_txid.clone(),
            ver_block,
            0,
        ),
    };
    Tx {
        source_address: record.source_address.clone(),
        target_address: record.target_address.clone(),
        tn_txid,
        other_txid,
        tn_ver_block,
        other_ver_block,
        amount: record.amount,
        type_tx: record.direction.as_str().to_owned(),
        status: if verified.is_some() {
            "verified".to_owned()
        } else {
            "verifying".to_owned()
        },
    }
}

async fn list_txs(state: &AppState, address: &str) -> Result<Txs, ApiError> {
    let records = state.storage.list_txs_for_address(address).await?;
    let mut transactions = Vec::with_capacity(records.len());
    for record in &records {
        let verified = state
            .storage
            .verified_for(&record.outbound_txid, record.direction)
            .await?;
        transactions.push(tx_row(record, verified.as_ref()));
    }
    Ok(Txs {
        transactions,
        error: String::new(),
    })
}

async fn check_txs_all(State(state): State<AppState>) -> Result<Json<Txs>, ApiError> {
    Ok(Json(list_txs(&state, "").await?))
}

async fn check_txs_for(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Txs>, ApiError> {
    let address = sanitize(&address);
    if !state.tn.validate_address(&address) {
        return Ok(Json(Txs {
            error: "invalid address".to_owned(),
            ..Txs::default()
        }));
    }
    Ok(Json(list_txs(&state, &address).await?))
}

#[derive(Serialize)]
struct Fees {
    #[serde(rename = "totalFees")]
    total_fees: f64,
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| ApiError::bad_request("dates must be YYYY-MM-DD"))
}

async fn fees_all(State(state): State<AppState>) -> Result<Json<Fees>, ApiError> {
    Ok(Json(Fees {
        total_fees: state.storage.sum_fees(None, None).await?,
    }))
}

async fn fees_from(
    State(state): State<AppState>,
    Path(from): Path<String>,
) -> Result<Json<Fees>, ApiError> {
    let from = parse_date(&from)?;
    Ok(Json(Fees {
        total_fees: state.storage.sum_fees(Some(from), None).await?,
    }))
}

async fn fees_range(
    State(state): State<AppState>,
    Path((from, to)): Path<(String, String)>,
) -> Result<Json<Fees>, ApiError> {
    let from = parse_date(&from)?;
    let to = parse_date(&to)?;
    Ok(Json(Fees {
        total_fees: state.storage.sum_fees(Some(from), Some(to)).await?,
    }))
}

#[derive(Serialize)]
struct Health {
    #[serde(rename = "chainName")]
    chain_name: String,
    #[serde(rename = "assetID")]
    asset_id: String,
    status: String,
    #[serde(rename = "connectionTN")]
    connection_tn: bool,
    #[serde(rename = "connectionOther")]
    connection_other: bool,
    #[serde(rename = "blocksbehindTN")]
    blocks_behind_tn: i64,
    #[serde(rename = "blockbehindOther")]
    blocks_behind_other: i64,
    #[serde(rename = "balanceTN")]
    balance_tn: f64,
    #[serde(rename = "balanceOther")]
    balance_other: f64,
    #[serde(rename = "numberErrors")]
    number_errors: u64,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let snapshot = state.health.lock().clone();
    Json(Health {
        chain_name: state.config.main.name.clone(),
        asset_id: state.config.tn.asset_id.clone(),
        status: if snapshot.is_ok() { "ok" } else { "degraded" }.to_owned(),
        connection_tn: snapshot.connection_tn,
        connection_other: snapshot.connection_other,
        blocks_behind_tn: snapshot.blocks_behind_tn,
        blocks_behind_other: snapshot.blocks_behind_other,
        balance_tn: snapshot.balance_tn,
        balance_other: snapshot.balance_other,
        number_errors: snapshot.number_errors,
    })
}

// ---- admin endpoints ---------------------------------------------------

enum AdminAuth {
    Ok,
    DefaultCredentials,
    Unauthorized,
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(base64::decode(encoded).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

fn authorize_admin(config: &GatewayConfig, headers: &HeaderMap) -> AdminAuth {
    if config.has_default_admin_credentials() {
        return AdminAuth::DefaultCredentials;
    }
    match basic_credentials(headers) {
        Some((user, pass))
            if user == config.main.admin_username && pass == config.main.admin_password =>
        {
            AdminAuth::Ok
        }
        _ => {
            tracing::warn!("invalid admin logon");
            AdminAuth::Unauthorized
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        "Incorrect username or password",
    )
        .into_response()
}

fn default_credentials_refusal() -> Response {
    Json(serde_json::json!({
        "message": "change the default username and password please!"
    }))
    .into_response()
}

#[derive(Serialize)]
struct ErrorRow {
    #[serde(rename = "sourceAddress")]
    source_address: String,
    #[serde(rename = "targetAddress")]
    target_address: String,
    #[serde(rename = "inboundTxId")]
    inbound_txid: String,
    #[serde(rename = "outboundTxId")]
    outbound_txid: String,
    amount: f64,
    reason: String,
    detail: String,
    timestamp: String,
}

async fn admin_errors(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authorize_admin(&state.config, &headers) {
        AdminAuth::Unauthorized => unauthorized(),
        AdminAuth::DefaultCredentials => default_credentials_refusal(),
        AdminAuth::Ok => match state.storage.list_errors().await {
            Ok(records) => {
                let rows: Vec<ErrorRow> = records
                    .into_iter()
                    .map(|record| ErrorRow {
                        source_address: record.source_address,
                        target_address: record.target_address,
                        inbound_txid: record.inbound_txid,
                        outbound_txid: record.outbound_txid,
                        amount: record.amount,
                        reason: record.reason.as_str().to_owned(),
                        detail: record.detail,
                        timestamp: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();
                Json(rows).into_response()
            }
            Err(e) => ApiError::from(e).into_response(),
        },
    }
}

#[derive(Serialize)]
struct ExecutedPage {
    txs: Vec<Tx>,
    vtxs: Vec<serde_json::Value>,
}

async fn admin_executed(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match authorize_admin(&state.config, &headers) {
        AdminAuth::Unauthorized => unauthorized(),
        AdminAuth::DefaultCredentials => default_credentials_refusal(),
        AdminAuth::Ok => {
            let page = async {
                let txs = list_txs(&state, "").await?;
                let verified = state.storage.list_verified().await?;
                let vtxs = verified
                    .into_iter()
                    .map(|record| {
                        serde_json::json!({
                            "outboundTxId": record.outbound_txid,
                            "direction": record.direction.as_str(),
                            "block": record.height,
                            "timestamp": record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        })
                    })
                    .collect();
                Ok::<_, ApiError>(ExecutedPage {
                    txs: txs.transactions,
                    vtxs,
                })
            }
            .await;
            match page {
                Ok(page) => Json(page).into_response(),
                Err(e) => e.into_response(),
            }
        }
    }
}
