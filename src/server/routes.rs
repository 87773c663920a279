//! Route table and handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use super::ApiError;
use crate::cache::now_ms;
use crate::config::DEFAULT_THREE_COMMAS_BASE_URL;
use crate::connectors::binance::parser::MAX_SYMBOL_LEN;
use crate::connectors::binance::{is_valid_symbol, normalize_symbol};
use crate::connectors::three_commas::config::{
    ACCOUNTS_NEW_PATH, FORM_CONTENT_TYPE, HEADER_API_KEY, HEADER_SIGNATURE,
};
use crate::connectors::three_commas::{extract_balances, CreateAccountRequest};
use crate::error::AppError;
use crate::signing::sign;
use crate::state::AppState;
use crate::types::AssetBalance;

pub const SERVICE_NAME: &str = "threecommas-proxy";

const IPIFY_URL: &str = "https://api.ipify.org?format=json";
const IFCONFIG_URL: &str = "https://ifconfig.me/ip";

type ApiResult = Result<Response, ApiError>;

// ── Request bodies ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountBody {
    #[serde(default)]
    binance_api_key: Option<String>,
    #[serde(default)]
    binance_api_secret: Option<String>,
    #[serde(default)]
    name: Option<String>,
    /// String or number; stored as a string.
    #[serde(default)]
    user_id: Option<Value>,
}

impl CreateAccountBody {
    fn into_request(self) -> (CreateAccountRequest, Option<String>) {
        let user_id = self.user_id.as_ref().and_then(id_string);
        let request = CreateAccountRequest {
            binance_api_key: self.binance_api_key.unwrap_or_default(),
            binance_api_secret: self.binance_api_secret.unwrap_or_default(),
            name: self.name,
        };
        (request, user_id)
    }
}

// ── Route definitions ────────────────────────────────────────────────────

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/create-account", post(create_account))
        .route("/probe-accounts", get(probe_accounts))
        .route("/accounts/{user_id}/balances", get(account_balances))
        .route("/price/{symbol}", get(price))
        .route("/debug", get(debug_env))
        .route("/debug-sign", post(debug_sign))
        .route("/debug-url", get(debug_url))
        .route("/generate-signature", post(generate_signature))
        .route("/my-ip", get(my_ip))
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root() -> Json<Value> {
    Json(json!({ "ok": true, "service": SERVICE_NAME }))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateAccountBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (request, user_id) = body.into_request();
    require_binance_keys(&request)?;

    let data = state
        .upstream
        .create_binance_account(&request)
        .await
        .map_err(|e| note_upstream_failure(&state, e))?;

    if let Some(user_id) = user_id {
        persist_link(&state, &user_id, &data, &request).await;
    }

    Ok(Json(json!({ "ok": true, "data": data })).into_response())
}

async fn probe_accounts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult {
    let params: Vec<(String, String)> = params.into_iter().collect();
    let data = state
        .upstream
        .list_accounts(&params)
        .await
        .map_err(|e| note_upstream_failure(&state, e))?;

    Ok(Json(json!({ "ok": true, "data": data })).into_response())
}

async fn account_balances(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult {
    let account_id = state
        .store
        .account_id(&user_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("No linked account for user {}", user_id)))?;

    let ttl = state.config.cache.balance_ttl();
    if let Some(balances) = state.cache.get_cached_user_balances(&user_id, ttl) {
        return Ok(balances_response(&user_id, &account_id, balances, true));
    }

    if state.cache.is_binance_banned_now() {
        let ban_until = state.cache.binance_ban_until();
        warn!("Balance fetch for user {} skipped, rate limited until {}", user_id, ban_until);
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "ok": false,
                "error": "Rate limited by upstream",
                "retryAfterMs": (ban_until - now_ms()).max(0),
            })),
        )
            .into_response());
    }

    let body = state
        .upstream
        .get_account_balances(&account_id)
        .await
        .map_err(|e| note_upstream_failure(&state, e))?;
    let balances = extract_balances(&body);
    state
        .cache
        .set_cached_user_balances(&user_id, balances.clone());

    Ok(balances_response(&user_id, &account_id, balances, false))
}

async fn price(State(state): State<Arc<AppState>>, Path(symbol): Path<String>) -> ApiResult {
    let symbol = normalize_symbol(&symbol);
    if symbol.is_empty() {
        return Err(AppError::BadRequest("symbol is required".to_string()).into());
    }
    if !is_valid_symbol(&symbol) {
        return Err(AppError::BadRequest(format!(
            "invalid symbol {:?}: expected 1-{} letters or digits",
            symbol, MAX_SYMBOL_LEN
        ))
        .into());
    }

    if !state.feed.is_subscribed(&symbol).await {
        state.feed.subscribe_symbols([symbol.as_str()]).await;
    }
    let price = state.feed.get_price(&symbol);

    Ok(Json(json!({ "ok": true, "symbol": symbol, "price": price })).into_response())
}

async fn debug_env(State(state): State<Arc<AppState>>) -> Response {
    if !state.debug_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let three_commas = &state.config.three_commas;
    let key_len = three_commas.api_key.as_deref().map(str::len).unwrap_or(0);
    let secret_len = three_commas.api_secret.as_deref().map(str::len).unwrap_or(0);

    Json(json!({
        "ok": true,
        "env": {
            "hasKey": key_len > 0,
            "hasSecret": secret_len > 0,
            "keyLen": key_len,
            "secretLen": secret_len,
            "baseUrl": three_commas.base_url,
        },
        "feed": {
            "status": state.feed.status().await.to_string(),
            "url": state.feed.connection_url().await,
            "streams": state.feed.wanted_streams().await,
        },
    }))
    .into_response()
}

async fn debug_sign(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateAccountBody>, JsonRejection>,
) -> ApiResult {
    if !state.debug_enabled() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (request, _) = body.into_request();

    let data = state.upstream.debug_build(&request)?;
    Ok(Json(json!({ "ok": true, "data": data })).into_response())
}

async fn debug_url(State(state): State<Arc<AppState>>) -> Response {
    if !state.debug_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let base_url = state.config.three_commas.base_url.trim_end_matches('/');
    Json(json!({
        "ok": true,
        "fullUrl": format!("{}{}", base_url, ACCOUNTS_NEW_PATH),
        "baseUrl": base_url,
        "path": ACCOUNTS_NEW_PATH,
        "expectedBy3Commas": format!("{}{}", DEFAULT_THREE_COMMAS_BASE_URL, ACCOUNTS_NEW_PATH),
    }))
    .into_response()
}

async fn generate_signature(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateAccountBody>, JsonRejection>,
) -> ApiResult {
    if !state.debug_enabled() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (request, _) = body.into_request();
    require_binance_keys(&request)?;

    let (api_key, api_secret) = state.config.three_commas.credentials()?;
    let signed = sign(ACCOUNTS_NEW_PATH, request.payload(), api_secret)?;
    let base_url = state.config.three_commas.base_url.trim_end_matches('/');

    let urlencoded: Vec<Value> = signed
        .sorted_params
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect();

    Ok(Json(json!({
        "ok": true,
        "request": {
            "method": "POST",
            "url": format!("{}{}", base_url, ACCOUNTS_NEW_PATH),
            "headers": {
                HEADER_API_KEY: api_key,
                HEADER_SIGNATURE: signed.signature,
                "Content-Type": FORM_CONTENT_TYPE,
            },
            "body": {
                "mode": "urlencoded",
                "urlencoded": urlencoded,
            },
        },
        "debug": {
            "path": ACCOUNTS_NEW_PATH,
            "bodyString": signed.body,
            "signature": signed.signature,
            "signedString": signed.signed_string(),
            "apiKeyLength": api_key.len(),
            "signatureLength": signed.signature.len(),
        },
    }))
    .into_response())
}

async fn my_ip(State(state): State<Arc<AppState>>) -> Response {
    if !state.debug_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let ipify = async {
        let response = state.http.get(IPIFY_URL).send().await.ok()?;
        response.json::<Value>().await.ok()
    };
    let ifconfig = async {
        let response = state.http.get(IFCONFIG_URL).send().await.ok()?;
        response.text().await.ok()
    };
    let (ipify, ifconfig) = tokio::join!(ipify, ifconfig);

    Json(json!({ "ok": true, "ipify": ipify, "ifconfig": ifconfig })).into_response()
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn require_binance_keys(request: &CreateAccountRequest) -> Result<(), AppError> {
    if request.binance_api_key.is_empty() || request.binance_api_secret.is_empty() {
        return Err(AppError::BadRequest(
            "binanceApiKey and binanceApiSecret are required".to_string(),
        ));
    }
    Ok(())
}

/// Raise the ban window when the upstream rate limits us, then pass the
/// error through.
fn note_upstream_failure(state: &AppState, error: AppError) -> ApiError {
    if let AppError::Upstream {
        status: 429 | 418,
        retry_after,
        ..
    } = &error
    {
        let secs = retry_after.unwrap_or(state.config.cache.default_ban_secs);
        let until = now_ms() + (secs as i64) * 1000;
        state.cache.set_binance_ban_until(until);
        warn!("Upstream rate limit, backing off for {}s", secs);
    }
    ApiError(error)
}

async fn persist_link(
    state: &AppState,
    user_id: &str,
    data: &Value,
    request: &CreateAccountRequest,
) {
    let account_id = ["id", "account_id"]
        .iter()
        .find_map(|field| data.get(*field).and_then(id_string));

    if let Some(account_id) = account_id {
        if let Err(e) = state.store.save_account_id(user_id, &account_id).await {
            error!("Failed to store account id for user {}: {}", user_id, e);
        } else {
            info!("Linked user {} to 3Commas account {}", user_id, account_id);
        }
    }
    if let Err(e) = state
        .store
        .set_binance_credentials(user_id, &request.binance_api_key, &request.binance_api_secret)
        .await
    {
        error!("Failed to store Binance credentials for user {}: {}", user_id, e);
    }
}

fn balances_response(
    user_id: &str,
    account_id: &str,
    balances: Vec<AssetBalance>,
    cached: bool,
) -> Response {
    Json(json!({
        "ok": true,
        "userId": user_id,
        "accountId": account_id,
        "cached": cached,
        "balances": balances,
    }))
    .into_response()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
