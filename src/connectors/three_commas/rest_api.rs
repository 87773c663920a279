//! 3Commas REST client
//!
//! Every call checks credentials, signs, sends and relays the body. Statuses
//! >= 400 come back as `AppError::Upstream` with the parsed body.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::config::*;
use crate::config::ThreeCommasConfig;
use crate::connectors::traits::ThreeCommasApi;
use crate::error::{AppError, Result};
use crate::signing::{sign, SignedRequest};
use crate::types::AssetBalance;

/// Binance key pair to link, plus an optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    #[serde(default)]
    pub binance_api_key: String,
    #[serde(default)]
    pub binance_api_secret: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl CreateAccountRequest {
    pub fn account_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_ACCOUNT_NAME)
    }

    /// Form parameters for `accounts/new`, unsorted.
    pub fn payload(&self) -> Vec<(String, String)> {
        vec![
            ("type".to_string(), ACCOUNT_TYPE_BINANCE.to_string()),
            ("name".to_string(), self.account_name().to_string()),
            ("api_key".to_string(), self.binance_api_key.clone()),
            ("secret".to_string(), self.binance_api_secret.clone()),
            ("types_to_create[]".to_string(), ACCOUNT_TYPE_BINANCE.to_string()),
        ]
    }
}

/// What `create_binance_account` would send.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugBuild {
    pub url: String,
    pub path: String,
    pub payload: BTreeMap<String, String>,
    pub sorted_keys: Vec<String>,
    pub body_string: String,
    pub signature: String,
    pub header_keys: Vec<String>,
    pub header_lens: BTreeMap<String, usize>,
}

pub struct ThreeCommasRestClient {
    client: Client,
    config: ThreeCommasConfig,
}

impl ThreeCommasRestClient {
    pub fn new(config: ThreeCommasConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn send_signed(
        &self,
        method: Method,
        signed: &SignedRequest,
        api_key: &str,
        label: &str,
    ) -> Result<Value> {
        let is_post = method == Method::POST;
        let url = if is_post {
            format!("{}{}", self.base_url(), signed.path)
        } else {
            signed.query_url(self.base_url())
        };

        debug!(
            "3C {} request: url={} path={} headers={{APIKEY: len:{}, Signature: len:{}}}",
            label,
            url,
            signed.path,
            api_key.len(),
            signed.signature.len()
        );

        let mut request = self
            .client
            .request(method, &url)
            .header(HEADER_API_KEY, api_key)
            .header(HEADER_SIGNATURE, signed.signature.as_str())
            .header(USER_AGENT, self.config.user_agent.as_str());
        if is_post {
            request = request
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(signed.body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Connection(format!("3Commas request failed: {}", e)))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Connection(format!("Failed to read 3Commas response: {}", e)))?;
        let body = parse_body(&text);

        debug!("3C {} response: status={} data={}", label, status, body);

        if status >= 400 {
            warn!("3Commas {} failed with status {}", label, status);
            return Err(AppError::Upstream {
                status,
                body,
                retry_after,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ThreeCommasApi for ThreeCommasRestClient {
    async fn create_binance_account(&self, request: &CreateAccountRequest) -> Result<Value> {
        let (api_key, api_secret) = self.config.credentials()?;
        let signed = sign(ACCOUNTS_NEW_PATH, request.payload(), api_secret)?;

        let body = self
            .send_signed(Method::POST, &signed, api_key, "create account")
            .await?;

        if !has_account_id(&body) {
            warn!("3Commas accepted the account but returned no id");
            return Err(AppError::Upstream {
                status: 502,
                body: json!({
                    "message": "3Commas did not return an account id",
                    "response": body,
                }),
                retry_after: None,
            });
        }

        info!("Linked Binance account \"{}\"", request.account_name());
        Ok(body)
    }

    async fn get_account_balances(&self, account_id: &str) -> Result<Value> {
        let (api_key, api_secret) = self.config.credentials()?;
        let path = account_info_path(account_id);
        let signed = sign(&path, Vec::<(String, String)>::new(), api_secret)?;

        self.send_signed(Method::GET, &signed, api_key, "account info")
            .await
    }

    async fn list_accounts(&self, params: &[(String, String)]) -> Result<Value> {
        let (api_key, api_secret) = self.config.credentials()?;
        let signed = sign(ACCOUNTS_PATH, params.iter().cloned(), api_secret)?;

        self.send_signed(Method::GET, &signed, api_key, "list accounts")
            .await
    }

    fn debug_build(&self, request: &CreateAccountRequest) -> Result<DebugBuild> {
        let api_key = self.config.api_key.as_deref().unwrap_or("");
        let api_secret = self.config.api_secret.as_deref().unwrap_or("");
        let signed = sign(ACCOUNTS_NEW_PATH, request.payload(), api_secret)?;

        let header_keys = [HEADER_API_KEY, HEADER_SIGNATURE, "Content-Type", "User-Agent"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let header_lens = BTreeMap::from([
            (HEADER_API_KEY.to_string(), api_key.len()),
            (HEADER_SIGNATURE.to_string(), signed.signature.len()),
        ]);

        Ok(DebugBuild {
            url: format!("{}{}", self.base_url(), ACCOUNTS_NEW_PATH),
            path: ACCOUNTS_NEW_PATH.to_string(),
            payload: request.payload().into_iter().collect(),
            sorted_keys: signed.sorted_keys().iter().map(|k| k.to_string()).collect(),
            body_string: signed.body.clone(),
            signature: signed.signature,
            header_keys,
            header_lens,
        })
    }
}

/// JSON when parseable, otherwise the raw text.
fn parse_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn has_account_id(body: &Value) -> bool {
    ["id", "account_id"].iter().any(|field| match body.get(*field) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    })
}

const BALANCE_LIST_FIELDS: [&str; 3] = ["balances", "assets", "data"];
const ASSET_FIELDS: [&str; 4] = ["currency_code", "asset", "currency", "coin"];
const AMOUNT_FIELDS: [&str; 4] = ["amount", "balance", "free", "position"];

/// Pull `{asset, balance}` lines out of an `account_info` body.
///
/// Accepts a top-level array or one nested under a known key. Lines without
/// an asset name or a numeric amount are skipped.
pub fn extract_balances(body: &Value) -> Vec<AssetBalance> {
    let lines = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => BALANCE_LIST_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(|v| v.as_array()))
            .map(|items| items.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    };

    lines
        .iter()
        .filter_map(|line| {
            let asset = ASSET_FIELDS
                .iter()
                .filter_map(|f| line.get(*f).and_then(|v| v.as_str()))
                .find(|s| !s.is_empty())?;
            let balance = AMOUNT_FIELDS
                .iter()
                .filter_map(|f| line.get(*f))
                .find_map(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                })
                .filter(|b| b.is_finite())?;
            Some(AssetBalance {
                asset: asset.to_string(),
                balance,
            })
        })
        .collect()
}
