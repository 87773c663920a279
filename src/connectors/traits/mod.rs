//! Seams between the router and upstream services

use async_trait::async_trait;
use serde_json::Value;

use crate::connectors::three_commas::{CreateAccountRequest, DebugBuild};
use crate::error::Result;

/// Signed 3Commas operations used by the HTTP layer.
///
/// Implementations answer `Err(AppError::Config)` before any network call when
/// credentials are missing, and `Err(AppError::Upstream)` for statuses >= 400.
#[async_trait]
pub trait ThreeCommasApi: Send + Sync {
    /// Link a Binance account. The returned body always carries `id` or
    /// `account_id`.
    async fn create_binance_account(&self, request: &CreateAccountRequest) -> Result<Value>;

    /// Raw `account_info` body for one linked account.
    async fn get_account_balances(&self, account_id: &str) -> Result<Value>;

    /// `GET /accounts` with `params` signed as the query string.
    async fn list_accounts(&self, params: &[(String, String)]) -> Result<Value>;

    /// Build the create-account request without sending it.
    fn debug_build(&self, request: &CreateAccountRequest) -> Result<DebugBuild>;
}
