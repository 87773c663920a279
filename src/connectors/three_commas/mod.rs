//! 3Commas signed REST API
//!
//! Account linking and account-info reads, signed per request with the
//! operator's key pair.

pub mod rest_api;


pub use rest_api::{extract_balances, CreateAccountRequest, DebugBuild, ThreeCommasRestClient};

pub mod config {
    pub const ACCOUNTS_PATH: &str = "/public/api/ver1/accounts";
    pub const ACCOUNTS_NEW_PATH: &str = "/public/api/ver1/accounts/new";
    pub const ACCOUNT_INFO_SUFFIX: &str = "/account_info";

    pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
    pub const DEFAULT_ACCOUNT_NAME: &str = "New account";
    pub const ACCOUNT_TYPE_BINANCE: &str = "binance";

    pub const HEADER_API_KEY: &str = "APIKEY";
    pub const HEADER_SIGNATURE: &str = "Signature";

    /// `/public/api/ver1/accounts/{id}/account_info` with the id percent-encoded.
    pub fn account_info_path(account_id: &str) -> String {
        format!(
            "{}/{}{}",
            ACCOUNTS_PATH,
            urlencoding::encode(account_id),
            ACCOUNT_INFO_SUFFIX
        )
    }
}
