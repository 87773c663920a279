//! Account-related types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One asset line of an account balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub balance: f64,
}

/// Linked-account metadata stored per user.
///
/// Every field is optional; updates merge into the existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccountRecord {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binance_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binance_api_secret: Option<String>,
}

/// Binance API credentials linked to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl UserAccountRecord {
    pub fn binance_credentials(&self) -> Option<BinanceCredentials> {
        match (&self.binance_api_key, &self.binance_api_secret) {
            (Some(api_key), Some(api_secret)) => Some(BinanceCredentials {
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => None,
        }
    }
}

/// Account ids arrive as strings or bare numbers depending on who wrote them.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_account_id_reads_as_string() {
        let record: UserAccountRecord = serde_json::from_value(json!({"accountId": 42})).unwrap();
        assert_eq!(record.account_id.as_deref(), Some("42"));

        let record: UserAccountRecord =
            serde_json::from_value(json!({"accountId": "7", "note": "x"})).unwrap();
        assert_eq!(record.account_id.as_deref(), Some("7"));

        let record: UserAccountRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(record.account_id, None);
    }
}
