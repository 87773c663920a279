//! 3Commas request signing
//!
//! The upstream recomputes the HMAC over the exact string it receives, so the
//! canonical body produced here is also the body (or query) that gets sent.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use urlencoding::encode;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A request ready to be sent to the signed API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub path: String,
    /// Parameters in byte-wise ascending key order.
    pub sorted_params: Vec<(String, String)>,
    /// `k=v&k=v`, each side percent-encoded.
    pub body: String,
    /// Lowercase hex HMAC-SHA256.
    pub signature: String,
}

impl SignedRequest {
    /// The exact string the signature was computed over.
    pub fn signed_string(&self) -> String {
        signed_string(&self.path, &self.body)
    }

    /// `base + path`, with the body appended as a query string when present.
    pub fn query_url(&self, base_url: &str) -> String {
        if self.body.is_empty() {
            format!("{}{}", base_url, self.path)
        } else {
            format!("{}{}?{}", base_url, self.path, self.body)
        }
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        self.sorted_params.iter().map(|(k, _)| k.as_str()).collect()
    }
}

/// Sign `params` for `path` with `secret`.
pub fn sign<I, K, V>(path: &str, params: I, secret: &str) -> Result<SignedRequest>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let sorted_params = sort_params(params);
    let body = encode_pairs(&sorted_params);
    let signature = sign_payload(path, &body, secret)?;

    Ok(SignedRequest {
        path: path.to_string(),
        sorted_params,
        body,
        signature,
    })
}

/// Canonical form body: keys sorted byte-wise, each key and value
/// percent-encoded, pairs joined with `&`.
pub fn build_form_body<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    encode_pairs(&sort_params(params))
}

/// HMAC-SHA256 over `path` or `path?body`, as lowercase hex.
pub fn sign_payload(path: &str, body: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Crypto(format!("HMAC init failed: {}", e)))?;

    mac.update(signed_string(path, body).as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

fn signed_string(path: &str, body: &str) -> String {
    if body.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, body)
    }
}

fn sort_params<I, K, V>(params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    // String's Ord compares bytes, never locale.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
