//! Master-key request signing for the Cosmos REST gateway.

use crate::error::{StoreError, StoreResult};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ring::hmac;

const TOKEN_TYPE: &str = "master";
const TOKEN_VERSION: &str = "1.0";

/// Signing key decoded from the account's base64 master key.
pub struct MasterKey {
    key: hmac::Key,
}

impl MasterKey {
    pub fn from_base64(encoded: &str) -> StoreResult<Self> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|err| StoreError::Config(format!("account key is not valid base64: {err}")))?;
        if raw.is_empty() {
            return Err(StoreError::Config("account key is empty".to_string()));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, &raw),
        })
    }

    /// Build the url-encoded `authorization` header value for one request.
    ///
    /// `resource_type` is `dbs`, `colls`, `docs` or empty for the account;
    /// `resource_link` is the link of the addressed resource (or its parent for feeds).
    pub fn authorization(
        &self,
        verb: &str,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> String {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.to_ascii_lowercase(),
            resource_type.to_ascii_lowercase(),
            resource_link,
            date.to_ascii_lowercase()
        );
        let tag = hmac::sign(&self.key, payload.as_bytes());
        let signature = STANDARD.encode(tag.as_ref());
        let token = format!("type={TOKEN_TYPE}&ver={TOKEN_VERSION}&sig={signature}");
        url_encode(&token)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// The `x-ms-date` header value: RFC 1123 in GMT.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// Only the characters a master token can contain need escaping.
fn url_encode(token: &str) -> String {
    let mut out = String::with_capacity(token.len() + 16);
    for ch in token.chars() {
        match ch {
            '=' => out.push_str("%3D"),
            '&' => out.push_str("%26"),
            '+' => out.push_str("%2B"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
    out
}
