use crate::token::AuthError;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// API key version sent with every signed request
pub const API_KEY_VERSION: &str = "2";

pub const ENV_API_KEY: &str = "KUCOIN_API_KEY";
pub const ENV_API_SECRET: &str = "KUCOIN_API_SECRET";
pub const ENV_API_PASSPHRASE: &str = "KUCOIN_API_PASSPHRASE";

/// KuCoin API credentials
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    api_passphrase: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_passphrase", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        api_passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            api_passphrase: api_passphrase.into(),
        }
    }

    /// Read credentials from the environment
    ///
    /// Returns `None` unless all three variables are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Some(Self::new(
            read(ENV_API_KEY)?,
            read(ENV_API_SECRET)?,
            read(ENV_API_PASSPHRASE)?,
        ))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base64 HMAC-SHA256 of `payload` keyed with the API secret
    pub fn sign(&self, payload: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Headers for a signed request
    ///
    /// The signed payload is `timestamp + METHOD + path + body`; with key
    /// version 2 the passphrase is itself signed with the secret.
    pub fn auth_headers(
        &self,
        method: &str,
        path: &str,
        body: &str,
        timestamp_ms: i64,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp = timestamp_ms.to_string();
        let signature = self.sign(&format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body))?;
        let passphrase = self.sign(&self.api_passphrase)?;

        Ok(vec![
            ("KC-API-KEY", self.api_key.clone()),
            ("KC-API-SIGN", signature),
            ("KC-API-TIMESTAMP", timestamp),
            ("KC-API-PASSPHRASE", passphrase),
            ("KC-API-KEY-VERSION", API_KEY_VERSION.to_string()),
        ])
    }
}
