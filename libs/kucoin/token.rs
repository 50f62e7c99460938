//! Session token bootstrap
//!
//! Every WebSocket session starts with a REST call that hands out a
//! short-lived token and the instance servers to connect to. The supervisor
//! only sees the [`SessionTokenProvider`] trait; [`RestTokenProvider`] is the
//! HTTP implementation against KuCoin's bullet endpoints.

use crate::auth::Credentials;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Success code in KuCoin's response envelope
const SUCCESS_CODE: &str = "200000";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Token response has no data")]
    MissingData,

    #[error("Token response lists no instance servers")]
    NoInstanceServers,

    #[error("Private channel requested without API credentials")]
    MissingCredentials,

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Deserialization failed: {0}")]
    DeserializeFailed(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Which bullet endpoint to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelMode {
    #[default]
    Public,
    Private,
}

impl ChannelMode {
    pub fn bullet_path(self) -> &'static str {
        match self {
            ChannelMode::Public => "/api/v1/bullet-public",
            ChannelMode::Private => "/api/v1/bullet-private",
        }
    }

    pub fn is_private(self) -> bool {
        self == ChannelMode::Private
    }
}

/// One WebSocket server offered by the token endpoint
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    /// Milliseconds between keepalive pings
    #[serde(default)]
    pub ping_interval: Option<u64>,
    /// Milliseconds the server waits for a ping
    #[serde(default)]
    pub ping_timeout: Option<u64>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
}

impl InstanceServer {
    /// Server ping interval, or `fallback` when the server did not send one
    pub fn ping_interval_or(&self, fallback: Duration) -> Duration {
        self.ping_interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(fallback)
    }
}

/// Token plus the servers it is valid for
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub token: String,
    pub instance_servers: Vec<InstanceServer>,
}

impl SessionGrant {
    /// First offered server; a parsed grant always has one
    pub fn primary_server(&self) -> Result<&InstanceServer, AuthError> {
        self.instance_servers.first().ok_or(AuthError::NoInstanceServers)
    }
}

#[derive(Debug, Deserialize)]
struct BulletResponse {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<SessionGrant>,
}

/// Validate a bullet response body and extract the grant
pub fn parse_bullet_response(body: &str) -> Result<SessionGrant, AuthError> {
    let response: BulletResponse =
        serde_json::from_str(body).map_err(|e| AuthError::DeserializeFailed(e.to_string()))?;

    let code = match &response.code {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    if code != SUCCESS_CODE {
        return Err(AuthError::ApiError(format!(
            "code {}: {}",
            if code.is_empty() { "<missing>" } else { code.as_str() },
            response.msg.unwrap_or_default()
        )));
    }

    let grant = response.data.ok_or(AuthError::MissingData)?;
    if grant.instance_servers.is_empty() {
        return Err(AuthError::NoInstanceServers);
    }
    Ok(grant)
}

/// Source of session tokens
///
/// Called once per connection attempt. Implementations must not retry
/// internally; retry timing belongs to the reconnect supervisor.
#[async_trait]
pub trait SessionTokenProvider: Send + Sync {
    async fn acquire(&self, mode: ChannelMode) -> Result<SessionGrant, AuthError>;
}

/// Token provider backed by KuCoin's REST API
pub struct RestTokenProvider {
    base_url: String,
    client: Client,
    credentials: Option<Credentials>,
}

impl RestTokenProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials: None,
        })
    }

    /// Enable private tokens
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

#[async_trait]
impl SessionTokenProvider for RestTokenProvider {
    async fn acquire(&self, mode: ChannelMode) -> Result<SessionGrant, AuthError> {
        let path = mode.bullet_path();
        let url = format!("{}{}", self.base_url, path);
        debug!("[KuCoin WS] Requesting {:?} token from {}", mode, url);

        let mut request = self.client.post(&url);
        if mode.is_private() {
            let credentials = self.credentials.as_ref().ok_or(AuthError::MissingCredentials)?;
            let timestamp = chrono::Utc::now().timestamp_millis();
            for (name, value) in credentials.auth_headers("POST", path, "", timestamp)? {
                request = request.header(name, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let grant = parse_bullet_response(&body)?;
        debug!(
            "[KuCoin WS] Token acquired, {} instance server(s)",
            grant.instance_servers.len()
        );
        Ok(grant)
    }
}
