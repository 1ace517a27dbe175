use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const CLIENT_CREDENTIALS_GRANT_TYPE: &str = "client_credentials";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies bearer tokens for calls to the central API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a valid access token, fetching a new one if needed.
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialsRequest {
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
    pub grant_type: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth2 client-credentials grant with an in-memory token cache.
pub struct ClientCredentialsGrant {
    client: Client,
    token_url: Url,
    request: CredentialsRequest,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsGrant {
    pub fn new(client: Client, token_url: &str, request: CredentialsRequest) -> Result<Self> {
        let token_url = Url::parse(token_url).map_err(|e| AgentError::InvalidUrl {
            url: token_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            token_url,
            request,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.token_url.clone())
            .json(&self.request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsGrant {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        tracing::debug!(expires_in = ?fresh.expires_in, "Access token refreshed");

        *cached = fresh.expires_in.map(|secs| CachedToken {
            token: fresh.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(secs),
        });

        Ok(fresh.access_token)
    }
}
