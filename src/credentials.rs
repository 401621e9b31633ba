//! GitHub App installation tokens.
//!
//! `CredentialCache` hands out a cached installation token and refreshes it
//! through a `TokenExchanger` once it is within [`REFRESH_BUFFER`] of expiry.
//! Readers take a shared lock on the fast path; a refresh takes the exclusive
//! lock and re-checks before exchanging, so concurrent callers that find the
//! cache stale collapse onto a single exchange.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::CredentialError;

/// Tokens are refreshed once they have less than this much validity left.
pub const REFRESH_BUFFER: TimeDelta = TimeDelta::minutes(5);

/// Lifetime requested for the signed app assertion.
const ASSERTION_TTL: TimeDelta = TimeDelta::minutes(10);

/// Backdating applied to `iat` to tolerate clock drift against GitHub.
const CLOCK_SKEW: TimeDelta = TimeDelta::seconds(60);

/// An access token and the moment it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>, buffer: TimeDelta) -> bool {
        !self.token.is_empty() && now < self.expires_at - buffer
    }
}

/// Trades credentials for a new access token.
/// Real implementation: `GitHubAppExchanger`. Test double: `CountingExchanger`.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, CredentialError>;
}

/// Process-lifetime cache of one installation token.
pub struct CredentialCache {
    exchanger: Box<dyn TokenExchanger>,
    cached: RwLock<Option<AccessToken>>,
    buffer: TimeDelta,
}

impl CredentialCache {
    pub fn new(exchanger: impl TokenExchanger + 'static) -> Self {
        Self {
            exchanger: Box::new(exchanger),
            cached: RwLock::new(None),
            buffer: REFRESH_BUFFER,
        }
    }

    /// Return a token with at least the refresh buffer of validity left,
    /// exchanging for a new one when needed.
    ///
    /// A failed exchange leaves the cached value untouched and returns the error.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref()
                && token.is_fresh(Utc::now(), self.buffer)
            {
                return Ok(token.token.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another caller may have refreshed while we waited for the write lock
        if let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now(), self.buffer)
        {
            return Ok(token.token.clone());
        }

        debug!("installation token missing or near expiry, exchanging");
        let fresh = self.exchanger.exchange().await?;
        info!(expires_at = %fresh.expires_at, "refreshed GitHub installation token");
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges an RS256-signed app assertion for an installation token.
pub struct GitHubAppExchanger {
    http: reqwest::Client,
    api_url: String,
    app_id: u64,
    installation_id: u64,
    key: EncodingKey,
}

impl GitHubAppExchanger {
    /// `private_key_pem` may be PKCS#1 or PKCS#8.
    pub fn new(
        api_url: &str,
        app_id: u64,
        installation_id: u64,
        private_key_pem: &str,
    ) -> Result<Self, CredentialError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| CredentialError::Signing(format!("invalid app private key: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id,
            installation_id,
            key,
        })
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let claims = AppClaims {
            iat: (now - CLOCK_SKEW).timestamp(),
            exp: (now + ASSERTION_TTL).timestamp(),
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| CredentialError::Signing(e.to_string()))
    }
}

#[async_trait]
impl TokenExchanger for GitHubAppExchanger {
    async fn exchange(&self) -> Result<AccessToken, CredentialError> {
        let assertion = self.sign_assertion(Utc::now())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, self.installation_id
        );

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", assertion))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ticketsmith")
            .send()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CredentialError::Exchange {
                status: status.as_u16(),
                message,
            });
        }

        let body: InstallationTokenResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
        Ok(AccessToken {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}
