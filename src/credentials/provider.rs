//! Refresh-token exchange with the identity provider

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use crate::credentials::CredentialPair;
use crate::error::{Result, StreamTagsError};

/// Result of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub pair: CredentialPair,
    /// Lifetime reported by the provider, measured from the response.
    pub expires_in: Duration,
}

/// Exchanges a refresh token for a new credential pair.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

/// OAuth token endpoint client (`POST id.twitch.tv/oauth2/token`).
pub struct TwitchIdentityProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl TwitchIdentityProvider {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for TwitchIdentityProvider {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Token exchange request failed");
                StreamTagsError::TokenExchangeFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token endpoint returned error");
            return Err(StreamTagsError::TokenExchangeFailed(format!("{status}: {body}")).into());
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            StreamTagsError::TokenExchangeFailed(format!("invalid token response: {e}"))
        })?;

        let expires_in = Duration::from_secs(token.expires_in);
        let expires_at = chrono::Duration::from_std(expires_in)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));

        tracing::info!(expires_in_secs = token.expires_in, "Exchanged refresh token");
        Ok(TokenGrant {
            pair: CredentialPair::new(token.access_token, token.refresh_token, expires_at),
            expires_in,
        })
    }
}
