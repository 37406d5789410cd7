//! API credential lifecycle
//!
//! The bot holds one access/refresh token pair for the whole process. This
//! module keeps that pair encrypted at rest, renews it before it expires,
//! and tells the live transport to reconnect whenever the access token
//! changes.
//!
//! # Module Layout
//!
//! - [`cipher`]   -- ChaCha20-Poly1305 with a PBKDF2-derived key
//! - [`store`]    -- the encrypted credential record on disk
//! - [`provider`] -- refresh-token exchange with the identity provider
//! - [`manager`]  -- refresh scheduling, retry, key rotation

pub mod cipher;
pub mod manager;
pub mod provider;
pub mod store;

pub use cipher::{Sealed, TokenCipher};
pub use manager::{
    CredentialManager, PendingRefresh, RefreshKind, RefreshOutcome, RefreshPolicy,
    TransportControl,
};
pub use provider::{IdentityProvider, TokenGrant, TwitchIdentityProvider};
pub use store::{CredentialStore, EncryptedCredentialRecord};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Access token plus the refresh token that renews it.
///
/// `expires_at` is `None` for credentials supplied from the environment,
/// whose lifetime is unknown until the first refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Returns `true` once `expires_at` has passed. Pairs with no known
    /// expiry are never considered expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

// Tokens never appear in logs.
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of the current access token for outbound API calls.
#[async_trait]
pub trait AccessTokens: Send + Sync {
    /// The access token to send right now.
    fn access_token(&self) -> String;

    /// Called when an API rejected the current token. Implementations
    /// refresh on demand; a refresh already in flight absorbs the call.
    async fn handle_auth_failure(&self);
}

/// Fixed token, for one-off CLI calls that have no refresh machinery.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokens for StaticToken {
    fn access_token(&self) -> String {
        self.0.clone()
    }

    async fn handle_auth_failure(&self) {
        tracing::warn!("Static access token was rejected");
    }
}
