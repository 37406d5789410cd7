/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `run`         - Live tagging daemon over a JSON-lines event feed
- `export`      - One-shot export of a recording's tags
- `sessions`    - Listing and inspection of stored sessions
- `credentials` - Status, refresh and key rotation of the credential record

The helpers below wire configuration into the library components so each
handler stays small.
*/

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::credentials::{
    CredentialManager, CredentialPair, CredentialStore, IdentityProvider, TokenCipher,
    TransportControl, TwitchIdentityProvider,
};
use crate::error::{Result, StreamTagsError};
use crate::helix::HelixClient;

pub mod credentials;
pub mod export;
pub mod run;
pub mod sessions;

/// Shared HTTP client for the identity provider and Helix.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("streamtags/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| StreamTagsError::Http(e).into())
}

/// Derives the record key on the blocking pool.
pub(crate) async fn derive_cipher(secret: &str, iterations: u32) -> Result<TokenCipher> {
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || TokenCipher::derive_with_iterations(&secret, iterations))
        .await
        .map_err(|e| StreamTagsError::Encryption(e.to_string()))?
}

/// Opens the credential store at the configured path.
pub(crate) async fn open_store(config: &Config) -> Result<CredentialStore> {
    config.require_encryption_secret()?;
    let iterations = config.credentials.kdf_iterations;
    let cipher = derive_cipher(&config.credentials.encryption_secret, iterations).await?;
    Ok(CredentialStore::new(config.credentials_path(), cipher).with_kdf_iterations(iterations))
}

pub(crate) fn identity_provider(
    config: &Config,
    http: reqwest::Client,
) -> Arc<dyn IdentityProvider> {
    Arc::new(TwitchIdentityProvider::new(
        http,
        config.twitch.token_url.clone(),
        config.twitch.client_id.clone(),
        config.twitch.client_secret.clone(),
    ))
}

/// Builds a credential manager seeded with `initial`.
pub(crate) fn credential_manager(
    config: &Config,
    store: CredentialStore,
    http: reqwest::Client,
    transport: Option<Arc<dyn TransportControl>>,
    initial: CredentialPair,
) -> Arc<CredentialManager> {
    CredentialManager::new(
        store,
        identity_provider(config, http),
        transport,
        config.refresh_policy(),
        initial,
    )
}

/// Builds and initializes the manager the long-running paths use.
///
/// The stored record wins over the configured tokens when it decrypts.
pub(crate) async fn start_credentials(
    config: &Config,
    http: reqwest::Client,
    transport: Option<Arc<dyn TransportControl>>,
) -> Result<Arc<CredentialManager>> {
    config.require_twitch_app()?;
    let store = open_store(config).await?;
    let manager = credential_manager(config, store, http, transport, config.initial_credentials());
    manager.initialize().await?;
    Ok(manager)
}

pub(crate) fn helix_client(
    config: &Config,
    http: reqwest::Client,
    manager: Arc<CredentialManager>,
) -> HelixClient {
    HelixClient::new(
        http,
        config.twitch.api_base.clone(),
        config.twitch.client_id.clone(),
        manager,
    )
}
