//! Credential maintenance commands

use chrono::Utc;
use colored::Colorize;

use crate::commands::{credential_manager, http_client, open_store};
use crate::config::Config;
use crate::credentials::{CredentialStore, RefreshOutcome};
use crate::error::{Result, StreamTagsError};

/// What `credentials status` found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Missing,
    Unreadable(String),
    Undecryptable,
    Valid {
        expires_at: Option<chrono::DateTime<Utc>>,
        expired: bool,
    },
}

/// Inspects the stored record without modifying it.
pub async fn inspect(store: &CredentialStore) -> RecordStatus {
    let record = match store.load().await {
        Ok(Some(record)) => record,
        Ok(None) => return RecordStatus::Missing,
        Err(e) => return RecordStatus::Unreadable(e.to_string()),
    };
    match store.open(&record) {
        Ok(pair) => RecordStatus::Valid {
            expires_at: pair.expires_at,
            expired: pair.is_expired(),
        },
        Err(_) => RecordStatus::Undecryptable,
    }
}

/// Reports whether a record exists, its expiry, and whether it decrypts.
pub async fn show_status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    println!("\nCredential record\n");
    println!("Path:           {}", store.path().display());

    match inspect(&store).await {
        RecordStatus::Missing => println!("Status:         {}", "missing".yellow()),
        RecordStatus::Unreadable(reason) => {
            println!("Status:         {} ({})", "unreadable".red(), reason)
        }
        RecordStatus::Undecryptable => println!(
            "Status:         {}",
            "does not decrypt with the configured secret".red()
        ),
        RecordStatus::Valid {
            expires_at,
            expired,
        } => {
            println!("Status:         {}", "ok".green());
            match expires_at {
                Some(at) if expired => {
                    println!("Expires:        {} ({})", at.to_rfc3339(), "expired".red())
                }
                Some(at) => {
                    let remaining = at - Utc::now();
                    println!(
                        "Expires:        {} (in {}m)",
                        at.to_rfc3339(),
                        remaining.num_minutes()
                    );
                }
                None => println!("Expires:        unknown"),
            }
        }
    }
    println!();
    Ok(())
}

/// Exchanges the refresh token now and persists the new pair.
///
/// # Errors
///
/// Returns [`StreamTagsError::TokenExchangeFailed`] if the provider rejects
/// the exchange
pub async fn refresh(config: &Config) -> Result<()> {
    config.require_twitch_app()?;
    let store = open_store(config).await?;
    let initial = match store.load_pair().await {
        Ok(Some(pair)) => pair,
        Ok(None) => config.initial_credentials(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored credentials unusable, refreshing from configured tokens");
            config.initial_credentials()
        }
    };
    if initial.refresh_token.is_empty() {
        return Err(StreamTagsError::Config(
            "No refresh token available (store a record or set twitch.refresh_token)".to_string(),
        )
        .into());
    }

    let manager = credential_manager(config, store, http_client()?, None, initial);
    let outcome = manager.refresh_now().await;
    manager.shutdown();

    match outcome {
        RefreshOutcome::Refreshed => {
            let pair = manager.current_pair();
            let expiry = pair
                .expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "{} (expires {})",
                "Credentials refreshed".green(),
                expiry
            );
            Ok(())
        }
        RefreshOutcome::Failed | RefreshOutcome::AlreadyInFlight => Err(
            StreamTagsError::TokenExchangeFailed("refresh did not complete, see log".to_string())
                .into(),
        ),
    }
}

/// Re-encrypts the stored record under `new_secret`.
///
/// # Errors
///
/// Returns error if no record exists or it does not decrypt under the
/// current secret
pub async fn rotate_key(config: &Config, new_secret: &str) -> Result<()> {
    if new_secret.is_empty() {
        return Err(StreamTagsError::Config("New secret must not be empty".to_string()).into());
    }
    let store = open_store(config).await?;
    let pair = store.load_pair().await?.ok_or_else(|| {
        StreamTagsError::Config(format!(
            "No credential record at {}",
            store.path().display()
        ))
    })?;

    let manager = credential_manager(config, store, http_client()?, None, pair);
    manager.rotate_key(new_secret).await?;
    println!(
        "{} Update credentials.encryption_secret to the new value.",
        "Encryption key rotated.".green()
    );
    Ok(())
}
