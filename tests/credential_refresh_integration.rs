/// Integration tests for the credential lifecycle
///
/// A real `TwitchIdentityProvider` talks to a mock token endpoint while the
/// manager persists through an on-disk `CredentialStore`.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use streamtags::credentials::{
    CredentialManager, CredentialPair, CredentialStore, RefreshKind, RefreshOutcome,
    RefreshPolicy, TokenCipher, TwitchIdentityProvider,
};
use streamtags::StreamTagsError;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
mod common;

fn store(dir: &TempDir, secret: &str) -> CredentialStore {
    let cipher =
        TokenCipher::derive_with_iterations(secret, common::TEST_KDF_ITERATIONS).unwrap();
    CredentialStore::new(dir.path().join("credentials.json"), cipher)
        .with_kdf_iterations(common::TEST_KDF_ITERATIONS)
}

fn manager(
    server: &MockServer,
    store: CredentialStore,
    initial: CredentialPair,
) -> Arc<CredentialManager> {
    let provider = TwitchIdentityProvider::new(
        reqwest::Client::new(),
        format!("{}/oauth2/token", server.uri()),
        "cid",
        "csecret",
    );
    CredentialManager::new(
        store,
        Arc::new(provider),
        None,
        RefreshPolicy::default(),
        initial,
    )
}

#[tokio::test]
async fn test_expired_record_is_refreshed_persisted_and_rescheduled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=stored-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "refresh_token": "new-refresh",
            "expires_in": 3600,
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    store(&dir, "secret")
        .persist(&CredentialPair::new(
            "stored-access",
            "stored-refresh",
            Some(Utc::now() - chrono::Duration::minutes(1)),
        ))
        .await
        .unwrap();

    let manager = manager(
        &server,
        store(&dir, "secret"),
        CredentialPair::new("initial-access", "initial-refresh", None),
    );
    let mut tokens = manager.subscribe();
    manager.initialize().await.unwrap();

    assert_eq!(manager.current_pair().access_token, "new-access");
    assert_eq!(tokens.try_recv().unwrap(), "new-access");

    let pending = manager.pending_refresh().expect("next refresh scheduled");
    assert_eq!(pending.kind, RefreshKind::Scheduled);
    assert_eq!(pending.delay, Duration::from_secs(3300));

    // A fresh process with the same secret sees the refreshed pair.
    let reloaded = store(&dir, "secret").load_pair().await.unwrap().unwrap();
    assert_eq!(reloaded.access_token, "new-access");
    assert_eq!(reloaded.refresh_token, "new-refresh");
    manager.shutdown();
}

#[tokio::test]
async fn test_rejected_exchange_keeps_pair_and_schedules_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"message":"Invalid refresh token"}"#),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = manager(
        &server,
        store(&dir, "secret"),
        CredentialPair::new("a", "r", None),
    );

    assert_eq!(manager.refresh_now().await, RefreshOutcome::Failed);
    assert_eq!(manager.current_pair().access_token, "a");
    assert_eq!(manager.consecutive_failures(), 1);
    let pending = manager.pending_refresh().unwrap();
    assert_eq!(pending.kind, RefreshKind::Retry);
    assert_eq!(pending.delay, RefreshPolicy::default().retry_interval);
    assert!(store(&dir, "secret").load().await.unwrap().is_none());
    manager.shutdown();
}

#[tokio::test]
async fn test_tampered_record_fails_to_decrypt() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, "secret");
    store
        .persist(&CredentialPair::new("access", "refresh", None))
        .await
        .unwrap();

    let mut record = store.load().await.unwrap().unwrap();
    record.encrypted_access_token[0] ^= 0x01;
    let err = store.open(&record).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamTagsError>(),
        Some(StreamTagsError::DecryptionFailed)
    ));

    let mut record = store.load().await.unwrap().unwrap();
    record.iv[0] ^= 0x01;
    assert!(store.open(&record).is_err());
}

#[tokio::test]
async fn test_wrong_secret_on_startup_falls_back_to_initial_pair() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    store(&dir, "old-secret")
        .persist(&CredentialPair::new("stored", "stored-refresh", None))
        .await
        .unwrap();

    let manager = manager(
        &server,
        store(&dir, "new-secret"),
        CredentialPair::new("initial", "initial-refresh", None),
    );
    manager.initialize().await.unwrap();

    assert_eq!(manager.current_pair().access_token, "initial");
    let pending = manager.pending_refresh().unwrap();
    assert_eq!(pending.delay, Duration::from_secs(4 * 60 * 60 - 300));
    manager.shutdown();
}
