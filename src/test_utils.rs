//! Test utilities for StreamTags
//!
//! Shared fixtures for unit tests: temporary directories, a fixed clock
//! origin, and fakes for the credential and moderation seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::credentials::AccessTokens;
use crate::error::{Result, StreamTagsError};
use crate::export::{VodInfo, VodResolver};
use crate::moderation::ChannelModerator;

/// Create a temporary directory for testing
///
/// # Panics
///
/// Panics if the directory cannot be created
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Fixed stream start used across tests: 2024-05-01T18:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Assert that an error is the given [`StreamTagsError`] variant
///
/// # Panics
///
/// Panics if the error does not downcast to a matching variant
pub fn assert_stream_error(err: &anyhow::Error, matches: fn(&StreamTagsError) -> bool) {
    match err.downcast_ref::<StreamTagsError>() {
        Some(inner) if matches(inner) => {}
        _ => panic!("unexpected error: {err:?}"),
    }
}

/// Token source whose token becomes `"fresh"` after the first auth failure.
pub struct RotatingTokens {
    current: Mutex<String>,
    failures: AtomicUsize,
}

impl RotatingTokens {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(token.to_string()),
            failures: AtomicUsize::new(0),
        })
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccessTokens for RotatingTokens {
    fn access_token(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    async fn handle_auth_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = "fresh".to_string();
    }
}

/// Moderator that records every VIP change instead of calling the API.
#[derive(Default)]
pub struct RecordingModerator {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelModerator for RecordingModerator {
    async fn add_vip(&self, login: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("+{login}"));
        Ok(())
    }

    async fn remove_vip(&self, login: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("-{login}"));
        Ok(())
    }
}

/// Recording lookup answered from a fixed table.
#[derive(Default)]
pub struct StaticResolver(pub HashMap<String, VodInfo>);

impl StaticResolver {
    pub fn with(vods: Vec<VodInfo>) -> Self {
        Self(vods.into_iter().map(|v| (v.id.clone(), v)).collect())
    }
}

#[async_trait]
impl VodResolver for StaticResolver {
    async fn resolve(&self, vod_id: &str) -> Result<Option<VodInfo>> {
        Ok(self.0.get(vod_id).cloned())
    }
}

/// A recording of `stream_id` at `https://www.twitch.tv/videos/{id}`.
pub fn vod(id: &str, stream_id: Option<&str>) -> VodInfo {
    VodInfo {
        id: id.to_string(),
        url: format!("https://www.twitch.tv/videos/{id}"),
        stream_id: stream_id.map(str::to_string),
    }
}
