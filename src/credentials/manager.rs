//! Credential refresh scheduling
//!
//! [`CredentialManager`] is the single owner of the live credential pair.
//! It is constructed once at startup, shared by `Arc`, and drives the
//! refresh cycle:
//!
//! ```text
//! initialize --> scheduled --(timer / 401 / refresh_now)--> refreshing
//!                    ^                                          |
//!                    +-- expires_in - lead <--- success --------+
//!                    +-- retry_interval   <--- failure --------+
//! ```
//!
//! The pending timer is a spawned task tagged with a generation number.
//! Rescheduling aborts the previous task, and a task that wakes after being
//! superseded sees a newer generation and exits without refreshing. A timer
//! that fires while another refresh holds the guard waits for it, then only
//! refreshes if nothing rescheduled in the meantime.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::credentials::{
    AccessTokens, CredentialPair, CredentialStore, IdentityProvider, TokenCipher,
};
use crate::error::{Result, StreamTagsError};

/// Capacity of the token-change broadcast channel. Slow listeners only
/// ever need the latest token, so lagging is harmless.
const LISTENER_CAPACITY: usize = 8;

/// Reconnect interface the scheduler calls after every successful refresh.
#[async_trait]
pub trait TransportControl: Send + Sync {
    async fn reconnect(&self, access_token: &str) -> Result<()>;
}

/// Timing knobs for the refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// How long before expiry a refresh is scheduled.
    pub lead_time: Duration,
    /// Delay before retrying a failed exchange.
    pub retry_interval: Duration,
    /// Stop retrying after this many failures in a row. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Assumed lifetime of a pair whose expiry is unknown.
    pub default_token_lifetime: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(300),
            retry_interval: Duration::from_secs(30),
            max_consecutive_failures: None,
            default_token_lifetime: Duration::from_secs(4 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Ahead of token expiry.
    Scheduled,
    /// After a failed exchange.
    Retry,
}

/// The refresh currently waiting on the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRefresh {
    pub kind: RefreshKind,
    pub delay: Duration,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Failed,
    /// Another refresh held the guard; this trigger was dropped.
    AlreadyInFlight,
}

#[derive(Default)]
struct TimerSlot {
    generation: u64,
    pending: Option<(PendingRefresh, JoinHandle<()>)>,
}

/// Delay until the next scheduled refresh for a token valid `expires_in`.
pub fn refresh_delay(expires_in: Duration, lead_time: Duration) -> Duration {
    expires_in.saturating_sub(lead_time)
}

fn due_at(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct CredentialManager {
    store: CredentialStore,
    provider: Arc<dyn IdentityProvider>,
    transport: Option<Arc<dyn TransportControl>>,
    policy: RefreshPolicy,
    pair: RwLock<CredentialPair>,
    listeners: broadcast::Sender<String>,
    refresh_guard: tokio::sync::Mutex<()>,
    timer: Mutex<TimerSlot>,
    consecutive_failures: AtomicU32,
    shut_down: AtomicBool,
    this: Weak<CredentialManager>,
}

impl CredentialManager {
    /// Creates the manager around the externally supplied `initial` pair.
    ///
    /// Nothing is scheduled until [`initialize`](Self::initialize) runs.
    pub fn new(
        store: CredentialStore,
        provider: Arc<dyn IdentityProvider>,
        transport: Option<Arc<dyn TransportControl>>,
        policy: RefreshPolicy,
        initial: CredentialPair,
    ) -> Arc<Self> {
        let (listeners, _) = broadcast::channel(LISTENER_CAPACITY);
        Arc::new_cyclic(|this| Self {
            store,
            provider,
            transport,
            policy,
            pair: RwLock::new(initial),
            listeners,
            refresh_guard: tokio::sync::Mutex::new(()),
            timer: Mutex::new(TimerSlot::default()),
            consecutive_failures: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Adopts the stored pair when possible and arms the first refresh.
    pub async fn initialize(&self) -> Result<()> {
        let stored = match self.store.load().await {
            Ok(Some(record)) => match self.store.open(&record) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    tracing::warn!(
                        path = %self.store.path().display(),
                        error = %e,
                        "Stored credentials do not decrypt, using initial credentials"
                    );
                    None
                }
            },
            Ok(None) => {
                tracing::info!(
                    path = %self.store.path().display(),
                    "No stored credentials, using initial credentials"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored credentials are unreadable, using initial credentials");
                None
            }
        };

        let Some(pair) = stored else {
            self.schedule(
                refresh_delay(self.policy.default_token_lifetime, self.policy.lead_time),
                RefreshKind::Scheduled,
            );
            return Ok(());
        };

        let expired = pair.is_expired();
        let expires_at = pair.expires_at;
        self.set_pair(pair);

        if expired {
            tracing::info!("Stored credentials have expired, refreshing now");
            self.refresh().await;
            return Ok(());
        }

        let remaining = expires_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .unwrap_or(self.policy.default_token_lifetime);
        tracing::info!(expires_at = ?expires_at, "Adopted stored credentials");
        self.schedule(
            refresh_delay(remaining, self.policy.lead_time),
            RefreshKind::Scheduled,
        );
        Ok(())
    }

    /// Exchanges the refresh token for a new pair.
    ///
    /// On success the pair is adopted, persisted, announced to listeners and
    /// the transport, and the next refresh is scheduled. On failure the
    /// current pair is kept and a retry is scheduled unless the failure cap
    /// has been reached.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Ok(guard) = self.refresh_guard.try_lock() else {
            tracing::debug!("Refresh already in flight, skipping");
            return RefreshOutcome::AlreadyInFlight;
        };
        self.refresh_locked(guard).await
    }

    async fn refresh_locked(&self, _guard: tokio::sync::MutexGuard<'_, ()>) -> RefreshOutcome {
        let refresh_token = self.current_pair().refresh_token;
        match self.provider.refresh(&refresh_token).await {
            Ok(grant) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                let access_token = grant.pair.access_token.clone();
                self.set_pair(grant.pair.clone());

                if let Err(e) = self.store.persist(&grant.pair).await {
                    tracing::error!(error = %e, "Failed to persist refreshed credentials");
                }

                // No receivers is fine.
                let _ = self.listeners.send(access_token.clone());

                if let Some(transport) = &self.transport {
                    if let Err(e) = transport.reconnect(&access_token).await {
                        tracing::warn!(error = %e, "Transport reconnect after refresh failed");
                    }
                }

                let delay = refresh_delay(grant.expires_in, self.policy.lead_time);
                tracing::info!(next_refresh_secs = delay.as_secs(), "Credentials refreshed");
                self.schedule(delay, RefreshKind::Scheduled);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(error = %e, consecutive_failures = failures, "Credential refresh failed");

                match self.policy.max_consecutive_failures {
                    Some(max) if failures >= max => {
                        tracing::error!(
                            consecutive_failures = failures,
                            "Giving up on credential refresh"
                        );
                        self.cancel_timer();
                    }
                    _ => self.schedule(self.policy.retry_interval, RefreshKind::Retry),
                }
                RefreshOutcome::Failed
            }
        }
    }

    /// On-demand refresh.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.refresh().await
    }

    /// Re-seals the live pair under a key derived from `new_secret` and
    /// persists it. The tokens are unchanged, so nothing is announced.
    pub async fn rotate_key(&self, new_secret: &str) -> Result<()> {
        let iterations = self.store.kdf_iterations();
        let secret = new_secret.to_string();
        let cipher = tokio::task::spawn_blocking(move || {
            TokenCipher::derive_with_iterations(&secret, iterations)
        })
        .await
        .map_err(|e| StreamTagsError::Encryption(e.to_string()))??;

        // Holding the guard keeps a concurrent refresh from persisting under
        // the old key after the swap.
        let _guard = self.refresh_guard.lock().await;
        self.store.rotate_key(cipher)?;
        self.store.persist(&self.current_pair()).await?;
        tracing::info!(path = %self.store.path().display(), "Rotated credential encryption key");
        Ok(())
    }

    /// Cancels the pending refresh timer. Later refreshes still run but
    /// never re-arm it.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.cancel_timer();
        tracing::debug!("Credential manager shut down");
    }

    /// Receives every new access token after a successful refresh.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.listeners.subscribe()
    }

    pub fn current_pair(&self) -> CredentialPair {
        self.pair
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending_refresh(&self) -> Option<PendingRefresh> {
        self.lock_timer()
            .pending
            .as_ref()
            .map(|(pending, _)| pending.clone())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn set_pair(&self, pair: CredentialPair) {
        *self.pair.write().unwrap_or_else(PoisonError::into_inner) = pair;
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, TimerSlot> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(&self, delay: Duration, kind: RefreshKind) {
        let mut slot = self.lock_timer();
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::debug!(kind = ?kind, "Credential manager is shut down, not scheduling");
            return;
        }
        if let Some((_, handle)) = slot.pending.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let this = self.this.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = this.upgrade() else {
                return;
            };
            manager.fire_timer(generation).await;
        });

        let pending = PendingRefresh {
            kind,
            delay,
            due_at: due_at(delay),
        };
        tracing::debug!(kind = ?kind, delay_secs = delay.as_secs(), "Scheduled credential refresh");
        slot.pending = Some((pending, handle));
    }

    async fn fire_timer(&self, generation: u64) {
        if !self.claim_timer(generation) {
            return;
        }
        let guard = self.refresh_guard.lock().await;
        if self.lock_timer().generation != generation {
            tracing::debug!("Timer superseded while a refresh was in flight");
            return;
        }
        self.refresh_locked(guard).await;
    }

    /// Clears the slot if `generation` is still current.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut slot = self.lock_timer();
        if slot.generation != generation {
            return false;
        }
        slot.pending = None;
        true
    }

    fn cancel_timer(&self) {
        let mut slot = self.lock_timer();
        slot.generation += 1;
        if let Some((_, handle)) = slot.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for CredentialManager {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[async_trait]
impl AccessTokens for CredentialManager {
    fn access_token(&self) -> String {
        self.current_pair().access_token
    }

    async fn handle_auth_failure(&self) {
        tracing::warn!("Access token rejected, refreshing on demand");
        self.refresh().await;
    }
}
