//! Active session lifecycle
//!
//! [`SessionManager`] owns at most one live [`Session`]. It is driven by
//! the dispatch loop, which holds it by value, so every mutation goes
//! through `&mut self` and tag appends are serialized by ownership.
//!
//! ```text
//!  NoSession --went live--> Active --went offline--> NoSession
//!                            |  ^
//!                            +--+ tag appended
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, StreamTagsError};
use crate::session::{Session, SessionStore, Tag};

pub struct SessionManager {
    store: Arc<SessionStore>,
    default_delay_seconds: u32,
    active: Option<Session>,
}

impl SessionManager {
    /// Creates an idle manager.
    ///
    /// # Arguments
    ///
    /// * `store` - Durable record store shared with the export path.
    /// * `default_delay_seconds` - Delay compensation applied to sessions
    ///   created fresh (resumed sessions keep their stored delay).
    pub fn new(store: Arc<SessionStore>, default_delay_seconds: u32) -> Self {
        Self {
            store,
            default_delay_seconds,
            active: None,
        }
    }

    /// Handles a went-live signal.
    ///
    /// Resumes the stored session for `stream_id` when one exists, keeping
    /// its original start time and tags; otherwise starts a fresh session
    /// at `started_at`. A record that cannot be parsed is moved aside and a
    /// fresh session is started in its place.
    ///
    /// # Errors
    ///
    /// Returns [`StreamTagsError::Io`] when the record exists but cannot be
    /// read. The record is left untouched and no session becomes active.
    pub async fn on_live(
        &mut self,
        stream_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<&Session> {
        if let Some(previous) = self.active.take() {
            tracing::warn!(
                previous = %previous.id(),
                next = %stream_id,
                "Went live while another session was active, replacing it"
            );
        }

        let session = match self.store.load(stream_id).await {
            Ok(Some(existing)) => {
                tracing::info!(
                    stream_id = %stream_id,
                    tags = existing.tags().len(),
                    started_at = %existing.start_time(),
                    "Resuming stored session"
                );
                existing
            }
            Ok(None) => {
                tracing::info!(
                    stream_id = %stream_id,
                    started_at = %started_at,
                    delay_seconds = self.default_delay_seconds,
                    "Starting new session"
                );
                Session::new(stream_id, started_at, self.default_delay_seconds)
            }
            Err(e)
                if matches!(
                    e.downcast_ref::<StreamTagsError>(),
                    Some(StreamTagsError::Serialization(_))
                ) =>
            {
                tracing::error!(stream_id = %stream_id, error = %e, "Stored session is malformed");
                match self.store.quarantine(stream_id).await {
                    Ok(path) => {
                        tracing::warn!(path = %path.display(), "Moved unreadable session record aside")
                    }
                    Err(e) => tracing::warn!(error = %e, "Could not move unreadable session record"),
                }
                Session::new(stream_id, started_at, self.default_delay_seconds)
            }
            Err(e) => {
                tracing::error!(stream_id = %stream_id, error = %e, "Could not read stored session");
                return Err(e);
            }
        };

        self.flush(&session).await;
        Ok(self.active.insert(session))
    }

    /// Handles a went-offline signal, returning the session that ended.
    ///
    /// The record stays on disk; only the active pointer is cleared.
    pub fn on_offline(&mut self) -> Option<Session> {
        let ended = self.active.take();
        match &ended {
            Some(session) => tracing::info!(
                stream_id = %session.id(),
                tags = session.tags().len(),
                "Session ended"
            ),
            None => tracing::debug!("Went offline with no active session"),
        }
        ended
    }

    /// Records a tag at the current time.
    pub async fn record_tag(&mut self, moderator: &str, text: &str) -> Result<Tag> {
        self.record_tag_at(moderator, text, Utc::now()).await
    }

    /// Records a tag at `at` and flushes the session.
    ///
    /// # Errors
    ///
    /// Returns [`StreamTagsError::NoActiveSession`] when no stream is live.
    /// Flush failures are logged and do not fail the call; the in-memory
    /// session stays authoritative until the next successful flush.
    pub async fn record_tag_at(
        &mut self,
        moderator: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<Tag> {
        let session = self
            .active
            .as_mut()
            .ok_or(StreamTagsError::NoActiveSession)?;
        let tag = session.append_tag(moderator, text, at).clone();

        tracing::info!(
            stream_id = %session.id(),
            moderator = %moderator,
            offset_ms = tag.cached_offset_ms().unwrap_or_default(),
            "Recorded tag"
        );

        let snapshot = session.clone();
        self.flush(&snapshot).await;
        Ok(tag)
    }

    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Tags of the active session, empty when idle.
    pub fn tags(&self) -> &[Tag] {
        self.active.as_ref().map(Session::tags).unwrap_or_default()
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(Session::start_time)
    }

    async fn flush(&self, session: &Session) {
        if let Err(e) = self.store.save(session).await {
            tracing::error!(
                stream_id = %session.id(),
                error = %e,
                "Failed to persist session, keeping it in memory"
            );
        }
    }
}
