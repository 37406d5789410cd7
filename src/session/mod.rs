//! Stream sessions and moderator tags
//!
//! A [`Session`] is one continuous broadcast, identified by the provider's
//! stream id. Moderators annotate it with [`Tag`]s while it is live; each
//! tag caches its offset into the recording at creation time so later
//! changes to the session's delay never move existing tags.
//!
//! # Module Layout
//!
//! - [`store`]   -- whole-session JSON records, one file per stream id
//! - [`manager`] -- the single active session and its lifecycle

pub mod manager;
pub mod store;

pub use manager::SessionManager;
pub use store::{SessionReader, SessionStore, SessionSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timing::elapsed_ms;

/// A moderator-authored, timestamped annotation within a session.
///
/// Fields are private so the cached offset cannot be changed once the tag
/// exists; construct tags through [`Session::append_tag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    absolute_time: DateTime<Utc>,

    /// Offset in milliseconds, cached when the tag was created. Records
    /// written before offsets were cached lack this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relative_offset: Option<i64>,

    moderator_name: String,
    text: String,
}

impl Tag {
    pub fn absolute_time(&self) -> DateTime<Utc> {
        self.absolute_time
    }

    /// The cached offset, if this tag was written with one.
    pub fn cached_offset_ms(&self) -> Option<i64> {
        self.relative_offset
    }

    pub fn moderator_name(&self) -> &str {
        &self.moderator_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// One broadcast from online to offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    id: String,
    start_time: DateTime<Utc>,
    #[serde(default)]
    delay_seconds: u32,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl Session {
    /// Creates an empty session.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use streamtags::session::Session;
    ///
    /// let session = Session::new("40123456789", Utc::now(), 15);
    /// assert!(session.tags().is_empty());
    /// ```
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>, delay_seconds: u32) -> Self {
        Self {
            id: id.into(),
            start_time,
            delay_seconds,
            tags: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn delay_seconds(&self) -> u32 {
        self.delay_seconds
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Appends a tag recorded at `at`, computing and caching its offset.
    pub fn append_tag(
        &mut self,
        moderator_name: impl Into<String>,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) -> &Tag {
        let offset = elapsed_ms(at, self.start_time, self.delay_seconds);
        self.tags.push(Tag {
            absolute_time: at,
            relative_offset: Some(offset),
            moderator_name: moderator_name.into(),
            text: text.into(),
        });
        &self.tags[self.tags.len() - 1]
    }

    /// Offset of `tag` into the recording.
    ///
    /// Tags without a cached offset are backfilled with a zero delay rather
    /// than the session's stored delay. The backfill is never written back.
    pub fn offset_of(&self, tag: &Tag) -> i64 {
        tag.relative_offset
            .unwrap_or_else(|| elapsed_ms(tag.absolute_time, self.start_time, 0))
    }

    /// Each tag paired with its offset, in insertion order.
    pub fn timed_tags(&self) -> impl Iterator<Item = (i64, &Tag)> + '_ {
        self.tags.iter().map(move |tag| (self.offset_of(tag), tag))
    }
}
