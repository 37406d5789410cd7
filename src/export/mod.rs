//! Tag export for recordings
//!
//! Given a recording (VOD) id, the [`Exporter`] resolves the live stream it
//! was recorded from, loads that stream's session record, and renders the
//! tags in one of two formats:
//!
//! - [`ExportFormat::Links`] -- a numbered list of Markdown deep-links into
//!   the recording, returned as a chat reply
//! - [`ExportFormat::Srt`] -- SubRip subtitle cues, returned as a `.srt`
//!   attachment
//!
//! # Module Layout
//!
//! - [`helix`] -- [`VodResolver`] backed by the Twitch Helix videos API

pub mod helix;

pub use helix::HelixVodResolver;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamTagsError};
use crate::session::{Session, SessionReader};
use crate::timing::{format_link_timestamp, format_subtitle_timestamp};

/// How long each subtitle cue stays on screen, regardless of the next tag.
pub const SUBTITLE_CUE_MS: i64 = 15_000;

/// A recording as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodInfo {
    pub id: String,
    pub url: String,
    /// Live stream the recording was captured from. Highlights and uploads
    /// have none.
    pub stream_id: Option<String>,
}

/// Looks recordings up by id.
#[async_trait]
pub trait VodResolver: Send + Sync {
    /// Returns `None` when the platform has no recording with this id.
    async fn resolve(&self, vod_id: &str) -> Result<Option<VodInfo>>;
}

/// Target format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Links,
    Srt,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Links => write!(f, "links"),
            ExportFormat::Srt => write!(f, "srt"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = StreamTagsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "links" | "link" | "timestamps" => Ok(ExportFormat::Links),
            "srt" | "subtitles" => Ok(ExportFormat::Srt),
            other => Err(StreamTagsError::Config(format!(
                "Unknown export format: {other}. Must be one of: links, srt"
            ))),
        }
    }
}

/// What an export hands back to the chat layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPayload {
    /// Plain text reply.
    Reply(String),
    /// Downloadable file, UTF-8 encoded.
    Attachment { file_name: String, contents: Vec<u8> },
}

/// Renders tags as numbered Markdown deep-links into `video_url`.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use streamtags::export::render_links;
/// use streamtags::session::Session;
///
/// let start = Utc::now();
/// let mut session = Session::new("s1", start, 0);
/// session.append_tag("mod", "first blood", start + Duration::seconds(75));
///
/// assert_eq!(
///     render_links(&session, "https://www.twitch.tv/videos/1"),
///     "1 - [0h1m15s](<https://www.twitch.tv/videos/1?t=0h1m15s>) : first blood"
/// );
/// ```
pub fn render_links(session: &Session, video_url: &str) -> String {
    session
        .timed_tags()
        .enumerate()
        .map(|(i, (offset, tag))| {
            let ts = format_link_timestamp(offset);
            format!("{} - [{ts}](<{video_url}?t={ts}>) : {}", i + 1, tag.text())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders tags as SubRip cues, each shown for [`SUBTITLE_CUE_MS`].
///
/// Cues for tags closer together than the cue length overlap; they are not
/// merged.
pub fn render_subtitles(session: &Session) -> String {
    session
        .timed_tags()
        .enumerate()
        .map(|(i, (offset, tag))| {
            format!(
                "{}\n{},000 --> {},000\n{}\n\n",
                i + 1,
                format_subtitle_timestamp(offset),
                format_subtitle_timestamp(offset + SUBTITLE_CUE_MS),
                tag.text()
            )
        })
        .collect()
}

/// Resolves recordings to sessions and renders their tags.
pub struct Exporter {
    resolver: Arc<dyn VodResolver>,
    sessions: Arc<dyn SessionReader>,
}

impl Exporter {
    pub fn new(resolver: Arc<dyn VodResolver>, sessions: Arc<dyn SessionReader>) -> Self {
        Self { resolver, sessions }
    }

    /// Exports the tags of the stream behind `vod_id`.
    ///
    /// # Errors
    ///
    /// - [`StreamTagsError::VodNotFound`] when the lookup finds nothing
    /// - [`StreamTagsError::NoStreamForVod`] when the recording has no
    ///   stream id (no session record is read in that case)
    /// - [`StreamTagsError::NoTagsFound`] when the record is missing or empty
    pub async fn export(&self, vod_id: &str, format: ExportFormat) -> Result<ExportPayload> {
        let vod = self
            .resolver
            .resolve(vod_id)
            .await?
            .ok_or_else(|| StreamTagsError::VodNotFound(vod_id.to_string()))?;

        let stream_id = vod
            .stream_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StreamTagsError::NoStreamForVod(vod_id.to_string()))?;

        let session = self
            .sessions
            .read_session(stream_id)
            .await?
            .filter(|s| !s.tags().is_empty())
            .ok_or_else(|| StreamTagsError::NoTagsFound(stream_id.to_string()))?;

        tracing::info!(
            vod_id = %vod_id,
            stream_id = %stream_id,
            tags = session.tags().len(),
            format = %format,
            "Exporting tags"
        );

        Ok(match format {
            ExportFormat::Links => ExportPayload::Reply(render_links(&session, &vod.url)),
            ExportFormat::Srt => ExportPayload::Attachment {
                file_name: format!("{vod_id}.srt"),
                contents: render_subtitles(&session).into_bytes(),
            },
        })
    }
}
