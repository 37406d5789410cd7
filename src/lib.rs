//! StreamTags - live stream tagging library
//!
//! This library records moderator tags against a live stream's clock,
//! persists them per stream, and renders them as video deep-links or
//! SubRip subtitles. It also keeps platform credentials encrypted at rest
//! and refreshed ahead of expiry.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `timing`: Offset arithmetic and timestamp formatting
//! - `session`: Session records, the flat-file store, and the live session lifecycle
//! - `export`: Link and subtitle rendering and the recording lookup seam
//! - `credentials`: Token encryption, the credential record, and the refresh scheduler
//! - `helix`: Authenticated Helix API client shared by lookups and moderation
//! - `moderation`: Channel VIP management
//! - `events`: Typed stream events and chat commands
//! - `dispatch`: The single event loop that owns the session engine
//! - `transport`: Connection supervision and the JSON-lines event source
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamtags::session::{SessionManager, SessionStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SessionStore::new("sessions"));
//!     let mut sessions = SessionManager::new(store, 15);
//!     sessions.on_live("40123", chrono::Utc::now()).await?;
//!     sessions.record_tag("mod_a", "great play").await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod export;
pub mod helix;
pub mod moderation;
pub mod persist;
pub mod session;
pub mod timing;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialManager, CredentialPair, CredentialStore};
pub use error::{Result, StreamTagsError};
pub use export::{ExportFormat, Exporter};
pub use session::{Session, SessionManager, SessionStore};

#[cfg(test)]
pub mod test_utils;
