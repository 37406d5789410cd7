//! Error types for StreamTags
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.
//!
//! The display strings of the lookup and export variants are shown to chat
//! users verbatim, so they are phrased as replies rather than diagnostics.

use thiserror::Error;

/// Main error type for StreamTags operations
///
/// Covers the session and tagging engine, the export path, the credential
/// lifecycle, and the ambient configuration and I/O failures underneath them.
#[derive(Error, Debug)]
pub enum StreamTagsError {
    /// A tag was requested while no stream is live
    #[error("No stream is currently live, nothing to tag")]
    NoActiveSession,

    /// The recording lookup returned nothing for this id
    #[error("VOD {0} was not found")]
    VodNotFound(String),

    /// The recording exists but is not linked to a live stream
    #[error("VOD {0} has no associated stream")]
    NoStreamForVod(String),

    /// The stream has no record on disk or the record has no tags
    #[error("No tags found for stream {0}")]
    NoTagsFound(String),

    /// A platform API lookup failed for a reason other than "not found"
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Credential ciphertext failed authentication or could not be decoded
    #[error("Failed to decrypt credential record")]
    DecryptionFailed,

    /// Encryption setup failed (key derivation or cipher construction)
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Identity provider rejected or failed the refresh token exchange
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Writing a session or credential record failed
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// The live chat transport dropped or could not connect
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    /// Caller lacks the role a command requires
    #[error("{0} is not allowed to use this command")]
    PermissionDenied(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for StreamTags operations
///
/// Uses `anyhow::Error` so context can be attached on the way up; callers
/// that need to branch on a specific failure use
/// `err.downcast_ref::<StreamTagsError>()`.
pub type Result<T> = anyhow::Result<T>;
