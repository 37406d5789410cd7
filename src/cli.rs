//! Command-line interface definition for StreamTags
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for the live daemon, exports, session inspection
//! and credential maintenance.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::export::ExportFormat;

/// StreamTags - live stream tagging daemon
///
/// Records moderator tags against the live stream clock and exports them
/// as video deep-links or subtitle files.
#[derive(Parser, Debug, Clone)]
#[command(name = "streamtags")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the data directory (sessions and credentials)
    #[arg(long, env = "STREAMTAGS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for StreamTags
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the tagging daemon against a newline-delimited JSON event feed
    Run {
        /// Read events from this file instead of stdin
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// Directory where subtitle attachments are written
        #[arg(long, default_value = ".")]
        attachments_dir: PathBuf,
    },

    /// Export the tags of a recording
    Export {
        /// Recording (VOD) id
        #[arg(long)]
        vod: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Links)]
        format: ExportFormat,

        /// Write the export to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect stored sessions
    Sessions {
        /// Session subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Manage the encrypted credential record
    Credentials {
        /// Credential subcommand
        #[command(subcommand)]
        command: CredentialCommand,
    },
}

/// Session inspection subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List every stored session
    List,

    /// Show the tags of one session
    Show {
        /// Stream id of the session
        id: String,
    },
}

/// Credential maintenance subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CredentialCommand {
    /// Report whether a record exists, its expiry, and whether it decrypts
    Status,

    /// Exchange the refresh token now and persist the result
    Refresh,

    /// Re-encrypt the record under a new secret
    RotateKey {
        /// New encryption secret
        #[arg(long, env = "STREAMTAGS_NEW_ENCRYPTION_SECRET", hide_env_values = true)]
        new_secret: String,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
