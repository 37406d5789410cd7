//! Typed events delivered by the chat transport
//!
//! Transports translate whatever they receive into [`StreamEvent`]s and
//! push them onto the dispatch channel. Commands carry an optional reply
//! channel; the dispatcher answers every command that has one exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::export::{ExportFormat, ExportPayload};

/// Chat roles relevant to command gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Broadcaster,
    Moderator,
    Vip,
    Subscriber,
    #[serde(other)]
    Viewer,
}

/// The user who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chatter {
    pub name: String,
    pub roles: Vec<Role>,
}

impl Chatter {
    pub fn new(name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            name: name.into(),
            roles,
        }
    }

    /// Broadcasters and moderators may manage the channel.
    pub fn can_moderate(&self) -> bool {
        self.roles
            .iter()
            .any(|r| matches!(r, Role::Broadcaster | Role::Moderator))
    }
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mark the current moment of the live stream.
    Tag { text: String },
    Vip { target: String },
    Unvip { target: String },
    Export { vod_id: String, format: ExportFormat },
}

impl Command {
    /// Parses a command name and its argument string.
    ///
    /// Returns a usage message when the arguments are missing or invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use streamtags::events::Command;
    /// use streamtags::export::ExportFormat;
    ///
    /// assert_eq!(
    ///     Command::parse("export", "123 srt"),
    ///     Ok(Command::Export { vod_id: "123".into(), format: ExportFormat::Srt })
    /// );
    /// assert!(Command::parse("tag", "   ").is_err());
    /// ```
    pub fn parse(name: &str, args: &str) -> std::result::Result<Self, String> {
        let args = args.trim();
        match name.trim().trim_start_matches('!').to_ascii_lowercase().as_str() {
            "tag" => {
                if args.is_empty() {
                    return Err("Usage: !tag <description>".to_string());
                }
                Ok(Command::Tag {
                    text: args.to_string(),
                })
            }
            "vip" => parse_target(args)
                .map(|target| Command::Vip { target })
                .ok_or_else(|| "Usage: !vip <user>".to_string()),
            "unvip" => parse_target(args)
                .map(|target| Command::Unvip { target })
                .ok_or_else(|| "Usage: !unvip <user>".to_string()),
            "export" => {
                let mut parts = args.split_whitespace();
                let vod_id = parts
                    .next()
                    .ok_or_else(|| "Usage: !export <vod id> [links|srt]".to_string())?;
                let format = match parts.next() {
                    Some(f) => f
                        .parse::<ExportFormat>()
                        .map_err(|_| format!("Unknown export format: {f}. Use links or srt"))?,
                    None => ExportFormat::Links,
                };
                Ok(Command::Export {
                    vod_id: vod_id.to_string(),
                    format,
                })
            }
            other => Err(format!("Unknown command: {other}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Tag { .. } => "tag",
            Command::Vip { .. } => "vip",
            Command::Unvip { .. } => "unvip",
            Command::Export { .. } => "export",
        }
    }
}

fn parse_target(args: &str) -> Option<String> {
    args.split_whitespace()
        .next()
        .map(|t| t.trim_start_matches('@').to_string())
        .filter(|t| !t.is_empty())
}

/// What the dispatcher sends back for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Attachment { file_name: String, contents: Vec<u8> },
}

impl From<ExportPayload> for Reply {
    fn from(payload: ExportPayload) -> Self {
        match payload {
            ExportPayload::Reply(text) => Reply::Text(text),
            ExportPayload::Attachment {
                file_name,
                contents,
            } => Reply::Attachment {
                file_name,
                contents,
            },
        }
    }
}

#[derive(Debug)]
pub struct CommandInvocation {
    pub caller: Chatter,
    pub command: Command,
    pub reply: Option<oneshot::Sender<Reply>>,
}

impl CommandInvocation {
    /// Builds an invocation and the receiver its reply will arrive on.
    pub fn with_reply(caller: Chatter, command: Command) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                caller,
                command,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// Sends `reply` if a reply channel is attached. A dropped receiver is
    /// ignored.
    pub fn respond(&mut self, reply: Reply) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(reply);
        }
    }
}

#[derive(Debug)]
pub enum StreamEvent {
    Online {
        stream_id: String,
        started_at: DateTime<Utc>,
    },
    Offline,
    Command(CommandInvocation),
}
