//! Newline-delimited JSON event source
//!
//! Lets the daemon run against a recorded or piped event feed. Each line is
//! one [`WireEvent`]:
//!
//! ```text
//! {"type":"online","stream_id":"40123","started_at":"2024-05-01T18:00:00Z"}
//! {"type":"command","user":"mod_a","roles":["moderator"],"command":"tag","args":"ace"}
//! {"type":"command","user":"mod_a","roles":["moderator"],"command":"export","args":"900 srt"}
//! {"type":"offline"}
//! ```
//!
//! Replies are printed as `@user text` lines; attachments are written into
//! the attachments directory.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, StreamTagsError};
use crate::events::{Chatter, Command, CommandInvocation, Reply, Role, StreamEvent};
use crate::persist::write_atomic;
use crate::transport::{ChatConnector, EventStream};

/// One line of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireEvent {
    Online {
        stream_id: String,
        /// Defaults to the time the line is read.
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
    },
    Offline,
    Command {
        user: String,
        #[serde(default)]
        roles: Vec<Role>,
        command: String,
        #[serde(default)]
        args: String,
    },
}

/// Where command replies go.
#[derive(Debug, Clone)]
pub struct ReplySink {
    lines: mpsc::UnboundedSender<String>,
    attachments_dir: PathBuf,
}

impl ReplySink {
    /// Creates a sink and the receiver its output lines arrive on.
    pub fn new(attachments_dir: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (lines, rx) = mpsc::unbounded_channel();
        (
            Self {
                lines,
                attachments_dir: attachments_dir.into(),
            },
            rx,
        )
    }

    pub async fn deliver(&self, user: &str, reply: Reply) {
        let line = match reply {
            Reply::Text(text) => format!("@{user} {text}"),
            Reply::Attachment {
                file_name,
                contents,
            } => {
                let path = self.attachments_dir.join(attachment_file_name(&file_name));
                match write_atomic(&path, &contents, None).await {
                    Ok(()) => format!("@{user} attachment saved to {}", path.display()),
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "Failed to write attachment");
                        format!("@{user} could not save {file_name}")
                    }
                }
            }
        };
        // A closed receiver means the process is shutting down.
        let _ = self.lines.send(line);
    }
}

/// Reduces a requested attachment name to one plain file name.
///
/// Separators and other characters outside `[A-Za-z0-9._-]` become `_`,
/// as do leading dots, so the result never leaves the directory.
fn attachment_file_name(raw: &str) -> String {
    let mut leading = true;
    let name: String = raw
        .chars()
        .map(|c| {
            let keep = c.is_ascii_alphanumeric() || c == '-' || c == '_' || (c == '.' && !leading);
            leading = leading && c == '.';
            if keep {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "attachment".to_string()
    } else {
        name
    }
}

impl WireEvent {
    /// Converts the wire form into a dispatch event.
    ///
    /// Commands that fail to parse are answered with their usage message
    /// right away and produce no event.
    pub fn into_event(self, sink: &ReplySink) -> Option<StreamEvent> {
        match self {
            WireEvent::Online {
                stream_id,
                started_at,
            } => Some(StreamEvent::Online {
                stream_id,
                started_at: started_at.unwrap_or_else(Utc::now),
            }),
            WireEvent::Offline => Some(StreamEvent::Offline),
            WireEvent::Command {
                user,
                roles,
                command,
                args,
            } => match Command::parse(&command, &args) {
                Ok(command) => {
                    let (invocation, rx) =
                        CommandInvocation::with_reply(Chatter::new(user.clone(), roles), command);
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        if let Ok(reply) = rx.await {
                            sink.deliver(&user, reply).await;
                        }
                    });
                    Some(StreamEvent::Command(invocation))
                }
                Err(usage) => {
                    let sink = sink.clone();
                    tokio::spawn(async move { sink.deliver(&user, Reply::Text(usage)).await });
                    None
                }
            },
        }
    }
}

type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Single-use connector over a buffered reader (stdin or a file).
pub struct JsonLinesConnector {
    reader: Mutex<Option<LineReader>>,
    sink: ReplySink,
}

impl JsonLinesConnector {
    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static, sink: ReplySink) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            sink,
        }
    }
}

#[async_trait]
impl ChatConnector for JsonLinesConnector {
    async fn connect(&self, _access_token: &str) -> Result<EventStream> {
        let reader = self.reader.lock().await.take().ok_or_else(|| {
            StreamTagsError::TransportDisconnected("event feed already consumed".into())
        })?;
        let sink = self.sink.clone();

        let stream = futures::stream::unfold(reader.lines(), move |mut lines| {
            let sink = sink.clone();
            async move {
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() || line.starts_with('#') {
                                continue;
                            }
                            match serde_json::from_str::<WireEvent>(line) {
                                Ok(wire) => {
                                    if let Some(event) = wire.into_event(&sink) {
                                        return Some((event, lines));
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(line = %line, error = %e, "Skipping malformed event");
                                }
                            }
                        }
                        Ok(None) => return None,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to read event feed");
                            return None;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn reconnectable(&self) -> bool {
        false
    }
}
