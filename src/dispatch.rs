//! The single event loop that owns the session engine
//!
//! Every transport event is funnelled through one `mpsc` channel into
//! [`Dispatcher::run`]. The dispatcher owns the [`SessionManager`] by
//! value, so went-live, went-offline and tag appends are applied strictly
//! in arrival order. Work that only reads (exports) or talks to the
//! platform (VIP changes) is spawned so a slow API call never delays the
//! next tag.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StreamTagsError;
use crate::events::{Command, CommandInvocation, Reply, StreamEvent};
use crate::export::Exporter;
use crate::moderation::ChannelModerator;
use crate::session::SessionManager;
use crate::timing::format_link_timestamp;

/// Renders a failure as the text a chat user sees.
fn reply_for_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StreamTagsError>() {
        Some(known) => known.to_string(),
        None => format!("Something went wrong: {err}"),
    }
}

pub struct Dispatcher {
    sessions: SessionManager,
    exporter: Arc<Exporter>,
    moderator: Arc<dyn ChannelModerator>,
}

impl Dispatcher {
    pub fn new(
        sessions: SessionManager,
        exporter: Arc<Exporter>,
        moderator: Arc<dyn ChannelModerator>,
    ) -> Self {
        Self {
            sessions,
            exporter,
            moderator,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Consumes events until every sender is dropped, then hands the
    /// session engine back.
    pub async fn run(mut self, mut events: mpsc::Receiver<StreamEvent>) -> SessionManager {
        tracing::info!("Dispatch loop started");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::info!("Event channel closed, dispatch loop stopping");
        self.sessions
    }

    pub async fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Online {
                stream_id,
                started_at,
            } => {
                if let Err(e) = self.sessions.on_live(&stream_id, started_at).await {
                    tracing::error!(
                        stream_id = %stream_id,
                        error = %e,
                        "Could not start session, tags are refused until the stream goes live again"
                    );
                }
            }
            StreamEvent::Offline => {
                self.sessions.on_offline();
            }
            StreamEvent::Command(invocation) => self.handle_command(invocation).await,
        }
    }

    async fn handle_command(&mut self, mut invocation: CommandInvocation) {
        tracing::debug!(
            caller = %invocation.caller.name,
            command = invocation.command.name(),
            "Handling command"
        );

        match invocation.command.clone() {
            Command::Tag { text } => {
                let reply = match self.sessions.record_tag(&invocation.caller.name, &text).await {
                    Ok(tag) => format!(
                        "Tag #{} saved at {}",
                        self.sessions.tags().len(),
                        format_link_timestamp(tag.cached_offset_ms().unwrap_or_default())
                    ),
                    Err(e) => reply_for_error(&e),
                };
                invocation.respond(Reply::Text(reply));
            }
            Command::Vip { target } => self.spawn_vip_change(invocation, target, true),
            Command::Unvip { target } => self.spawn_vip_change(invocation, target, false),
            Command::Export { vod_id, format } => {
                let exporter = Arc::clone(&self.exporter);
                tokio::spawn(async move {
                    let reply = match exporter.export(&vod_id, format).await {
                        Ok(payload) => Reply::from(payload),
                        Err(e) => {
                            tracing::info!(vod_id = %vod_id, error = %e, "Export failed");
                            Reply::Text(reply_for_error(&e))
                        }
                    };
                    invocation.respond(reply);
                });
            }
        }
    }

    fn spawn_vip_change(&self, mut invocation: CommandInvocation, target: String, grant: bool) {
        if !invocation.caller.can_moderate() {
            tracing::warn!(caller = %invocation.caller.name, target = %target, "Rejected VIP change");
            let denied = StreamTagsError::PermissionDenied(invocation.caller.name.clone());
            invocation.respond(Reply::Text(denied.to_string()));
            return;
        }

        let moderator = Arc::clone(&self.moderator);
        tokio::spawn(async move {
            let result = if grant {
                moderator.add_vip(&target).await
            } else {
                moderator.remove_vip(&target).await
            };
            let reply = match (result, grant) {
                (Ok(()), true) => format!("{target} is now a VIP"),
                (Ok(()), false) => format!("{target} is no longer a VIP"),
                (Err(e), _) => {
                    tracing::warn!(target = %target, error = %e, "VIP change failed");
                    format!("Could not update VIP status for {target}: {}", reply_for_error(&e))
                }
            };
            invocation.respond(Reply::Text(reply));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Chatter, Role};
    use crate::export::ExportFormat;
    use crate::session::SessionStore;
    use crate::test_utils::{t0, temp_dir, vod, RecordingModerator, StaticResolver};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Harness {
        dispatcher: Dispatcher,
        moderator: Arc<RecordingModerator>,
        dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = temp_dir();
        let store = Arc::new(SessionStore::new(dir.path()));
        let resolver = StaticResolver::with(vec![vod("900", Some("s1")), vod("901", None)]);
        let exporter = Arc::new(Exporter::new(Arc::new(resolver), store.clone()));
        let moderator = Arc::new(RecordingModerator::default());
        Harness {
            dispatcher: Dispatcher::new(SessionManager::new(store, 15), exporter, moderator.clone()),
            moderator,
            dir,
        }
    }

    fn moderator() -> Chatter {
        Chatter::new("mod_a", vec![Role::Moderator])
    }

    async fn ask(dispatcher: &mut Dispatcher, caller: Chatter, command: Command) -> Reply {
        let (invocation, rx) = CommandInvocation::with_reply(caller, command);
        dispatcher.handle(StreamEvent::Command(invocation)).await;
        rx.await.expect("command was answered")
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(t) => t,
            other => panic!("expected text reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tag_while_offline_replies_no_session() {
        let mut h = harness();
        let reply = ask(
            &mut h.dispatcher,
            moderator(),
            Command::Tag { text: "x".into() },
        )
        .await;
        assert_eq!(text(reply), "No stream is currently live, nothing to tag");
    }

    #[tokio::test]
    async fn test_tag_while_live_confirms() {
        let mut h = harness();
        h.dispatcher
            .handle(StreamEvent::Online {
                stream_id: "s1".into(),
                started_at: Utc::now(),
            })
            .await;
        let reply = ask(
            &mut h.dispatcher,
            moderator(),
            Command::Tag {
                text: "first".into(),
            },
        )
        .await;
        assert!(text(reply).starts_with("Tag #1 saved at "));
        assert_eq!(h.dispatcher.sessions().tags()[0].moderator_name(), "mod_a");
    }

    #[tokio::test]
    async fn test_offline_stops_tagging() {
        let mut h = harness();
        h.dispatcher
            .handle(StreamEvent::Online {
                stream_id: "s1".into(),
                started_at: t0(),
            })
            .await;
        h.dispatcher.handle(StreamEvent::Offline).await;
        assert!(h.dispatcher.sessions().session().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_record_leaves_dispatcher_offline() {
        let mut h = harness();
        std::fs::create_dir(h.dir.path().join("s1.json")).unwrap();
        h.dispatcher
            .handle(StreamEvent::Online {
                stream_id: "s1".into(),
                started_at: t0(),
            })
            .await;
        assert!(h.dispatcher.sessions().session().is_none());

        let reply = ask(
            &mut h.dispatcher,
            moderator(),
            Command::Tag { text: "x".into() },
        )
        .await;
        assert_eq!(text(reply), "No stream is currently live, nothing to tag");
        assert!(h.dir.path().join("s1.json").is_dir());
    }

    #[tokio::test]
    async fn test_export_of_live_session_renders_links() {
        let mut h = harness();
        h.dispatcher
            .handle(StreamEvent::Online {
                stream_id: "s1".into(),
                started_at: Utc::now() - Duration::seconds(100),
            })
            .await;
        ask(
            &mut h.dispatcher,
            moderator(),
            Command::Tag {
                text: "clip".into(),
            },
        )
        .await;

        let reply = ask(
            &mut h.dispatcher,
            Chatter::new("viewer", vec![]),
            Command::Export {
                vod_id: "900".into(),
                format: ExportFormat::Links,
            },
        )
        .await;
        let body = text(reply);
        assert!(body.starts_with("1 - [0h1m2"), "unexpected: {body}");
        assert!(body.ends_with(" : clip"));
    }

    #[tokio::test]
    async fn test_export_errors_become_replies() {
        let mut h = harness();
        let missing = ask(
            &mut h.dispatcher,
            moderator(),
            Command::Export {
                vod_id: "1".into(),
                format: ExportFormat::Srt,
            },
        )
        .await;
        assert_eq!(text(missing), "VOD 1 was not found");

        let streamless = ask(
            &mut h.dispatcher,
            moderator(),
            Command::Export {
                vod_id: "901".into(),
                format: ExportFormat::Srt,
            },
        )
        .await;
        assert_eq!(text(streamless), "VOD 901 has no associated stream");
    }

    #[tokio::test]
    async fn test_vip_requires_moderator() {
        let mut h = harness();
        let reply = ask(
            &mut h.dispatcher,
            Chatter::new("viewer42", vec![Role::Subscriber]),
            Command::Vip {
                target: "alice".into(),
            },
        )
        .await;
        assert_eq!(text(reply), "viewer42 is not allowed to use this command");
        assert!(h.moderator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vip_and_unvip_by_broadcaster() {
        let mut h = harness();
        let owner = Chatter::new("owner", vec![Role::Broadcaster]);
        let added = ask(
            &mut h.dispatcher,
            owner.clone(),
            Command::Vip {
                target: "alice".into(),
            },
        )
        .await;
        let removed = ask(
            &mut h.dispatcher,
            owner,
            Command::Unvip {
                target: "alice".into(),
            },
        )
        .await;
        assert_eq!(text(added), "alice is now a VIP");
        assert_eq!(text(removed), "alice is no longer a VIP");
        assert_eq!(
            *h.moderator.calls.lock().unwrap(),
            vec!["+alice".to_string(), "-alice".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_applies_events_in_order() {
        let h = harness();
        let (tx, rx) = mpsc::channel(16);
        let loop_handle = tokio::spawn(h.dispatcher.run(rx));

        tx.send(StreamEvent::Online {
            stream_id: "s1".into(),
            started_at: Utc::now(),
        })
        .await
        .unwrap();
        for i in 0..5 {
            let (invocation, _rx) = CommandInvocation::with_reply(
                moderator(),
                Command::Tag {
                    text: format!("tag {i}"),
                },
            );
            tx.send(StreamEvent::Command(invocation)).await.unwrap();
        }
        drop(tx);

        let sessions = loop_handle.await.unwrap();
        let texts: Vec<&str> = sessions.tags().iter().map(|t| t.text()).collect();
        assert_eq!(texts, vec!["tag 0", "tag 1", "tag 2", "tag 3", "tag 4"]);
    }
}
