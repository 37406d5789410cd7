//! Chat transport supervision
//!
//! A [`ChatConnector`] turns an access token into a stream of
//! [`StreamEvent`]s. [`TransportSupervisor`] keeps one connection alive:
//! it forwards every event into the dispatch channel, reconnects after a
//! fixed delay when the stream ends or the connect fails, and reconnects
//! immediately when the credential manager publishes a new token through
//! the paired [`TransportHandle`].
//!
//! # Module Layout
//!
//! - [`json_lines`] -- connector reading newline-delimited JSON events

pub mod json_lines;

pub use json_lines::{JsonLinesConnector, ReplySink, WireEvent};

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::credentials::TransportControl;
use crate::error::{Result, StreamTagsError};
use crate::events::StreamEvent;

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Opens a live event stream authenticated with `access_token`.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    async fn connect(&self, access_token: &str) -> Result<EventStream>;

    /// Whether a closed stream should be reopened. Finite sources such as
    /// recorded event files return `false`.
    fn reconnectable(&self) -> bool {
        true
    }
}

/// Token publisher handed to the credential manager.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    token_tx: watch::Sender<Option<String>>,
}

#[async_trait]
impl TransportControl for TransportHandle {
    async fn reconnect(&self, access_token: &str) -> Result<()> {
        self.token_tx
            .send(Some(access_token.to_string()))
            .map_err(|_| {
                StreamTagsError::TransportDisconnected("transport supervisor has stopped".into())
            })?;
        Ok(())
    }
}

enum Disconnect {
    TokenRotated,
    Closed,
}

pub struct TransportSupervisor {
    connector: Arc<dyn ChatConnector>,
    reconnect_delay: Duration,
    token_rx: watch::Receiver<Option<String>>,
}

impl TransportSupervisor {
    pub fn new(
        connector: Arc<dyn ChatConnector>,
        reconnect_delay: Duration,
    ) -> (Self, TransportHandle) {
        let (token_tx, token_rx) = watch::channel(None);
        (
            Self {
                connector,
                reconnect_delay,
                token_rx,
            },
            TransportHandle { token_tx },
        )
    }

    /// Runs until `shutdown` fires, the dispatch channel closes, or a
    /// non-reconnectable source is exhausted.
    pub async fn run(
        mut self,
        initial_token: String,
        events: mpsc::Sender<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut token = initial_token;
        let mut token_updates_open = true;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.connector.connect(&token).await {
                Ok(mut stream) => {
                    tracing::info!("Chat transport connected");
                    let reason = loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                tracing::info!("Transport shutting down");
                                return Ok(());
                            }
                            changed = self.token_rx.changed(), if token_updates_open => {
                                if changed.is_err() {
                                    token_updates_open = false;
                                    continue;
                                }
                                if let Some(fresh) = self.token_rx.borrow_and_update().clone() {
                                    token = fresh;
                                }
                                // A finite source cannot be reopened; keep reading it.
                                if !self.connector.reconnectable() {
                                    tracing::debug!("Adopted refreshed access token without reconnecting");
                                    continue;
                                }
                                break Disconnect::TokenRotated;
                            }
                            next = stream.next() => match next {
                                Some(event) => {
                                    if events.send(event).await.is_err() {
                                        tracing::info!("Dispatch channel closed, stopping transport");
                                        return Ok(());
                                    }
                                }
                                None => break Disconnect::Closed,
                            },
                        }
                    };

                    match reason {
                        Disconnect::TokenRotated => {
                            tracing::info!("Reconnecting with refreshed access token");
                            continue;
                        }
                        Disconnect::Closed if !self.connector.reconnectable() => {
                            tracing::info!("Event source exhausted");
                            return Ok(());
                        }
                        Disconnect::Closed => {
                            let err = StreamTagsError::TransportDisconnected("stream ended".into());
                            tracing::warn!(
                                error = %err,
                                retry_in_secs = self.reconnect_delay.as_secs_f64(),
                                "Chat transport dropped"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs_f64(),
                        "Chat transport connect failed"
                    );
                    if !self.connector.reconnectable() {
                        return Err(e);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }

            if token_updates_open && self.token_rx.has_changed().unwrap_or(false) {
                if let Some(fresh) = self.token_rx.borrow_and_update().clone() {
                    token = fresh;
                }
            }
        }
    }
}
