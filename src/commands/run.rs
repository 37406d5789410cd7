//! Live daemon command
//!
//! Wires the transport, credential manager, dispatcher and reply printer
//! together and runs until the event feed is exhausted or Ctrl-C arrives.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};

use crate::commands::{helix_client, http_client, start_credentials};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{Result, StreamTagsError};
use crate::export::{Exporter, HelixVodResolver};
use crate::moderation::HelixChannelModerator;
use crate::session::{SessionManager, SessionStore};
use crate::transport::{JsonLinesConnector, ReplySink, TransportSupervisor};

const EVENT_QUEUE_CAPACITY: usize = 64;

/// Runs the tagging daemon.
///
/// # Arguments
///
/// * `config` - Loaded and validated configuration
/// * `events` - Event feed file; stdin when `None`
/// * `attachments_dir` - Where subtitle attachments are written
///
/// # Errors
///
/// Returns error if credentials cannot be set up or the feed cannot be opened
pub async fn run_daemon(
    config: Config,
    events: Option<PathBuf>,
    attachments_dir: PathBuf,
) -> Result<()> {
    if config.twitch.broadcaster_id.is_empty() {
        return Err(StreamTagsError::Config(
            "twitch.broadcaster_id is required to run the daemon".to_string(),
        )
        .into());
    }

    let (sink, mut reply_lines) = ReplySink::new(attachments_dir);
    let printer = tokio::spawn(async move {
        while let Some(line) = reply_lines.recv().await {
            println!("{}", line);
        }
    });

    let connector = match &events {
        Some(path) => {
            tracing::info!("Reading events from {}", path.display());
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                StreamTagsError::Config(format!("Cannot open event feed {}: {}", path.display(), e))
            })?;
            JsonLinesConnector::new(BufReader::new(file), sink)
        }
        None => {
            tracing::info!("Reading events from stdin");
            JsonLinesConnector::new(BufReader::new(tokio::io::stdin()), sink)
        }
    };
    let (supervisor, transport) =
        TransportSupervisor::new(Arc::new(connector), config.reconnect_delay());

    let http = http_client()?;
    let credentials = start_credentials(&config, http.clone(), Some(Arc::new(transport))).await?;
    let helix = helix_client(&config, http, credentials.clone());

    let store = Arc::new(SessionStore::new(config.sessions_dir()));
    let exporter = Arc::new(Exporter::new(
        Arc::new(HelixVodResolver::new(helix.clone())),
        store.clone(),
    ));
    let moderator = Arc::new(HelixChannelModerator::new(
        helix,
        config.twitch.broadcaster_id.clone(),
    ));
    let dispatcher = Dispatcher::new(
        SessionManager::new(store, config.sessions.default_delay_seconds),
        exporter,
        moderator,
    );

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatch = tokio::spawn(dispatcher.run(event_rx));
    let mut transport_task = tokio::spawn(supervisor.run(
        credentials.current_pair().access_token,
        event_tx,
        shutdown_rx,
    ));

    let transport_result = tokio::select! {
        result = &mut transport_task => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            transport_task.await
        }
    };

    // The dispatch loop ends once the transport drops its sender.
    let sessions = dispatch
        .await
        .map_err(|e| anyhow::anyhow!("dispatch task failed: {}", e))?;
    if let Some(session) = sessions.session() {
        tracing::info!(
            stream_id = %session.id(),
            tags = session.tags().len(),
            "Stopped with a live session; it resumes on the next went-live"
        );
    }

    // Outstanding replies hold the sink; the printer drains once they land.
    let _ = printer.await;
    credentials.shutdown();

    match transport_result {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("transport task failed: {}", e)),
    }
}
