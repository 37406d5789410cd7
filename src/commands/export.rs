//! One-shot export command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::{helix_client, http_client, start_credentials};
use crate::config::Config;
use crate::error::Result;
use crate::export::{ExportFormat, ExportPayload, Exporter, HelixVodResolver, VodResolver};
use crate::persist::write_atomic;
use crate::session::SessionStore;

/// Exports the tags behind `vod_id` through the Helix API.
///
/// # Errors
///
/// Returns error if credentials cannot be set up, the export fails, or the
/// output file cannot be written
pub async fn run_export(
    config: Config,
    vod_id: String,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let http = http_client()?;
    let credentials = start_credentials(&config, http.clone(), None).await?;
    let resolver = Arc::new(HelixVodResolver::new(helix_client(
        &config,
        http,
        credentials.clone(),
    )));

    let result = export_to(
        resolver,
        Arc::new(SessionStore::new(config.sessions_dir())),
        &vod_id,
        format,
        output.as_deref(),
    )
    .await;
    credentials.shutdown();
    result
}

/// Runs the export against any resolver and writes or prints the result.
pub(crate) async fn export_to(
    resolver: Arc<dyn VodResolver>,
    store: Arc<SessionStore>,
    vod_id: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let exporter = Exporter::new(resolver, store);
    let contents = match exporter.export(vod_id, format).await? {
        ExportPayload::Reply(text) => format!("{}\n", text).into_bytes(),
        ExportPayload::Attachment { contents, .. } => contents,
    };

    match output {
        Some(path) => {
            write_atomic(path, &contents, None).await?;
            println!("Wrote {} export to {}", format, path.display());
        }
        None => print!("{}", String::from_utf8_lossy(&contents)),
    }
    Ok(())
}
