//! Atomic whole-file replacement
//!
//! Records are written to a hidden temporary file next to the target,
//! synced, then renamed over the target. Readers observe either the old
//! record or the new one, never a partial write.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

use crate::error::{Result, StreamTagsError};

/// Owner read/write only.
pub const OWNER_ONLY_MODE: u32 = 0o600;

/// Replaces `path` with `contents` atomically, creating parent directories.
///
/// When `mode` is set (Unix only) the temporary file is created with that
/// mode, so the final file never exists with wider permissions.
pub async fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            StreamTagsError::PersistenceFailed(format!("invalid record path {}", path.display()))
        })?;

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        StreamTagsError::PersistenceFailed(format!("failed to create {}: {e}", dir.display()))
    })?;

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = async {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        if let Some(mode) = mode {
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mut file = options.open(&tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(StreamTagsError::PersistenceFailed(format!(
            "failed to write {}: {err}",
            path.display()
        ))
        .into());
    }

    Ok(())
}
