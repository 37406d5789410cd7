//! Durable per-session records
//!
//! Each session is stored as a pretty-printed JSON file named after its
//! stream id. Every write is a whole-session overwrite through
//! [`write_atomic`](crate::persist::write_atomic), and writes are
//! serialized by a lock so two flushes of the same session can never
//! interleave and leave a stale snapshot behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Result, StreamTagsError};
use crate::persist::write_atomic;
use crate::session::Session;

/// Read-only access to session records.
///
/// The export path depends on this trait rather than on [`SessionStore`]
/// so that it can never write.
#[async_trait]
pub trait SessionReader: Send + Sync {
    /// Loads the record for `stream_id`, or `None` when none exists.
    async fn read_session(&self, stream_id: &str) -> Result<Option<Session>>;
}

/// Summary of one stored session, used for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: u32,
    pub tag_count: usize,
}

/// Flat-file session store rooted at one directory.
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of the record for `stream_id`.
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced so an id can never
    /// escape the store directory. A replaced id also gets `.<hash>` of the
    /// raw id, which plain ids cannot contain, so distinct ids never share
    /// a file.
    pub fn path_for(&self, stream_id: &str) -> PathBuf {
        let safe: String = stream_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe == stream_id && !safe.is_empty() {
            return self.dir.join(format!("{safe}.json"));
        }
        let digest = Sha256::digest(stream_id.as_bytes());
        let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{safe}.{hash}.json"))
    }

    /// Loads the record for `stream_id`.
    ///
    /// # Errors
    ///
    /// A missing file is `Ok(None)`. A record that cannot be read is
    /// [`StreamTagsError::Io`]; one that does not parse is
    /// [`StreamTagsError::Serialization`].
    pub async fn load(&self, stream_id: &str) -> Result<Option<Session>> {
        let path = self.path_for(stream_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StreamTagsError::Io(e).into()),
        };
        let session: Session =
            serde_json::from_str(&contents).map_err(StreamTagsError::Serialization)?;
        Ok(Some(session))
    }

    /// Overwrites the record for `session`.
    pub async fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        let path = self.path_for(session.id());

        let _guard = self.write_lock.lock().await;
        write_atomic(&path, json.as_bytes(), None).await?;
        tracing::debug!(
            stream_id = %session.id(),
            tags = session.tags().len(),
            path = %path.display(),
            "Flushed session record"
        );
        Ok(())
    }

    /// Moves an unreadable record aside so a fresh session does not
    /// overwrite it. Returns the new path.
    pub async fn quarantine(&self, stream_id: &str) -> Result<PathBuf> {
        let path = self.path_for(stream_id);
        let target = path.with_extension(format!(
            "json.corrupt-{}",
            Utc::now().format("%Y%m%dT%H%M%S")
        ));

        let _guard = self.write_lock.lock().await;
        tokio::fs::rename(&path, &target).await?;
        Ok(target)
    }

    /// Summaries of every readable record, oldest stream first.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StreamTagsError::Io(e).into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<Session>(&s).map_err(Into::into));
            match parsed {
                Ok(session) => summaries.push(SessionSummary {
                    id: session.id().to_string(),
                    start_time: session.start_time(),
                    delay_seconds: session.delay_seconds(),
                    tag_count: session.tags().len(),
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session record");
                }
            }
        }

        summaries.sort_by_key(|s| s.start_time);
        Ok(summaries)
    }
}

#[async_trait]
impl SessionReader for SessionStore {
    async fn read_session(&self, stream_id: &str) -> Result<Option<Session>> {
        self.load(stream_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_record_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_returns_same_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        let mut session = Session::new("s1", t0(), 15);
        session.append_tag("mod_a", "hello", t0() + Duration::seconds(30));

        store.save(&session).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_saved_record_is_pretty_printed() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.save(&Session::new("s1", t0(), 0)).await.unwrap();
        let raw = std::fs::read_to_string(store.path_for("s1")).unwrap();
        assert!(raw.contains("\n  \"id\": \"s1\""), "not pretty: {raw}");
    }

    #[tokio::test]
    async fn test_malformed_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path_for("bad"), "{not json").unwrap();
        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamTagsError>(),
            Some(StreamTagsError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_quarantine_moves_record_aside() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path_for("bad"), "{not json").unwrap();

        let moved = store.quarantine("bad").await.unwrap();
        assert!(moved.exists());
        assert!(store.load("bad").await.unwrap().is_none());
    }

    #[test]
    fn test_path_for_sanitizes_ids() {
        let store = SessionStore::new("/data/sessions");
        let escaped = store.path_for("../../etc/passwd");
        assert_eq!(escaped.parent(), Some(Path::new("/data/sessions")));
        let name = escaped.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("______etc_passwd."), "{name}");
        assert!(name.ends_with(".json"), "{name}");
        assert_eq!(
            store.path_for("40123456789"),
            PathBuf::from("/data/sessions/40123456789.json")
        );
    }

    #[test]
    fn test_path_for_keeps_distinct_ids_apart() {
        let store = SessionStore::new("/data/sessions");
        let ids = ["a.b", "a_b", "a/b", "a b", "", "_"];
        let paths: std::collections::HashSet<PathBuf> =
            ids.iter().map(|id| store.path_for(id)).collect();
        assert_eq!(paths.len(), ids.len());
        assert_eq!(store.path_for("a_b"), PathBuf::from("/data/sessions/a_b.json"));
        assert_eq!(store.path_for("a.b"), store.path_for("a.b"));
    }

    #[tokio::test]
    async fn test_similar_ids_round_trip_independently() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut dotted = Session::new("a.b", t0(), 0);
        dotted.append_tag("m", "dotted", t0() + Duration::seconds(5));
        let plain = Session::new("a_b", t0() + Duration::hours(1), 0);

        store.save(&dotted).await.unwrap();
        store.save(&plain).await.unwrap();

        assert_eq!(store.load("a.b").await.unwrap().unwrap(), dotted);
        assert_eq!(store.load("a_b").await.unwrap().unwrap(), plain);
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a.b".to_string(), "a_b".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_one_whole_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let snapshots: Vec<Session> = (0..16)
            .map(|n| {
                let mut session = Session::new("s1", t0(), 0);
                for i in 0..n {
                    session.append_tag("m", &format!("tag {i}"), t0() + Duration::seconds(i));
                }
                session
            })
            .collect();

        let results =
            futures::future::join_all(snapshots.iter().map(|session| store.save(session))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let raw = std::fs::read_to_string(store.path_for("s1")).unwrap();
        let saved: Session = serde_json::from_str(&raw).unwrap();
        assert!(snapshots.contains(&saved));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["s1.json".to_string()]);
    }

    #[tokio::test]
    async fn test_list_returns_summaries_sorted_by_start() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        let mut later = Session::new("later", t0() + Duration::days(1), 0);
        later.append_tag("a", "x", t0() + Duration::days(1));
        store.save(&later).await.unwrap();
        store.save(&Session::new("earlier", t0(), 15)).await.unwrap();
        std::fs::write(dir.path().join("junk.json"), "nope").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let summaries = store.list().await.unwrap();
        let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["earlier", "later"]);
        assert_eq!(summaries[1].tag_count, 1);
        assert_eq!(summaries[0].delay_seconds, 15);
    }

    #[tokio::test]
    async fn test_list_of_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("absent"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
