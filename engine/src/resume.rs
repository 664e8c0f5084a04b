//! The on-disk resume record: a single JSON file holding the engine's
//! declared intent, so the process can restart without any external
//! coordinator.
//!
//! Splits "what persistence must provide" (a trait) from "how the file
//! variant provides it" (an `fs` submodule) -- a plain file is enough since
//! this engine is already single-instance.

use std::path::{Path, PathBuf};

use chrono::Utc;
use replay_types::SyncIntent;
use tokio::fs;

/// Owns one resume-record file. Reads are best-effort (§4.4: "missing/
/// corrupt file is equivalent to `status=idle`"); writes are atomic via
/// write-temp-then-rename, which is what gives a crash mid-write no chance
/// of leaving a half-written record behind.
pub struct ResumeRecordStore {
    path: PathBuf,
}

impl ResumeRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> SyncIntent {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(path = %self.path.display(), %err, "corrupt resume record, treating as idle");
                SyncIntent::default()
            }),
            Err(err) => {
                tracing::debug!(path = %self.path.display(), %err, "no resume record, treating as idle");
                SyncIntent::default()
            }
        }
    }

    pub async fn write(&self, intent: &SyncIntent) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(intent)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        tracing::debug!(path = %self.path.display(), status = ?intent.status, "wrote resume record");
        Ok(())
    }

    pub async fn write_idle(&self) -> anyhow::Result<()> {
        self.write(&SyncIntent::idle(Utc::now())).await
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "resume".into());
        self.path.with_file_name(format!("{file_name}.tmp"))
    }
}

#[cfg(test)]
mod test {
    use replay_types::SyncTarget;

    use super::*;

    #[tokio::test]
    async fn missing_file_reads_as_idle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeRecordStore::new(dir.path().join("resume.json"));
        let intent = store.read().await;
        assert!(!intent.is_running());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = ResumeRecordStore::new(path);
        let intent = store.read().await;
        assert!(!intent.is_running());
    }

    #[tokio::test]
    async fn round_trips_a_running_intent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeRecordStore::new(dir.path().join("resume.json"));
        let intent = SyncIntent::running(SyncTarget::Block(100), false, Utc::now());
        store.write(&intent).await.unwrap();
        let read_back = store.read().await;
        assert_eq!(read_back, intent);
        // no leftover temp file after a successful rename
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn write_is_atomic_via_rename() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResumeRecordStore::new(dir.path().join("resume.json"));
        store.write_idle().await.unwrap();
        assert!(store.path().exists());
        assert!(!store.tmp_path().exists());
    }
}
