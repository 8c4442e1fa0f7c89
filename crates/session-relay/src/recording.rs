//! Session recording.
//!
//! When recording is enabled, the upstream→downstream byte stream of an
//! interactive session is teed into an append-only artifact named after the
//! session id.

use crate::RelayResult;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Append-only recorder for one session.
pub struct SessionRecorder {
    file: tokio::fs::File,
    path: PathBuf,
    bytes: u64,
}

impl SessionRecorder {
    /// Create the artifact `<dir>/<session-id>`.
    pub async fn create(dir: &Path, session_id: Uuid) -> RelayResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(session_id.to_string());
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            file,
            path,
            bytes: 0,
        })
    }

    /// Append a chunk of the upstream output.
    pub async fn write(&mut self, data: &[u8]) -> RelayResult<()> {
        self.file.write_all(data).await?;
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Flush buffered bytes to disk.
    pub async fn finish(mut self) -> RelayResult<PathBuf> {
        self.file.flush().await?;
        Ok(self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorder_appends_and_names_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();

        let mut recorder = SessionRecorder::create(dir.path(), session_id).await.unwrap();
        recorder.write(b"first ").await.unwrap();
        recorder.write(b"second").await.unwrap();
        assert_eq!(recorder.bytes(), 12);

        let path = recorder.finish().await.unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), session_id.to_string());
        assert_eq!(std::fs::read(&path).unwrap(), b"first second");
    }

    #[tokio::test]
    async fn test_recorder_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("recordings");
        let recorder = SessionRecorder::create(&nested, Uuid::new_v4()).await.unwrap();
        assert!(recorder.path().exists());
    }
}
