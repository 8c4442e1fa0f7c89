//! Payload spooling.
//!
//! Transfers are staged through a temp file so the relay can validate the
//! advertised size before any byte reaches the peer. The spool consumes the
//! SCP end-of-file marker (a single `\0` after the payload) and never writes
//! it to disk. Spool files are removed on drop, on every exit path.

use crate::{ScpError, ScpResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;

const SPOOL_CHUNK: usize = 32 * 1024;

/// Process-wide monotonic counter folded into spool names so concurrent
/// transfers never collide.
static SPOOL_SEQ: AtomicU64 = AtomicU64::new(0);

/// A spooled payload. The backing file is removed when the value drops.
#[derive(Debug)]
pub struct SpoolFile {
    path: PathBuf,
    size: u64,
}

impl SpoolFile {
    /// Spool exactly `size` payload bytes from the reader, then consume the
    /// trailing `\0` end-of-file marker.
    ///
    /// A reader that ends early or follows the payload with anything other
    /// than the marker fails with `SizeMismatch`; the partial file is
    /// removed.
    pub async fn spool<R: AsyncRead + Unpin>(
        reader: &mut R,
        size: u64,
        dir: &Path,
    ) -> ScpResult<Self> {
        let seq = SPOOL_SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let path = dir.join(format!("jms-tmp-file-{nanos}-{seq}"));

        let spool = Self {
            path: path.clone(),
            size,
        };

        let mut file = tokio::fs::File::create(&path).await?;

        let mut remaining = size;
        let mut buf = vec![0u8; SPOOL_CHUNK];
        while remaining > 0 {
            let want = SPOOL_CHUNK.min(remaining as usize);
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(ScpError::SizeMismatch { expected: size });
            }
            file.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        file.flush().await?;

        // The single byte past the payload is the end-of-file marker. It is
        // stripped here and never written to the spool.
        match reader.read_u8().await {
            Ok(0x00) => {}
            Ok(_) => return Err(ScpError::SizeMismatch { expected: size }),
            Err(e) => return Err(ScpError::Io(e)),
        }

        Ok(spool)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open the spooled payload for reading.
    pub async fn open_reader(&self) -> ScpResult<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove spool file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spool_exact_size_strips_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut input: &[u8] = b"hello world\x00";

        let spool = SpoolFile::spool(&mut input, 11, dir.path()).await.unwrap();
        assert_eq!(spool.size(), 11);

        let content = tokio::fs::read(spool.path()).await.unwrap();
        assert_eq!(content, b"hello world");
        assert!(!content.contains(&0u8));
    }

    #[tokio::test]
    async fn test_spool_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mut input: &[u8] = b"abc\x00";

        let spool = SpoolFile::spool(&mut input, 3, dir.path()).await.unwrap();
        let path = spool.path().to_path_buf();
        assert!(path.exists());

        drop(spool);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_short_read_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut input: &[u8] = b"ab";

        let err = SpoolFile::spool(&mut input, 10, dir.path()).await.unwrap_err();
        assert!(matches!(err, ScpError::SizeMismatch { expected: 10 }));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_overlong_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Advertised 3 bytes but a fourth data byte arrives instead of the
        // end-of-file marker.
        let mut input: &[u8] = b"abcd\x00";

        let err = SpoolFile::spool(&mut input, 3, dir.path()).await.unwrap_err();
        assert!(matches!(err, ScpError::SizeMismatch { expected: 3 }));
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut input: &[u8] = b"\x00";

        let spool = SpoolFile::spool(&mut input, 0, dir.path()).await.unwrap();
        let content = tokio::fs::read(spool.path()).await.unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_spool_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mut a: &[u8] = b"x\x00";
        let mut b: &[u8] = b"y\x00";

        let spool_a = SpoolFile::spool(&mut a, 1, dir.path()).await.unwrap();
        let spool_b = SpoolFile::spool(&mut b, 1, dir.path()).await.unwrap();
        assert_ne!(spool_a.path(), spool_b.path());
        assert!(spool_a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("jms-tmp-file-"));
    }

    #[tokio::test]
    async fn test_open_reader_streams_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut input: &[u8] = b"payload\x00";

        let spool = SpoolFile::spool(&mut input, 7, dir.path()).await.unwrap();
        let mut reader = spool.open_reader().await.unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"payload");
    }
}
