// Local disk read/write by CID. Grounded on the read path's disk-stream
// step and the directory-CID layout (`<storageRoot>/<CID>`,
// `<storageRoot>/<dirCID>/<CID>`).

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, cid: &str, dir_cid: Option<&str>) -> PathBuf {
        match dir_cid {
            Some(dir) => self.root.join(dir).join(cid),
            None => self.root.join(cid),
        }
    }

    #[instrument(skip(self))]
    pub async fn read(&self, path: &Path) -> AppResult<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Internal(format!("disk read failed: {e}"))),
        }
    }

    pub async fn metadata_len(&self, path: &Path) -> AppResult<Option<u64>> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Internal(format!("disk stat failed: {e}"))),
        }
    }

    /// Writes are idempotent by content address: writing the
    /// same CID twice is a no-op in effect, so we don't special-case an
    /// existing file.
    #[instrument(skip(self, bytes))]
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Internal(format!("failed to create storage dir: {e}")))?;
        }
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create blob file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to write blob: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let path = store.path_for("QmAbc", None);
        store.write(&path, b"hello").await.unwrap();
        let read = store.read(&path).await.unwrap();
        assert_eq!(read, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_blob_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let path = store.path_for("QmMissing", None);
        assert_eq!(store.read(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dir_entry_path_nests_under_dir_cid() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let path = store.path_for("QmFile", Some("QmDir"));
        assert_eq!(path, dir.path().join("QmDir").join("QmFile"));
    }
}
