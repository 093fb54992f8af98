use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use super::{ObjectStore, StoreError, StoredObject};

/// Object store backed by a local directory.  Keys map to relative paths
/// under `root`; intermediate directories are created on demand.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

/// Quoted hex CRC32 of the stored bytes.
fn etag_for(body: &[u8]) -> String {
    let mut crc = flate2::Crc::new();
    crc.update(body);
    format!("\"{:08x}\"", crc.sum())
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<StoredObject, StoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        tracing::debug!(key, size = body.len(), "object stored");
        Ok(StoredObject {
            etag: etag_for(&body),
            key: key.to_string(),
            size: body.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_writes_under_root() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let stored = store
            .put("trace/2024-01-01T00:00:00.000Z.log.gz", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        assert_eq!(stored.size, 3);
        assert_eq!(stored.key, "trace/2024-01-01T00:00:00.000Z.log.gz");
        // CRC32("abc")
        assert_eq!(stored.etag, "\"352441c2\"");
        let on_disk =
            std::fs::read(dir.path().join("trace/2024-01-01T00:00:00.000Z.log.gz")).unwrap();
        assert_eq!(on_disk, b"abc");
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        for key in ["../etc/passwd", "/abs", ""] {
            let err = store.put(key, Bytes::new()).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "key {:?}", key);
        }
    }
}
