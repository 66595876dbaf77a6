use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::BlobStore;
use crate::error::{ChatError, ChatResult};

/// 本地磁盘文件存储 / Blob store rooted at a local directory
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> ChatResult<PathBuf> {
        let rel = Path::new(path);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(ChatError::invalid(format!("illegal blob path '{}'", path)));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> ChatResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!("stored blob {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("talk/files/20240101/a.txt", b"hello").await.unwrap();
        let read = tokio::fs::read(dir.path().join("talk/files/20240101/a.txt")).await.unwrap();
        assert_eq!(read, b"hello");
    }

    #[tokio::test]
    async fn put_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.put("../etc/passwd", b"x").await,
            Err(ChatError::InvalidArgument(_))
        ));
        assert!(store.put("/abs/path", b"x").await.is_err());
    }
}
