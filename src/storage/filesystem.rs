use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{check_key, ObjectStore};
use crate::error::StorageError;

/// Bucket backed by a directory; keys map to relative file paths.
pub struct FilesystemStore {
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Open (creating if needed) the bucket directory `root/bucket`.
    pub async fn open(root: &Path, bucket: &str) -> Result<Self, StorageError> {
        check_key(bucket)?;
        let base_path = root.join(bucket);
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        check_key(key)?;
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // create_new gives us overwrite denial atomically
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }

        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::open(dir.path(), "training-locations")
            .await
            .unwrap();

        let path = store.put("u/l/photo-1.jpg", b"jpeg", "image/jpeg").await.unwrap();
        assert_eq!(path, "u/l/photo-1.jpg");
        assert!(dir.path().join("training-locations/u/l/photo-1.jpg").exists());
        assert_eq!(store.get(&path).await.unwrap(), b"jpeg");

        assert!(store.delete(&path).await.unwrap());
        assert!(!store.delete(&path).await.unwrap());
        assert!(!store.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::open(dir.path(), "b").await.unwrap();

        store.put("k.jpg", b"first", "image/jpeg").await.unwrap();
        let err = store.put("k.jpg", b"second", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(store.get("k.jpg").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::open(dir.path(), "b").await.unwrap();

        assert!(matches!(
            store.get("nope.jpg").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.get("../escape.jpg").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
