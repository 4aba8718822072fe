//! Durable object storage and signed access URLs.
//!
//! Stored paths are the only persisted reference to a blob. URLs handed out
//! for display or detection are derived on demand and never written back.

mod filesystem;
mod memory;
mod signing;

use async_trait::async_trait;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StorageError;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use signing::{Sha256Signer, SignedUrl};

/// Key/value blob storage with overwrite denial.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` and return the stored path.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if the key is taken.
    async fn put(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<String, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Returns `true` if the object was deleted, `false` if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

/// Produces time-limited access URLs for stored objects.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    /// `None` means no URL could be produced for this path.
    async fn sign(&self, bucket: &str, path: &str, ttl: Duration) -> Option<SignedUrl>;
}

/// Build a fresh storage key for a location photo.
///
/// Timestamp plus random suffix keeps every upload attempt on its own key.
pub fn photo_key(owner_id: &str, location_id: Uuid) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!(
        "{}/{}/photo-{}-{}.jpg",
        owner_id,
        location_id,
        Utc::now().timestamp_millis(),
        suffix
    )
}

/// Resolve a stored photo reference to its key within `bucket`.
///
/// Older rows hold a full public URL (`.../{bucket}/{key}`); newer rows hold
/// the key itself. Returns `None` for URLs that cannot be mapped.
pub fn resolve_storage_key<'a>(stored: &'a str, bucket: &str) -> Option<&'a str> {
    let marker = format!("/{}/", bucket);
    if stored.contains(&marker) {
        let mut parts = stored.split(marker.as_str());
        let _prefix = parts.next()?;
        let key = parts.next()?;
        if parts.next().is_some() || key.is_empty() {
            return None;
        }
        Some(key)
    } else if stored.starts_with("http://") || stored.starts_with("https://") {
        None
    } else {
        Some(stored)
    }
}

/// Reject keys that could escape the bucket.
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_key_shape() {
        let location = Uuid::new_v4();
        let key = photo_key("user-1", location);

        let prefix = format!("user-1/{}/photo-", location);
        assert!(key.starts_with(&prefix));
        assert!(key.ends_with(".jpg"));

        let stem = key.trim_start_matches(&prefix).trim_end_matches(".jpg");
        let (millis, suffix) = stem.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_photo_keys_are_unique() {
        let location = Uuid::new_v4();
        let a = photo_key("u", location);
        let b = photo_key("u", location);
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_storage_key() {
        assert_eq!(
            resolve_storage_key("u/l/photo-1-abc.jpg", "training-locations"),
            Some("u/l/photo-1-abc.jpg")
        );
        assert_eq!(
            resolve_storage_key(
                "https://x.supabase.co/storage/v1/object/public/training-locations/u/l/p.jpg",
                "training-locations"
            ),
            Some("u/l/p.jpg")
        );
        assert_eq!(
            resolve_storage_key("https://cdn.example.com/p.jpg", "training-locations"),
            None
        );
    }

    #[test]
    fn test_check_key() {
        assert!(check_key("u/l/photo.jpg").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("/abs/path.jpg").is_err());
        assert!(check_key("u/../../etc/passwd").is_err());
        assert!(check_key("u//double.jpg").is_err());
    }
}
