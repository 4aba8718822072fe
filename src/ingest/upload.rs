use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::compress::compress;
use super::progress::{ProgressSink, UploadStage};
use super::validate::{validate, ImageFile};
use crate::config::UploadConfig;
use crate::db::{MetadataStore, NewPhoto, PhotoRecord};
use crate::error::{CompressionError, UploadError};
use crate::retry::{retry, RetryPolicy};
use crate::storage::{photo_key, ObjectStore, UrlSigner};

/// Tunables of the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_width: u32,
    pub quality: u8,
    pub max_file_size: u64,
    pub retry: RetryPolicy,
    pub max_batch: usize,
}

impl UploadSettings {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_width: config.max_width,
            quality: config.quality,
            max_file_size: config.max_file_size_bytes(),
            retry: RetryPolicy::linear(config.max_retries, config.retry_base()),
            max_batch: config.max_batch,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Drives one photo from raw bytes to a persisted record.
pub struct UploadOrchestrator {
    pub(super) store: Arc<dyn ObjectStore>,
    signer: Arc<dyn UrlSigner>,
    db: Arc<dyn MetadataStore>,
    bucket: String,
    ttl: Duration,
    pub(super) settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn UrlSigner>,
        db: Arc<dyn MetadataStore>,
        bucket: &str,
        ttl: Duration,
        settings: UploadSettings,
    ) -> Self {
        Self {
            store,
            signer,
            db,
            bucket: bucket.to_string(),
            ttl,
            settings,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Upload a single photo, stored with `order = index`.
    pub async fn upload_one(
        &self,
        owner_id: &str,
        location_id: Uuid,
        file: &ImageFile,
        index: usize,
        sink: &ProgressSink,
    ) -> Result<PhotoRecord, UploadError> {
        self.upload_ordered(owner_id, location_id, file, index, index as u32, sink)
            .await
    }

    #[instrument(skip(self, file, sink), fields(name = %file.name))]
    pub(super) async fn upload_ordered(
        &self,
        owner_id: &str,
        location_id: Uuid,
        file: &ImageFile,
        index: usize,
        order: u32,
        sink: &ProgressSink,
    ) -> Result<PhotoRecord, UploadError> {
        let result = retry(self.settings.retry, &file.name, |attempt| {
            self.attempt(owner_id, location_id, file, index, order, attempt, sink)
        })
        .await;

        match &result {
            Ok(record) => {
                tracing::info!(photo_id = %record.id, path = %record.storage_path, "Photo uploaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "Photo upload failed");
                sink.failed(index, e.to_string());
            }
        }

        result
    }

    /// One full pass: validate, compress, store, sign, record.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        owner_id: &str,
        location_id: Uuid,
        file: &ImageFile,
        index: usize,
        order: u32,
        attempt: u32,
        sink: &ProgressSink,
    ) -> Result<PhotoRecord, UploadError> {
        tracing::debug!(attempt, "Upload attempt");

        sink.stage(index, UploadStage::Validating);
        validate(file, self.settings.max_file_size)?;

        sink.stage(index, UploadStage::Compressing);
        let data = file.data.clone();
        let (max_width, quality) = (self.settings.max_width, self.settings.quality);
        let compressed = tokio::task::spawn_blocking(move || compress(&data, max_width, quality))
            .await
            .map_err(|e| CompressionError::Worker(e.to_string()))??;

        sink.stage(index, UploadStage::Uploading);
        let key = photo_key(owner_id, location_id);
        let path = self.store.put(&key, &compressed.data, "image/jpeg").await?;

        if self.signer.sign(&self.bucket, &path, self.ttl).await.is_none() {
            self.discard(&path).await;
            return Err(UploadError::Unsigned);
        }

        sink.stage(index, UploadStage::Saving);
        let record = match self
            .db
            .insert_photo(NewPhoto {
                location_id,
                storage_path: path.clone(),
                order,
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.discard(&path).await;
                return Err(e.into());
            }
        };

        sink.stage(index, UploadStage::Completed);
        Ok(record)
    }

    /// Best-effort removal of a blob whose upload cannot be completed.
    async fn discard(&self, path: &str) {
        match self.store.delete(path).await {
            Ok(_) => tracing::debug!(path, "Removed orphaned blob"),
            Err(e) => tracing::warn!(path, error = %e, "Failed to remove orphaned blob"),
        }
    }
}
