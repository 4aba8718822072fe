use futures::future::join_all;
use uuid::Uuid;

use super::progress::ProgressSink;
use super::upload::UploadOrchestrator;
use super::validate::ImageFile;
use crate::db::PhotoRecord;
use crate::error::UploadError;

/// Outcome of a batch with at least one success (or nothing to do).
#[derive(Debug, Clone, Default)]
pub struct BatchUpload {
    /// Successful records, in batch order.
    pub photos: Vec<PhotoRecord>,
    /// Number of accepted files that failed.
    pub failed: usize,
    /// Names of files beyond the batch cap, never attempted.
    pub dropped: Vec<String>,
}

impl UploadOrchestrator {
    /// Upload up to `max_batch` files concurrently, ordered from 0.
    pub async fn upload_many(
        &self,
        owner_id: &str,
        location_id: Uuid,
        files: Vec<ImageFile>,
        sink: &ProgressSink,
    ) -> Result<BatchUpload, UploadError> {
        self.upload_many_from(owner_id, location_id, files, 0, sink)
            .await
    }

    /// Like [`upload_many`](Self::upload_many), continuing an existing
    /// location's ordering at `first_order`.
    pub async fn upload_many_from(
        &self,
        owner_id: &str,
        location_id: Uuid,
        mut files: Vec<ImageFile>,
        first_order: u32,
        sink: &ProgressSink,
    ) -> Result<BatchUpload, UploadError> {
        let cap = self.settings.max_batch;
        let dropped: Vec<String> = if files.len() > cap {
            files.split_off(cap).into_iter().map(|f| f.name).collect()
        } else {
            Vec::new()
        };
        if !dropped.is_empty() {
            tracing::warn!(
                %location_id,
                cap,
                dropped = dropped.len(),
                "Batch exceeds the upload cap, extra files ignored"
            );
        }

        let uploads = files.iter().enumerate().map(|(index, file)| {
            self.upload_ordered(
                owner_id,
                location_id,
                file,
                index,
                first_order + index as u32,
                sink,
            )
        });
        let results = join_all(uploads).await;

        let mut photos = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(record) => photos.push(record),
                Err(e) => errors.push(format!("Photo {}: {}", index + 1, e)),
            }
        }

        if photos.is_empty() && !errors.is_empty() {
            return Err(UploadError::AllFailed(errors.join("; ")));
        }

        if !errors.is_empty() {
            tracing::warn!(
                %location_id,
                succeeded = photos.len(),
                failed = errors.len(),
                "Some photos failed to upload"
            );
        }

        Ok(BatchUpload {
            photos,
            failed: errors.len(),
            dropped,
        })
    }
}
