//! Training locations, their photos and their hand-entered equipment list.
//!
//! Blobs are removed before rows so a crash never leaves a row pointing at
//! nothing; a leftover blob is the lesser evil.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{Location, LocationEquipment, LocationType, LocationUpdate, MetadataStore, PhotoRecord};
use crate::error::{PersistenceError, UploadError};
use crate::ingest::{BatchUpload, ImageFile, ProgressSink, UploadOrchestrator};
use crate::storage::{resolve_storage_key, ObjectStore, SignedUrl, UrlSigner};

/// Input for a new location.
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub name: String,
    pub location_type: LocationType,
    pub is_default: bool,
    /// Equipment names entered by hand.
    pub equipment: Vec<String>,
    pub photos: Vec<ImageFile>,
}

#[derive(Debug, Clone)]
pub struct CreatedLocation {
    pub location: Location,
    pub equipment: Vec<LocationEquipment>,
    pub upload: BatchUpload,
}

/// A photo with a freshly signed display URL, if one could be made.
#[derive(Debug, Clone)]
pub struct PhotoView {
    pub record: PhotoRecord,
    pub url: Option<SignedUrl>,
}

#[derive(Debug, Clone)]
pub struct LocationView {
    pub location: Location,
    pub equipment: Vec<LocationEquipment>,
    pub photos: Vec<PhotoView>,
}

/// Trimmed, non-blank equipment names.
fn clean_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct LocationService {
    db: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn UrlSigner>,
    uploader: Arc<UploadOrchestrator>,
    bucket: String,
    ttl: Duration,
    max_photos: usize,
}

impl LocationService {
    pub fn new(
        db: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn UrlSigner>,
        uploader: Arc<UploadOrchestrator>,
        bucket: &str,
        ttl: Duration,
        max_photos: usize,
    ) -> Self {
        Self {
            db,
            store,
            signer,
            uploader,
            bucket: bucket.to_string(),
            ttl,
            max_photos,
        }
    }

    /// Create the location with its equipment list, then upload its photos.
    ///
    /// If every photo fails the location is kept and the error returned.
    /// Photos beyond the location limit come back in `upload.dropped`.
    pub async fn create_location(
        &self,
        owner_id: &str,
        new: NewLocation,
        sink: &ProgressSink,
    ) -> Result<CreatedLocation, UploadError> {
        let location = self
            .db
            .create_location(owner_id, &new.name, new.location_type, new.is_default)
            .await?;

        let names = clean_names(&new.equipment);
        let equipment = if names.is_empty() {
            Vec::new()
        } else {
            self.db.add_equipment(location.id, &names, false).await?
        };

        tracing::info!(
            location_id = %location.id,
            location_type = %location.location_type,
            equipment = equipment.len(),
            photos = new.photos.len(),
            "Location created"
        );

        let upload = if new.photos.is_empty() {
            BatchUpload::default()
        } else {
            let (photos, over_limit) = self.cap_to_slots(new.photos, 0);
            let mut upload = self
                .uploader
                .upload_many(owner_id, location.id, photos, sink)
                .await?;
            upload.dropped.extend(over_limit);
            upload
        };

        Ok(CreatedLocation {
            location,
            equipment,
            upload,
        })
    }

    /// Upload more photos to an existing location, continuing its ordering.
    ///
    /// Files beyond the free slots are not uploaded and come back in `dropped`.
    pub async fn add_photos(
        &self,
        owner_id: &str,
        location_id: Uuid,
        files: Vec<ImageFile>,
        sink: &ProgressSink,
    ) -> Result<BatchUpload, UploadError> {
        self.db
            .get_location(location_id)
            .await?
            .ok_or(PersistenceError::LocationNotFound(location_id))?;

        let existing = self.db.photos_for_location(location_id).await?;
        if existing.len() >= self.max_photos {
            return Err(UploadError::LocationFull {
                max: self.max_photos,
            });
        }

        let first_order = existing.iter().map(|p| p.order + 1).max().unwrap_or(0);
        let (files, over_limit) = self.cap_to_slots(files, existing.len());
        let mut batch = self
            .uploader
            .upload_many_from(owner_id, location_id, files, first_order, sink)
            .await?;
        batch.dropped.extend(over_limit);
        Ok(batch)
    }

    /// Split off the files that do not fit in the location's free slots.
    fn cap_to_slots(&self, mut files: Vec<ImageFile>, used: usize) -> (Vec<ImageFile>, Vec<String>) {
        let slots = self.max_photos.saturating_sub(used);
        if files.len() <= slots {
            return (files, Vec::new());
        }

        let over = files.split_off(slots);
        tracing::warn!(
            slots,
            skipped = over.len(),
            "Location photo limit reached, extra files not uploaded"
        );
        (files, over.into_iter().map(|f| f.name).collect())
    }

    /// Rename a location, change its type or its default flag.
    pub async fn update_location(
        &self,
        id: Uuid,
        mut update: LocationUpdate,
    ) -> Result<Location, PersistenceError> {
        if let Some(name) = update.name.take() {
            let name = name.trim();
            if name.is_empty() {
                return Err(PersistenceError::EmptyName);
            }
            update.name = Some(name.to_string());
        }

        let location = self.db.update_location(id, &update).await?;
        tracing::info!(location_id = %id, ?update, "Location updated");
        Ok(location)
    }

    /// Add hand-entered equipment to an existing location.
    pub async fn add_equipment(
        &self,
        location_id: Uuid,
        names: &[String],
    ) -> Result<Vec<LocationEquipment>, PersistenceError> {
        let added = self
            .db
            .add_equipment(location_id, &clean_names(names), true)
            .await?;
        tracing::info!(%location_id, added = added.len(), "Equipment added");
        Ok(added)
    }

    pub async fn remove_equipment(&self, equipment_id: Uuid) -> Result<bool, PersistenceError> {
        let removed = self.db.remove_equipment(equipment_id).await?;
        if removed {
            tracing::info!(%equipment_id, "Equipment removed");
        }
        Ok(removed)
    }

    /// All of an owner's locations, newest first, with signed photo URLs.
    pub async fn fetch_locations(&self, owner_id: &str) -> Result<Vec<LocationView>, PersistenceError> {
        let locations = self.db.locations_for_owner(owner_id).await?;

        let mut views = Vec::with_capacity(locations.len());
        for location in locations {
            views.push(self.view(location).await?);
        }

        tracing::debug!(owner_id, count = views.len(), "Locations fetched");
        Ok(views)
    }

    pub async fn location(&self, id: Uuid) -> Result<Option<LocationView>, PersistenceError> {
        match self.db.get_location(id).await? {
            Some(location) => Ok(Some(self.view(location).await?)),
            None => Ok(None),
        }
    }

    async fn view(&self, location: Location) -> Result<LocationView, PersistenceError> {
        let equipment = self.db.location_equipment(location.id).await?;
        let records = self.db.photos_for_location(location.id).await?;

        let mut photos = Vec::with_capacity(records.len());
        for record in records {
            let url = self.sign(&record).await;
            photos.push(PhotoView { record, url });
        }

        Ok(LocationView {
            location,
            equipment,
            photos,
        })
    }

    async fn sign(&self, record: &PhotoRecord) -> Option<SignedUrl> {
        let Some(key) = resolve_storage_key(&record.storage_path, &self.bucket) else {
            tracing::warn!(photo_id = %record.id, "Photo path cannot be mapped to a storage key");
            return None;
        };
        let url = self.signer.sign(&self.bucket, key, self.ttl).await;
        if url.is_none() {
            tracing::warn!(photo_id = %record.id, path = key, "Failed to generate signed URL for photo");
        }
        url
    }

    /// Delete a location's blobs, then the location (photos and detections
    /// follow by cascade). Returns `false` if it did not exist.
    pub async fn delete_location(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let photos = self.db.photos_for_location(id).await?;
        for photo in &photos {
            self.remove_blob(&photo.storage_path).await;
        }

        let deleted = self.db.delete_location(id).await?;
        if deleted {
            tracing::info!(location_id = %id, photos = photos.len(), "Location deleted");
        }
        Ok(deleted)
    }

    /// Delete one photo's blob, then its row.
    pub async fn delete_photo(&self, photo_id: Uuid) -> Result<bool, PersistenceError> {
        let Some(photo) = self.db.get_photo(photo_id).await? else {
            return Ok(false);
        };

        self.remove_blob(&photo.storage_path).await;
        let deleted = self.db.delete_photo(photo_id).await?;
        tracing::info!(%photo_id, "Photo deleted");
        Ok(deleted)
    }

    /// Blob removal never blocks row deletion; failures are only logged.
    async fn remove_blob(&self, stored: &str) {
        let Some(key) = resolve_storage_key(stored, &self.bucket) else {
            tracing::warn!(path = stored, "Skipping blob removal for unmappable path");
            return;
        };
        match self.store.delete(key).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(path = key, "Blob already gone"),
            Err(e) => tracing::warn!(path = key, error = %e, "Failed to delete photo file from storage"),
        }
    }

    pub async fn set_default_location(&self, owner_id: &str, id: Uuid) -> Result<(), PersistenceError> {
        self.db.set_default_location(owner_id, id).await?;
        tracing::info!(owner_id, location_id = %id, "Default location set");
        Ok(())
    }

    pub async fn default_location(&self, owner_id: &str) -> Result<Option<LocationView>, PersistenceError> {
        match self.db.default_location(owner_id).await? {
            Some(location) => Ok(Some(self.view(location).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewPhoto, SqliteStore};
    use crate::detect::{Detection, Position};
    use crate::ingest::UploadSettings;
    use crate::retry::RetryPolicy;
    use crate::test_support::{png_bytes, signer, FlakyStore, BUCKET};

    struct Fixture {
        service: LocationService,
        db: Arc<SqliteStore>,
        store: Arc<FlakyStore>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(SqliteStore::open_in_memory().unwrap());
        let store = Arc::new(FlakyStore::default());
        let uploader = Arc::new(UploadOrchestrator::new(
            store.clone(),
            signer(),
            db.clone(),
            BUCKET,
            Duration::from_secs(3600),
            UploadSettings {
                retry: RetryPolicy::none(),
                ..UploadSettings::default()
            },
        ));
        let service = LocationService::new(
            db.clone(),
            store.clone(),
            signer(),
            uploader,
            BUCKET,
            Duration::from_secs(3600),
            5,
        );
        Fixture { service, db, store }
    }

    fn photos(count: usize) -> Vec<ImageFile> {
        (0..count)
            .map(|i| ImageFile::new(format!("p{}.png", i), "image/png", png_bytes(64, 48)))
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_fetch_with_signed_urls() {
        let f = fixture();
        let created = f
            .service
            .create_location(
                "u1",
                NewLocation {
                    name: "Garage".to_string(),
                    location_type: LocationType::Home,
                    is_default: true,
                    equipment: Vec::new(),
                    photos: photos(2),
                },
                &ProgressSink::none(),
            )
            .await
            .unwrap();
        assert_eq!(created.upload.photos.len(), 2);

        let views = f.service.fetch_locations("u1").await.unwrap();
        assert_eq!(views.len(), 1);
        let orders: Vec<u32> = views[0].photos.iter().map(|p| p.record.order).collect();
        assert_eq!(orders, vec![0, 1]);
        for photo in &views[0].photos {
            let url = photo.url.as_ref().unwrap();
            assert!(url.url.contains(&photo.record.storage_path));
        }

        let default = f.service.default_location("u1").await.unwrap().unwrap();
        assert_eq!(default.location.id, created.location.id);
    }

    #[tokio::test]
    async fn test_add_photos_respects_slots() {
        let f = fixture();
        let created = f
            .service
            .create_location(
                "u1",
                NewLocation {
                    name: "Gym".to_string(),
                    location_type: LocationType::Gym,
                    is_default: false,
                    equipment: Vec::new(),
                    photos: photos(3),
                },
                &ProgressSink::none(),
            )
            .await
            .unwrap();
        let id = created.location.id;

        let added = f
            .service
            .add_photos("u1", id, photos(4), &ProgressSink::none())
            .await
            .unwrap();
        assert_eq!(added.photos.len(), 2);
        let orders: Vec<u32> = added.photos.iter().map(|p| p.order).collect();
        assert_eq!(orders, vec![3, 4]);
        assert_eq!(added.dropped, vec!["p2.png".to_string(), "p3.png".to_string()]);
        assert_eq!(f.store.inner.len(), 5);

        let err = f
            .service
            .add_photos("u1", id, photos(1), &ProgressSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::LocationFull { max: 5 }));

        let err = f
            .service
            .add_photos("u1", Uuid::new_v4(), photos(1), &ProgressSink::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Persistence(PersistenceError::LocationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_location_removes_blobs_and_rows() {
        let f = fixture();
        let created = f
            .service
            .create_location(
                "u1",
                NewLocation {
                    name: "Park".to_string(),
                    location_type: LocationType::Outdoor,
                    is_default: false,
                    equipment: Vec::new(),
                    photos: photos(2),
                },
                &ProgressSink::none(),
            )
            .await
            .unwrap();
        let photo_id = created.upload.photos[0].id;
        f.db
            .save_detections(
                photo_id,
                &[Detection {
                    label: "pull-up bar".to_string(),
                    category: None,
                    position: Position::clamped(0.5, 0.2),
                    confidence: 0.8,
                }],
            )
            .await
            .unwrap();
        assert_eq!(f.store.inner.len(), 2);

        assert!(f.service.delete_location(created.location.id).await.unwrap());
        assert!(f.store.inner.is_empty());
        assert!(f.db.get_photo(photo_id).await.unwrap().is_none());
        assert!(f.db.photo_detections(photo_id).await.unwrap().is_empty());
        assert!(!f.service.delete_location(created.location.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_blob_failure_does_not_block_row_deletion() {
        let f = fixture();
        let location = f
            .db
            .create_location("u1", "Home", LocationType::Home, false)
            .await
            .unwrap();
        // Legacy row holding a full public URL
        let legacy = f
            .db
            .insert_photo(NewPhoto {
                location_id: location.id,
                storage_path: format!(
                    "https://x.example.co/storage/v1/object/public/{}/u1/{}/old.jpg",
                    BUCKET, location.id
                ),
                order: 0,
            })
            .await
            .unwrap();
        f.store
            .inner
            .put(&format!("u1/{}/old.jpg", location.id), b"jpeg", "image/jpeg")
            .await
            .unwrap();

        assert!(f.service.delete_photo(legacy.id).await.unwrap());
        assert!(f.store.inner.is_empty());

        let second = f
            .db
            .insert_photo(NewPhoto {
                location_id: location.id,
                storage_path: format!("u1/{}/kept.jpg", location.id),
                order: 1,
            })
            .await
            .unwrap();
        f.store.fail_deletes();
        assert!(f.service.delete_photo(second.id).await.unwrap());
        assert!(f.db.get_photo(second.id).await.unwrap().is_none());
        assert!(!f.service.delete_photo(second.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_default_location() {
        let f = fixture();
        let a = f
            .db
            .create_location("u1", "A", LocationType::Home, true)
            .await
            .unwrap();
        let b = f
            .db
            .create_location("u1", "B", LocationType::Gym, false)
            .await
            .unwrap();

        f.service.set_default_location("u1", b.id).await.unwrap();
        let default = f.service.default_location("u1").await.unwrap().unwrap();
        assert_eq!(default.location.id, b.id);

        let views = f.service.fetch_locations("u1").await.unwrap();
        let defaults = views.iter().filter(|v| v.location.is_default).count();
        assert_eq!(defaults, 1);
        assert!(views.iter().any(|v| v.location.id == a.id && !v.location.is_default));
    }

    #[tokio::test]
    async fn test_create_reports_photos_over_limit() {
        let f = fixture();
        let created = f
            .service
            .create_location(
                "u1",
                NewLocation {
                    name: "Crowded".to_string(),
                    location_type: LocationType::Gym,
                    is_default: false,
                    equipment: Vec::new(),
                    photos: photos(8),
                },
                &ProgressSink::none(),
            )
            .await
            .unwrap();

        assert_eq!(created.upload.photos.len(), 5);
        assert_eq!(created.upload.failed, 0);
        assert_eq!(
            created.upload.dropped,
            vec!["p5.png".to_string(), "p6.png".to_string(), "p7.png".to_string()]
        );
        assert_eq!(f.store.inner.len(), 5);
    }

    #[tokio::test]
    async fn test_equipment_list_and_view() {
        let f = fixture();
        let created = f
            .service
            .create_location(
                "u1",
                NewLocation {
                    name: "Garage".to_string(),
                    location_type: LocationType::Home,
                    is_default: false,
                    equipment: vec![" dumbbells ".to_string(), "".to_string(), "bench".to_string()],
                    photos: Vec::new(),
                },
                &ProgressSink::none(),
            )
            .await
            .unwrap();
        let id = created.location.id;
        let names: Vec<&str> = created.equipment.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dumbbells", "bench"]);
        assert!(created.equipment.iter().all(|e| !e.is_custom));

        let added = f
            .service
            .add_equipment(id, &["pull-up bar".to_string()])
            .await
            .unwrap();
        assert!(added[0].is_custom);
        assert!(f.service.remove_equipment(created.equipment[0].id).await.unwrap());

        let view = f.service.location(id).await.unwrap().unwrap();
        let names: Vec<&str> = view.equipment.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bench", "pull-up bar"]);
        assert!(view.photos.is_empty());

        assert!(f.service.location(Uuid::new_v4()).await.unwrap().is_none());
        let err = f
            .service
            .add_equipment(Uuid::new_v4(), &["rack".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::LocationNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_location() {
        let f = fixture();
        let a = f
            .db
            .create_location("u1", "A", LocationType::Home, true)
            .await
            .unwrap();
        let b = f
            .db
            .create_location("u1", "B", LocationType::Home, false)
            .await
            .unwrap();

        let updated = f
            .service
            .update_location(
                b.id,
                LocationUpdate {
                    name: Some("  Park  ".to_string()),
                    location_type: Some(LocationType::Outdoor),
                    is_default: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Park");
        assert_eq!(updated.location_type, LocationType::Outdoor);

        let default = f.service.default_location("u1").await.unwrap().unwrap();
        assert_eq!(default.location.id, b.id);
        assert!(!f.db.get_location(a.id).await.unwrap().unwrap().is_default);

        let err = f
            .service
            .update_location(
                a.id,
                LocationUpdate {
                    name: Some("   ".to_string()),
                    ..LocationUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::EmptyName));
        assert_eq!(f.db.get_location(a.id).await.unwrap().unwrap().name, "A");
    }
}
