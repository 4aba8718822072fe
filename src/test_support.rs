//! Test doubles shared by the pipeline tests.

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::db::{
    Location, LocationEquipment, LocationType, LocationUpdate, MetadataStore, NewPhoto, PhotoRecord,
    SqliteStore,
};
use crate::detect::{
    Detection, DetectionOutcome, DetectionRequest, EquipmentDetector, Position,
};
use crate::error::{DetectionError, PersistenceError, StorageError};
use crate::storage::{MemoryStore, ObjectStore, Sha256Signer, SignedUrl, UrlSigner};

pub const BUCKET: &str = "training-locations";

/// Encode a solid, half-transparent test image as PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([200, 80, 40, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn signer() -> Arc<Sha256Signer> {
    Arc::new(Sha256Signer::new("http://storage.test/storage/v1", "test-secret"))
}

/// Signer that can never produce a URL.
pub struct NoSigner;

#[async_trait]
impl UrlSigner for NoSigner {
    async fn sign(&self, _bucket: &str, _path: &str, _ttl: Duration) -> Option<SignedUrl> {
        None
    }
}

/// Memory store whose first `failures` puts fail with an IO error.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: AtomicU32,
    pub put_calls: AtomicU32,
    fail_deletes: AtomicBool,
}

impl FlakyStore {
    pub fn failing(failures: u32) -> Self {
        let store = Self::default();
        store.failures.store(failures, Ordering::SeqCst);
        store
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn puts(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Io(std::io::Error::other("connection reset")));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("delete refused")));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }
}

/// SQLite store with switchable faults.
pub struct FaultyDb {
    pub inner: SqliteStore,
    pub fail_inserts: AtomicBool,
    pub fail_detection_reads: AtomicBool,
}

impl FaultyDb {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_inserts: AtomicBool::new(false),
            fail_detection_reads: AtomicBool::new(false),
        }
    }
}

fn injected() -> PersistenceError {
    PersistenceError::Io(std::io::Error::other("injected failure"))
}

#[async_trait]
impl MetadataStore for FaultyDb {
    async fn create_location(
        &self,
        owner_id: &str,
        name: &str,
        location_type: LocationType,
        is_default: bool,
    ) -> Result<Location, PersistenceError> {
        self.inner
            .create_location(owner_id, name, location_type, is_default)
            .await
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, PersistenceError> {
        self.inner.get_location(id).await
    }

    async fn locations_for_owner(&self, owner_id: &str) -> Result<Vec<Location>, PersistenceError> {
        self.inner.locations_for_owner(owner_id).await
    }

    async fn update_location(
        &self,
        id: Uuid,
        update: &LocationUpdate,
    ) -> Result<Location, PersistenceError> {
        self.inner.update_location(id, update).await
    }

    async fn delete_location(&self, id: Uuid) -> Result<bool, PersistenceError> {
        self.inner.delete_location(id).await
    }

    async fn set_default_location(&self, owner_id: &str, id: Uuid) -> Result<(), PersistenceError> {
        self.inner.set_default_location(owner_id, id).await
    }

    async fn default_location(&self, owner_id: &str) -> Result<Option<Location>, PersistenceError> {
        self.inner.default_location(owner_id).await
    }

    async fn add_equipment(
        &self,
        location_id: Uuid,
        names: &[String],
        is_custom: bool,
    ) -> Result<Vec<LocationEquipment>, PersistenceError> {
        self.inner.add_equipment(location_id, names, is_custom).await
    }

    async fn remove_equipment(&self, id: Uuid) -> Result<bool, PersistenceError> {
        self.inner.remove_equipment(id).await
    }

    async fn location_equipment(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<LocationEquipment>, PersistenceError> {
        self.inner.location_equipment(location_id).await
    }

    async fn insert_photo(&self, photo: NewPhoto) -> Result<PhotoRecord, PersistenceError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.insert_photo(photo).await
    }

    async fn get_photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, PersistenceError> {
        self.inner.get_photo(id).await
    }

    async fn photos_for_location(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<PhotoRecord>, PersistenceError> {
        self.inner.photos_for_location(location_id).await
    }

    async fn delete_photo(&self, id: Uuid) -> Result<bool, PersistenceError> {
        self.inner.delete_photo(id).await
    }

    async fn save_detections(
        &self,
        photo_id: Uuid,
        detections: &[Detection],
    ) -> Result<(), PersistenceError> {
        self.inner.save_detections(photo_id, detections).await
    }

    async fn photo_detections(&self, photo_id: Uuid) -> Result<Vec<Detection>, PersistenceError> {
        if self.fail_detection_reads.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.photo_detections(photo_id).await
    }
}

/// Detector with per-photo scripted failures and a fixed latency.
pub struct ScriptedDetector {
    store: Arc<dyn MetadataStore>,
    equipment: usize,
    latency: Duration,
    failures: Mutex<HashMap<Uuid, u32>>,
    pub calls: AtomicU32,
}

impl ScriptedDetector {
    pub fn new(store: Arc<dyn MetadataStore>, equipment: usize, latency: Duration) -> Self {
        Self {
            store,
            equipment,
            latency,
            failures: Mutex::new(HashMap::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the next `times` calls for `photo_id`.
    pub fn fail(&self, photo_id: Uuid, times: u32) {
        self.failures.lock().unwrap().insert(photo_id, times);
    }
}

#[async_trait]
impl EquipmentDetector for ScriptedDetector {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutcome, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.photo_url.contains(&request.storage_path));

        tokio::time::sleep(self.latency).await;

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&request.photo_id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(DetectionError::Request("model unavailable".to_string()));
        }

        let detections: Vec<Detection> = (0..self.equipment)
            .map(|i| Detection {
                label: format!("item-{}", i),
                category: Some("strength".to_string()),
                position: Position::clamped(0.1 * i as f32, 0.5),
                confidence: 0.9,
            })
            .collect();
        self.store.save_detections(request.photo_id, &detections).await?;

        Ok(DetectionOutcome {
            equipment_count: detections.len(),
            detections,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
