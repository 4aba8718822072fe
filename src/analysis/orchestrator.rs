use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use super::progress::{header_progress, spawn_ticker};
use super::status::{AnalysisStatus, PhotoAnalysis, StatusBoard, StatusMap};
use crate::config::AnalysisConfig;
use crate::db::{Location, MetadataStore, PhotoRecord};
use crate::detect::{Detection, DetectionRequest, EquipmentDetector};
use crate::error::{AnalysisError, DetectionError};
use crate::storage::UrlSigner;

/// Totals for the current batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub completed_count: usize,
    pub error_count: usize,
    pub total_equipment_found: usize,
    pub elapsed_seconds: u64,
}

struct Session {
    photos: HashMap<Uuid, PhotoRecord>,
    location: Location,
    started: Instant,
}

/// Runs the detector over a batch of photos concurrently and keeps the
/// per-photo status board current.
pub struct DetectionOrchestrator {
    detector: Arc<dyn EquipmentDetector>,
    store: Arc<dyn MetadataStore>,
    signer: Arc<dyn UrlSigner>,
    bucket: String,
    ttl: Duration,
    board: StatusBoard,
    session: Mutex<Option<Session>>,
    detections: Mutex<HashMap<Uuid, Vec<Detection>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick: Duration,
    header_budget: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl DetectionOrchestrator {
    pub fn new(
        detector: Arc<dyn EquipmentDetector>,
        store: Arc<dyn MetadataStore>,
        signer: Arc<dyn UrlSigner>,
        bucket: &str,
        ttl: Duration,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            detector,
            store,
            signer,
            bucket: bucket.to_string(),
            ttl,
            board: StatusBoard::new(),
            session: Mutex::new(None),
            detections: Mutex::new(HashMap::new()),
            ticker: Mutex::new(None),
            tick: config.tick(),
            header_budget: config.header_budget(),
        }
    }

    /// Analyse every photo at once. Individual failures end up on the board;
    /// the batch itself never fails.
    #[instrument(skip(self, photos, location), fields(location_id = %location.id, count = photos.len()))]
    pub async fn analyze_batch(&self, photos: Vec<PhotoRecord>, location: &Location) -> AnalysisSummary {
        self.board.reset(photos.iter().map(|p| p.id));
        lock(&self.detections).clear();
        *lock(&self.session) = Some(Session {
            photos: photos.iter().map(|p| (p.id, p.clone())).collect(),
            location: location.clone(),
            started: Instant::now(),
        });
        self.restart_ticker();

        tracing::info!(detector = self.detector.name(), "Starting equipment analysis");

        join_all(photos.iter().map(|photo| self.analyze_photo(photo, location))).await;

        let summary = self.summary();
        tracing::info!(
            completed = summary.completed_count,
            errors = summary.error_count,
            equipment = summary.total_equipment_found,
            elapsed_secs = summary.elapsed_seconds,
            "Equipment analysis finished"
        );
        summary
    }

    /// Re-run detection for one photo currently in error.
    pub async fn retry_one(&self, photo_id: Uuid) -> Result<PhotoAnalysis, AnalysisError> {
        let (photo, location) = {
            let session = lock(&self.session);
            session
                .as_ref()
                .and_then(|s| s.photos.get(&photo_id).map(|p| (p.clone(), s.location.clone())))
                .ok_or(AnalysisError::UnknownPhoto(photo_id))?
        };

        match self.board.get(photo_id) {
            Some(current) if current.status == AnalysisStatus::Error => {}
            Some(_) => return Err(AnalysisError::NotRetryable(photo_id)),
            None => return Err(AnalysisError::UnknownPhoto(photo_id)),
        }

        tracing::info!(%photo_id, "Retrying equipment analysis");
        self.ensure_ticker();
        self.analyze_photo(&photo, &location).await;

        self.board
            .get(photo_id)
            .ok_or(AnalysisError::UnknownPhoto(photo_id))
    }

    async fn analyze_photo(&self, photo: &PhotoRecord, location: &Location) {
        if !self.board.transition(photo.id, PhotoAnalysis::analyzing()) {
            return;
        }

        match self.detect(photo, location).await {
            Ok(equipment_count) => {
                self.board
                    .transition(photo.id, PhotoAnalysis::completed(equipment_count));
                tracing::info!(photo_id = %photo.id, equipment_count, "Photo analysed");

                // Display only; the photo is already complete
                match self.store.photo_detections(photo.id).await {
                    Ok(found) => {
                        lock(&self.detections).insert(photo.id, found);
                    }
                    Err(e) => {
                        tracing::warn!(photo_id = %photo.id, error = %e, "Failed to load detections");
                    }
                }
            }
            Err(e) => {
                tracing::error!(photo_id = %photo.id, error = %e, "Photo analysis failed");
                self.board
                    .transition(photo.id, PhotoAnalysis::failed(e.to_string()));
            }
        }
    }

    async fn detect(&self, photo: &PhotoRecord, location: &Location) -> Result<usize, DetectionError> {
        let signed = self
            .signer
            .sign(&self.bucket, &photo.storage_path, self.ttl)
            .await
            .ok_or(DetectionError::Unsigned(photo.id))?;

        let request = DetectionRequest {
            photo_url: signed.url,
            photo_id: photo.id,
            location_id: location.id,
            location_type: location.location_type,
            storage_path: photo.storage_path.clone(),
        };

        let outcome = self.detector.detect(&request).await?;
        Ok(outcome.equipment_count)
    }

    fn restart_ticker(&self) {
        let mut ticker = lock(&self.ticker);
        if let Some(old) = ticker.take() {
            old.abort();
        }
        *ticker = Some(spawn_ticker(self.board.clone(), self.tick));
    }

    fn ensure_ticker(&self) {
        let mut ticker = lock(&self.ticker);
        if ticker.as_ref().map_or(true, |t| t.is_finished()) {
            *ticker = Some(spawn_ticker(self.board.clone(), self.tick));
        }
    }

    /// True iff every photo of the batch is completed or in error.
    pub fn all_complete(&self) -> bool {
        self.board.all_complete()
    }

    pub fn summary(&self) -> AnalysisSummary {
        let snapshot = self.board.snapshot();
        let mut summary = AnalysisSummary {
            elapsed_seconds: self.elapsed().as_secs(),
            ..AnalysisSummary::default()
        };
        for analysis in snapshot.values() {
            match analysis.status {
                AnalysisStatus::Completed => {
                    summary.completed_count += 1;
                    summary.total_equipment_found += analysis.equipment_count.unwrap_or(0);
                }
                AnalysisStatus::Error => summary.error_count += 1,
                _ => {}
            }
        }
        summary
    }

    /// Batch-level progress in percent for the header bar.
    pub fn header_progress(&self) -> f32 {
        header_progress(self.elapsed(), self.header_budget, self.all_complete())
    }

    fn elapsed(&self) -> Duration {
        lock(&self.session)
            .as_ref()
            .map(|s| s.started.elapsed())
            .unwrap_or_default()
    }

    pub fn status(&self, photo_id: Uuid) -> Option<PhotoAnalysis> {
        self.board.get(photo_id)
    }

    pub fn snapshot(&self) -> Arc<StatusMap> {
        self.board.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusMap>> {
        self.board.subscribe()
    }

    /// Detections loaded for display after a photo completed.
    pub fn detections(&self, photo_id: Uuid) -> Vec<Detection> {
        lock(&self.detections)
            .get(&photo_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Drop for DetectionOrchestrator {
    fn drop(&mut self) {
        if let Some(ticker) = lock(&self.ticker).take() {
            ticker.abort();
        }
    }
}
