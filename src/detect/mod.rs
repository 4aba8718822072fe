//! Equipment detection in location photos.
//!
//! The detector is remote and slow (tens of seconds per photo) and every call
//! can fail on its own. Backends persist the detections they produce; callers
//! read them back through the metadata store for display.

pub mod llm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::LocationType;
use crate::error::DetectionError;

pub use llm::LlmDetector;

/// Normalized position in the photo, both axes in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn clamped(x: f32, y: f32) -> Self {
        Self {
            x: clamp_unit(x),
            y: clamp_unit(y),
        }
    }
}

/// One piece of equipment found in a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub category: Option<String>,
    pub position: Position,
    pub confidence: f32,
}

/// Everything the detector needs to analyse one photo.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub photo_url: String,
    pub photo_id: Uuid,
    pub location_id: Uuid,
    pub location_type: LocationType,
    /// Storage key, for backends that load the bytes themselves.
    pub storage_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub equipment_count: usize,
    pub detections: Vec<Detection>,
}

/// External AI detector.
#[async_trait]
pub trait EquipmentDetector: Send + Sync {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutcome, DetectionError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Clamp to `0.0..=1.0`, mapping NaN to 0.
pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
