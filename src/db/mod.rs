//! Metadata store for locations, photo records and detections.

mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::detect::Detection;
use crate::error::PersistenceError;

pub use schema::SCHEMA;
pub use sqlite::SqliteStore;

/// Kind of training space; steers what the detector looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Home,
    Gym,
    Outdoor,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Home => "home",
            LocationType::Gym => "gym",
            LocationType::Outdoor => "outdoor",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "home" => Ok(LocationType::Home),
            "gym" => Ok(LocationType::Gym),
            "outdoor" => Ok(LocationType::Outdoor),
            other => Err(format!(
                "unknown location type '{}' (expected home, gym or outdoor)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub location_type: LocationType,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted photo. Never mutated after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: Uuid,
    pub location_id: Uuid,
    pub storage_path: String,
    pub order: u32,
    pub created_at: DateTime<Utc>,
}

/// Changes to a location; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationUpdate {
    pub name: Option<String>,
    pub location_type: Option<LocationType>,
    pub is_default: Option<bool>,
}

impl LocationUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.location_type.is_none() && self.is_default.is_none()
    }
}

/// A piece of equipment listed on a location by the user, as opposed to
/// one found by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEquipment {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    /// Added after the location was created.
    pub is_custom: bool,
    pub created_at: DateTime<Utc>,
}

/// Photo row to insert; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub location_id: Uuid,
    pub storage_path: String,
    pub order: u32,
}

/// Row-level persistence used by the pipeline.
///
/// Deleting a location or photo removes rows only; blob cleanup is the
/// caller's job and must happen first.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_location(
        &self,
        owner_id: &str,
        name: &str,
        location_type: LocationType,
        is_default: bool,
    ) -> Result<Location, PersistenceError>;

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, PersistenceError>;

    /// Newest first.
    async fn locations_for_owner(&self, owner_id: &str) -> Result<Vec<Location>, PersistenceError>;

    /// Apply `update`; setting `is_default` clears the owner's other defaults.
    async fn update_location(
        &self,
        id: Uuid,
        update: &LocationUpdate,
    ) -> Result<Location, PersistenceError>;

    /// Removes the location and, by cascade, its photos, equipment and detections.
    async fn delete_location(&self, id: Uuid) -> Result<bool, PersistenceError>;

    /// Make `id` the owner's only default location.
    async fn set_default_location(&self, owner_id: &str, id: Uuid) -> Result<(), PersistenceError>;

    async fn default_location(&self, owner_id: &str) -> Result<Option<Location>, PersistenceError>;

    /// Fails with `LocationNotFound` if the location does not exist.
    async fn add_equipment(
        &self,
        location_id: Uuid,
        names: &[String],
        is_custom: bool,
    ) -> Result<Vec<LocationEquipment>, PersistenceError>;

    async fn remove_equipment(&self, id: Uuid) -> Result<bool, PersistenceError>;

    /// In insertion order.
    async fn location_equipment(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<LocationEquipment>, PersistenceError>;

    async fn insert_photo(&self, photo: NewPhoto) -> Result<PhotoRecord, PersistenceError>;

    async fn get_photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, PersistenceError>;

    /// Ordered by `order`.
    async fn photos_for_location(&self, location_id: Uuid)
        -> Result<Vec<PhotoRecord>, PersistenceError>;

    async fn delete_photo(&self, id: Uuid) -> Result<bool, PersistenceError>;

    /// Replace the stored detections of a photo.
    async fn save_detections(
        &self,
        photo_id: Uuid,
        detections: &[Detection],
    ) -> Result<(), PersistenceError>;

    async fn photo_detections(&self, photo_id: Uuid) -> Result<Vec<Detection>, PersistenceError>;
}
