//! SQLite backend for the metadata store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::schema::SCHEMA;
use super::{
    Location, LocationEquipment, LocationType, LocationUpdate, MetadataStore, NewPhoto, PhotoRecord,
};
use crate::detect::{Detection, Position};
use crate::error::PersistenceError;

/// Metadata store on a single SQLite connection.
///
/// Queries are short and never held across an await, so a plain mutex
/// around the connection is enough.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(value).map_err(|_| PersistenceError::Corrupt {
        column,
        value: value.to_string(),
    })
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| PersistenceError::Corrupt {
            column,
            value: value.to_string(),
        })
}

const LOCATION_COLUMNS: &str = "id, owner_id, name, location_type, is_default, created_at";
const PHOTO_COLUMNS: &str = "id, location_id, storage_path, photo_order, created_at";
const EQUIPMENT_COLUMNS: &str = "id, location_id, equipment_name, is_custom, created_at";

struct LocationRow {
    id: String,
    owner_id: String,
    name: String,
    location_type: String,
    is_default: bool,
    created_at: String,
}

impl LocationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            location_type: row.get(3)?,
            is_default: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_location(self) -> Result<Location, PersistenceError> {
        let location_type =
            self.location_type
                .parse::<LocationType>()
                .map_err(|_| PersistenceError::Corrupt {
                    column: "location_type",
                    value: self.location_type.clone(),
                })?;
        Ok(Location {
            id: parse_uuid("id", &self.id)?,
            owner_id: self.owner_id,
            name: self.name,
            location_type,
            is_default: self.is_default,
            created_at: parse_time("created_at", &self.created_at)?,
        })
    }
}

struct PhotoRow {
    id: String,
    location_id: String,
    storage_path: String,
    order: u32,
    created_at: String,
}

impl PhotoRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            location_id: row.get(1)?,
            storage_path: row.get(2)?,
            order: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<PhotoRecord, PersistenceError> {
        Ok(PhotoRecord {
            id: parse_uuid("id", &self.id)?,
            location_id: parse_uuid("location_id", &self.location_id)?,
            storage_path: self.storage_path,
            order: self.order,
            created_at: parse_time("created_at", &self.created_at)?,
        })
    }
}

struct EquipmentRow {
    id: String,
    location_id: String,
    name: String,
    is_custom: bool,
    created_at: String,
}

impl EquipmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            location_id: row.get(1)?,
            name: row.get(2)?,
            is_custom: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_equipment(self) -> Result<LocationEquipment, PersistenceError> {
        Ok(LocationEquipment {
            id: parse_uuid("id", &self.id)?,
            location_id: parse_uuid("location_id", &self.location_id)?,
            name: self.name,
            is_custom: self.is_custom,
            created_at: parse_time("created_at", &self.created_at)?,
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn create_location(
        &self,
        owner_id: &str,
        name: &str,
        location_type: LocationType,
        is_default: bool,
    ) -> Result<Location, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if is_default {
            tx.execute(
                "UPDATE training_locations SET is_default = 0 WHERE owner_id = ?",
                [owner_id],
            )?;
        }

        let id = Uuid::new_v4();
        let created_at = now_text();
        tx.execute(
            r#"
            INSERT INTO training_locations (id, owner_id, name, location_type, is_default, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                id.to_string(),
                owner_id,
                name,
                location_type.as_str(),
                is_default,
                created_at
            ],
        )?;
        tx.commit()?;

        Ok(Location {
            id,
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            location_type,
            is_default,
            created_at: parse_time("created_at", &created_at)?,
        })
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>, PersistenceError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM training_locations WHERE id = ?", LOCATION_COLUMNS),
                [id.to_string()],
                LocationRow::from_row,
            )
            .optional()?;
        row.map(LocationRow::into_location).transpose()
    }

    async fn locations_for_owner(&self, owner_id: &str) -> Result<Vec<Location>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM training_locations WHERE owner_id = ? ORDER BY created_at DESC",
            LOCATION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([owner_id], LocationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(LocationRow::into_location).collect()
    }

    async fn update_location(
        &self,
        id: Uuid,
        update: &LocationUpdate,
    ) -> Result<Location, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                &format!("SELECT {} FROM training_locations WHERE id = ?", LOCATION_COLUMNS),
                [id.to_string()],
                LocationRow::from_row,
            )
            .optional()?
            .ok_or(PersistenceError::LocationNotFound(id))?;
        let mut location = row.into_location()?;

        if let Some(name) = &update.name {
            location.name = name.clone();
        }
        if let Some(location_type) = update.location_type {
            location.location_type = location_type;
        }
        if let Some(is_default) = update.is_default {
            if is_default {
                tx.execute(
                    "UPDATE training_locations SET is_default = 0 WHERE owner_id = ?",
                    [&location.owner_id],
                )?;
            }
            location.is_default = is_default;
        }

        tx.execute(
            "UPDATE training_locations SET name = ?, location_type = ?, is_default = ? WHERE id = ?",
            params![
                location.name,
                location.location_type.as_str(),
                location.is_default,
                id.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(location)
    }

    async fn delete_location(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM training_locations WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn set_default_location(&self, owner_id: &str, id: Uuid) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE training_locations SET is_default = 0 WHERE owner_id = ?",
            [owner_id],
        )?;
        let updated = tx.execute(
            "UPDATE training_locations SET is_default = 1 WHERE id = ? AND owner_id = ?",
            params![id.to_string(), owner_id],
        )?;
        if updated == 0 {
            // Dropping the transaction rolls back the reset above
            return Err(PersistenceError::LocationNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    async fn default_location(&self, owner_id: &str) -> Result<Option<Location>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM training_locations WHERE owner_id = ? AND is_default = 1 ORDER BY created_at DESC",
            LOCATION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([owner_id], LocationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if rows.len() > 1 {
            tracing::warn!(owner_id, count = rows.len(), "Multiple default locations found, using newest");
        }
        rows.into_iter().next().map(LocationRow::into_location).transpose()
    }

    async fn add_equipment(
        &self,
        location_id: Uuid,
        names: &[String],
        is_custom: bool,
    ) -> Result<Vec<LocationEquipment>, PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM training_locations WHERE id = ?",
                [location_id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(PersistenceError::LocationNotFound(location_id));
        }

        let created_at = now_text();
        let mut added = Vec::with_capacity(names.len());
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO training_location_equipment ({}) VALUES (?, ?, ?, ?, ?)",
                EQUIPMENT_COLUMNS
            ))?;
            for name in names {
                let id = Uuid::new_v4();
                stmt.execute(params![
                    id.to_string(),
                    location_id.to_string(),
                    name,
                    is_custom,
                    created_at
                ])?;
                added.push(LocationEquipment {
                    id,
                    location_id,
                    name: name.clone(),
                    is_custom,
                    created_at: parse_time("created_at", &created_at)?,
                });
            }
        }

        tx.commit()?;
        Ok(added)
    }

    async fn remove_equipment(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM training_location_equipment WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn location_equipment(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<LocationEquipment>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM training_location_equipment WHERE location_id = ? ORDER BY created_at ASC, rowid ASC",
            EQUIPMENT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([location_id.to_string()], EquipmentRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EquipmentRow::into_equipment).collect()
    }

    async fn insert_photo(&self, photo: NewPhoto) -> Result<PhotoRecord, PersistenceError> {
        let conn = self.conn()?;
        let id = Uuid::new_v4();
        let created_at = now_text();
        conn.execute(
            r#"
            INSERT INTO training_location_photos (id, location_id, storage_path, photo_order, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                id.to_string(),
                photo.location_id.to_string(),
                photo.storage_path,
                photo.order,
                created_at
            ],
        )?;

        Ok(PhotoRecord {
            id,
            location_id: photo.location_id,
            storage_path: photo.storage_path,
            order: photo.order,
            created_at: parse_time("created_at", &created_at)?,
        })
    }

    async fn get_photo(&self, id: Uuid) -> Result<Option<PhotoRecord>, PersistenceError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM training_location_photos WHERE id = ?", PHOTO_COLUMNS),
                [id.to_string()],
                PhotoRow::from_row,
            )
            .optional()?;
        row.map(PhotoRow::into_record).transpose()
    }

    async fn photos_for_location(
        &self,
        location_id: Uuid,
    ) -> Result<Vec<PhotoRecord>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM training_location_photos WHERE location_id = ? ORDER BY photo_order ASC, created_at ASC",
            PHOTO_COLUMNS
        ))?;
        let rows = stmt
            .query_map([location_id.to_string()], PhotoRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(PhotoRow::into_record).collect()
    }

    async fn delete_photo(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM training_location_photos WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn save_detections(
        &self,
        photo_id: Uuid,
        detections: &[Detection],
    ) -> Result<(), PersistenceError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let photo_id = photo_id.to_string();

        tx.execute(
            "DELETE FROM equipment_detections WHERE photo_id = ?",
            [&photo_id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO equipment_detections
                    (photo_id, label, category, position_x, position_y, confidence, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            let created_at = now_text();
            for d in detections {
                stmt.execute(params![
                    photo_id,
                    d.label,
                    d.category,
                    d.position.x as f64,
                    d.position.y as f64,
                    d.confidence as f64,
                    created_at
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn photo_detections(&self, photo_id: Uuid) -> Result<Vec<Detection>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT label, category, position_x, position_y, confidence
            FROM equipment_detections
            WHERE photo_id = ?
            ORDER BY confidence DESC, id ASC
            "#,
        )?;
        let detections = stmt
            .query_map([photo_id.to_string()], |row| {
                Ok(Detection {
                    label: row.get(0)?,
                    category: row.get(1)?,
                    position: Position {
                        x: row.get::<_, f64>(2)? as f32,
                        y: row.get::<_, f64>(3)? as f32,
                    },
                    confidence: row.get::<_, f64>(4)? as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(detections)
    }
}
