pub const SCHEMA: &str = r#"
-- Training locations owned by a user
CREATE TABLE IF NOT EXISTS training_locations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    location_type TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_locations_owner ON training_locations(owner_id);

-- Photos of a location; storage_path is a bucket key, never a URL
CREATE TABLE IF NOT EXISTS training_location_photos (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES training_locations(id) ON DELETE CASCADE,
    storage_path TEXT NOT NULL UNIQUE,
    photo_order INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_photos_location ON training_location_photos(location_id, photo_order);

-- Equipment listed on a location by hand; is_custom marks later additions
CREATE TABLE IF NOT EXISTS training_location_equipment (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES training_locations(id) ON DELETE CASCADE,
    equipment_name TEXT NOT NULL,
    is_custom INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_equipment_location ON training_location_equipment(location_id);

-- Equipment found in a photo by the detector
CREATE TABLE IF NOT EXISTS equipment_detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id TEXT NOT NULL REFERENCES training_location_photos(id) ON DELETE CASCADE,
    label TEXT NOT NULL,
    category TEXT,
    position_x REAL NOT NULL,
    position_y REAL NOT NULL,
    confidence REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detections_photo ON equipment_detections(photo_id);
"#;
