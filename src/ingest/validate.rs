use std::path::Path;

use crate::error::ValidationError;

/// Default upload cap: 10 MiB.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub const ALLOWED_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// A photo selected for upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data,
        }
    }

    /// Read a file from disk, deriving the MIME type from its extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            mime: mime_for_path(path).to_string(),
            data,
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Check type, emptiness and size, in that order.
pub fn validate(file: &ImageFile, max_bytes: u64) -> Result<(), ValidationError> {
    if !ALLOWED_TYPES.contains(&file.mime.as_str()) {
        return Err(ValidationError::UnsupportedType {
            mime: file.mime.clone(),
            allowed: ALLOWED_TYPES.join(", "),
        });
    }

    if file.size() == 0 {
        return Err(ValidationError::Empty);
    }

    if file.size() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: file.size(),
            max_mb: max_bytes / 1024 / 1024,
        });
    }

    Ok(())
}

/// Split a selection into acceptable files and `"name: reason"` rejections.
pub fn validate_files(files: Vec<ImageFile>, max_bytes: u64) -> (Vec<ImageFile>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for file in files {
        match validate(&file, max_bytes) {
            Ok(()) => accepted.push(file),
            Err(e) => rejected.push(format!("{}: {}", file.name, e)),
        }
    }

    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(mime: &str, len: usize) -> ImageFile {
        ImageFile::new("photo", mime, vec![0u8; len])
    }

    #[test]
    fn test_validate_accepts_allowed_types() {
        for mime in ALLOWED_TYPES {
            assert!(validate(&file(mime, 10), MAX_FILE_SIZE).is_ok(), "{}", mime);
        }
    }

    #[test]
    fn test_validate_rejections() {
        let err = validate(&file("image/gif", 10), MAX_FILE_SIZE).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedType { .. }));
        assert!(err.to_string().contains("image/webp"));

        assert_eq!(
            validate(&file("image/png", 0), MAX_FILE_SIZE),
            Err(ValidationError::Empty)
        );

        let err = validate(&file("image/png", MAX_FILE_SIZE as usize + 1), MAX_FILE_SIZE).unwrap_err();
        assert_eq!(err.to_string(), format!("File too large ({} bytes, max 10MB)", MAX_FILE_SIZE + 1));

        // Exactly at the cap is fine
        assert!(validate(&file("image/png", MAX_FILE_SIZE as usize), MAX_FILE_SIZE).is_ok());
    }

    #[test]
    fn test_validate_files_partitions() {
        let files = vec![
            ImageFile::new("a.jpg", "image/jpeg", vec![1, 2, 3]),
            ImageFile::new("b.gif", "image/gif", vec![1]),
            ImageFile::new("c.png", "image/png", vec![]),
        ];

        let (accepted, rejected) = validate_files(files, MAX_FILE_SIZE);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].name, "a.jpg");
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].starts_with("b.gif: Unsupported format"));
        assert_eq!(rejected[1], "c.png: Empty file");
    }

    #[tokio::test]
    async fn test_from_path_derives_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bench.JPEG");
        std::fs::write(&path, b"jpeg bytes").unwrap();

        let file = ImageFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "Bench.JPEG");
        assert_eq!(file.mime, "image/jpeg");
        assert_eq!(file.size(), 10);
    }
}
