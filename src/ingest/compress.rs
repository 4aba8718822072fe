use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::error::CompressionError;

/// JPEG ready for upload.
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Target size for an image of `width` x `height` capped at `max_width`.
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    (max_width, scaled.max(1))
}

/// Decode, downscale to `max_width` and re-encode as JPEG.
///
/// CPU bound; call from `spawn_blocking` inside async code.
pub fn compress(bytes: &[u8], max_width: u32, quality: u8) -> Result<CompressedImage, CompressionError> {
    let img = image::load_from_memory(bytes).map_err(CompressionError::Decode)?;

    let (width, height) = target_dimensions(img.width(), img.height(), max_width);
    let img = if (width, height) != (img.width(), img.height()) {
        img.resize_exact(width, height, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();

    let mut data = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut data, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder).map_err(CompressionError::Encode)?;

    Ok(CompressedImage { data, width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;
    use image::ImageFormat;

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(2400, 1200, 1200), (1200, 600));
        assert_eq!(target_dimensions(800, 600, 1200), (800, 600));
        assert_eq!(target_dimensions(3000, 1999, 1200), (1200, 800));
        assert_eq!(target_dimensions(5000, 1, 1200), (1200, 1));
    }

    #[test]
    fn test_compress_downscales_wide_image() {
        let compressed = compress(&png_bytes(2400, 1200), 1200, 85).unwrap();
        assert_eq!((compressed.width, compressed.height), (1200, 600));

        let decoded = image::load_from_memory(&compressed.data).unwrap();
        assert_eq!(image::guess_format(&compressed.data).unwrap(), ImageFormat::Jpeg);
        assert_eq!((decoded.width(), decoded.height()), (1200, 600));
    }

    #[test]
    fn test_compress_keeps_small_image_size() {
        let compressed = compress(&png_bytes(640, 480), 1200, 85).unwrap();
        assert_eq!((compressed.width, compressed.height), (640, 480));
    }

    #[test]
    fn test_compress_rejects_garbage() {
        let err = compress(b"definitely not an image", 1200, 85).unwrap_err();
        assert!(matches!(err, CompressionError::Decode(_)));
    }
}
