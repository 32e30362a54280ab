use image::imageops::FilterType;
use image::DynamicImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

const JPEG_QUALITY: u8 = 95;

/// Scale-to-cover then center-crop downloaded image bytes to an exact pixel
/// target, preserving aspect ratio. The generation service is free to return
/// any aspect ratio; every stored artifact must have the configured
/// dimensions exactly.
pub fn aspect_fill(data: &[u8], target_width: u32, target_height: u32) -> PipelineResult<DynamicImage> {
    let img = image::load_from_memory(data)
        .map_err(|e| PipelineError::service("image", format!("undecodable image data: {e}")))?;

    let (width, height) = (img.width(), img.height());
    debug!("post-processing image {}x{} -> {}x{}", width, height, target_width, target_height);

    let target_ratio = target_width as f64 / target_height as f64;
    let img_ratio = width as f64 / height as f64;

    let cropped = if img_ratio > target_ratio {
        // Wider than the target: scale to the target height, crop the sides.
        let new_height = target_height;
        let new_width = ((new_height as f64 * img_ratio) as u32).max(target_width);
        let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);
        let left = (new_width - target_width) / 2;
        resized.crop_imm(left, 0, target_width, target_height)
    } else {
        // Taller than the target: scale to the target width, crop top/bottom.
        let new_width = target_width;
        let new_height = ((new_width as f64 / img_ratio) as u32).max(target_height);
        let resized = img.resize_exact(new_width, new_height, FilterType::Lanczos3);
        let top = (new_height - target_height) / 2;
        resized.crop_imm(0, top, target_width, target_height)
    };

    Ok(cropped)
}

/// Save an image as JPEG at the quality used for all generated artifacts.
pub fn save_jpeg(img: &DynamicImage, path: &Path) -> PipelineResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| PipelineError::service("image", format!("jpeg encode failed: {e}")))?;
    Ok(())
}

/// Crop-and-save in one step; every body image and the thumbnail go through
/// this path.
pub fn save_cropped_jpeg(
    data: &[u8],
    target_width: u32,
    target_height: u32,
    path: &Path,
) -> PipelineResult<()> {
    let img = aspect_fill(data, target_width, target_height)?;
    save_jpeg(&img, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 40, 200]),
        ));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_wider_input_is_cropped_to_exact_target() {
        let out = aspect_fill(&png_bytes(400, 100), 64, 36).unwrap();
        assert_eq!((out.width(), out.height()), (64, 36));
    }

    #[test]
    fn test_taller_input_is_cropped_to_exact_target() {
        let out = aspect_fill(&png_bytes(100, 400), 64, 36).unwrap();
        assert_eq!((out.width(), out.height()), (64, 36));
    }

    #[test]
    fn test_exact_ratio_input_keeps_target_dimensions() {
        let out = aspect_fill(&png_bytes(128, 72), 64, 36).unwrap();
        assert_eq!((out.width(), out.height()), (64, 36));
    }

    #[test]
    fn test_undecodable_data_is_a_service_error() {
        let err = aspect_fill(b"not an image", 64, 36).unwrap_err();
        assert!(matches!(err, PipelineError::Service { service: "image", .. }));
    }

    #[test]
    fn test_save_cropped_jpeg_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.jpg");
        save_cropped_jpeg(&png_bytes(300, 100), 64, 36, &path).unwrap();

        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 36));
    }
}
