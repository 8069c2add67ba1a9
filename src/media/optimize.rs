//! Lossy image re-encoding

use crate::error::MediaError;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Extensions the optimizer will touch
const OPTIMIZABLE: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

/// Whether files with extension `ext` (including the dot) are re-encoded
pub fn is_optimizable(ext: &str) -> bool {
    OPTIMIZABLE.contains(&ext.to_ascii_lowercase().as_str())
}

/// Re-encode the image at `path` in place as an RGB JPEG
///
/// Blocking; call from `spawn_blocking`. Returns bytes saved, which is negative
/// when the re-encoded file is larger. On any failure the original file is left
/// untouched.
pub fn optimize_image(path: &Path, quality: u8) -> Result<i64, MediaError> {
    let original = std::fs::read(path)?;
    let original_size = original.len() as i64;

    let decoded = image::load_from_memory(&original).map_err(|e| MediaError::Optimize {
        path: path.to_path_buf(),
        reason: format!("decode: {}", e),
    })?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let tmp = optimize_temp_path(path);
    let encoded = (|| -> Result<(), MediaError> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| MediaError::Optimize {
                path: path.to_path_buf(),
                reason: format!("encode: {}", e),
            })?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = encoded {
        std::fs::remove_file(&tmp).ok();
        return Err(e);
    }

    let new_size = std::fs::metadata(&tmp)?.len() as i64;
    if let Err(e) = std::fs::rename(&tmp, path) {
        std::fs::remove_file(&tmp).ok();
        return Err(e.into());
    }

    Ok(original_size - new_size)
}

fn optimize_temp_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{}.opt{}", stem, ext))
}
