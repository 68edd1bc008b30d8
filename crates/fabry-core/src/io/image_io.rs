use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use ndarray::Array2;

use crate::cube::{Map2, MapElement};
use crate::error::{FabryError, Result};

/// Linear stretch of the finite values to [0, 1]; non-finite pixels become 0.
pub fn normalize(data: &Array2<f64>) -> Array2<f64> {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = hi - lo;
    data.mapv(|v| {
        if !v.is_finite() || !(span > 0.0) {
            0.0
        } else {
            (v - lo) / span
        }
    })
}

/// Save a normalized map as 16-bit grayscale TIFF.
pub fn save_tiff(data: &Array2<f64>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let pixels: Vec<u16> = normalize(data)
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 65535.0) as u16)
        .collect();
    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| FabryError::InvalidConfig("preview buffer does not match its dimensions".into()))?;
    img.save(path)?;
    Ok(())
}

/// Save a normalized map as 8-bit grayscale PNG.
pub fn save_png(data: &Array2<f64>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let norm = normalize(data);
    let mut img = GrayImage::new(w as u32, h as u32);
    for ((row, col), v) in norm.indexed_iter() {
        img.put_pixel(col as u32, row as u32, Luma([(v.clamp(0.0, 1.0) * 255.0) as u8]));
    }
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a map preview, choosing the format from the file extension.
pub fn save_preview<T: MapElement>(map: &Map2<T>, path: &Path) -> Result<()> {
    let data = map.to_f64();
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(&data, path),
        _ => save_tiff(&data, path),
    }
}
