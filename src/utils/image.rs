use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use ndarray::Array2;
use ndarray_npy::ReadNpyExt;

use crate::error::{PipelineError, Result};
use crate::helper::segmentation::SegmentationMap;
use crate::utils::coordinate::ImageShape;

/// decode_base64 decodes a base-64 string, accepting an optional `data:...;base64,` prefix.
///
/// # Arguments
/// * `data` - encoded text
///
/// # Returns
/// * `Result<Vec<u8>>`
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = match data.find(";base64,") {
        Some(at) if data.starts_with("data:") => &data[at + ";base64,".len()..],
        _ => data,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PipelineError::invalid(format!("invalid base64: {e}")))
}

/// decode_image turns encoded image bytes (PNG, JPEG, BMP...) into an RGB buffer.
///
/// # Arguments
/// * `bytes` - encoded image
///
/// # Returns
/// * `Result<RgbImage>`
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| PipelineError::invalid(format!("cannot decode image: {e}")))
}

pub fn decode_image_base64(data: &str) -> Result<RgbImage> {
    decode_image(&decode_base64(data)?)
}

/// Grayscale label map: each pixel value is the region id.
pub fn label_map_from_image(image: &DynamicImage) -> SegmentationMap {
    let gray = image.to_luma8();
    SegmentationMap::from_fn(
        ImageShape::new(gray.height(), gray.width()),
        |x, y| gray.get_pixel(x, y)[0] as u32,
    )
}

/// palette_map_from_image assigns ids 1.. to the distinct non-black colours of a
/// colour-coded mask, in ascending (r, g, b) order. Black stays background.
///
/// # Arguments
/// * `image` - colour-coded segmentation image
///
/// # Returns
/// * `SegmentationMap`
pub fn palette_map_from_image(image: &RgbImage) -> SegmentationMap {
    let mut palette: BTreeMap<[u8; 3], u32> = image
        .pixels()
        .map(|p| p.0)
        .filter(|c| *c != [0, 0, 0])
        .map(|c| (c, 0))
        .collect();
    for (id, slot) in palette.values_mut().enumerate() {
        *slot = id as u32 + 1;
    }
    SegmentationMap::from_fn(
        ImageShape::new(image.height(), image.width()),
        |x, y| palette.get(&image.get_pixel(x, y).0).copied().unwrap_or(0),
    )
}

/// decode_npy_map reads a 2-D `.npy` label array of u8, u32 or i64 elements.
pub fn decode_npy_map(bytes: &[u8]) -> Result<SegmentationMap> {
    if let Ok(arr) = Array2::<u8>::read_npy(Cursor::new(bytes)) {
        return Ok(SegmentationMap::new(arr.mapv(u32::from)));
    }
    if let Ok(arr) = Array2::<u32>::read_npy(Cursor::new(bytes)) {
        return Ok(SegmentationMap::new(arr));
    }
    let arr = Array2::<i64>::read_npy(Cursor::new(bytes))
        .map_err(|e| PipelineError::invalid(format!("unsupported .npy segmentation map: {e}")))?;
    if arr.iter().any(|&v| v < 0 || v > u32::MAX as i64) {
        return Err(PipelineError::invalid("segmentation labels must fit in u32"));
    }
    Ok(SegmentationMap::new(arr.mapv(|v| v as u32)))
}

/// load_segmentation_file reads a segmentation map from `.npy` or an image file.
///
/// # Arguments
/// * `path` - map location
/// * `palette` - treat an image file as colour-coded instead of grayscale ids
///
/// # Returns
/// * `Result<SegmentationMap>`
pub fn load_segmentation_file(path: impl AsRef<Path>, palette: bool) -> Result<SegmentationMap> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| PipelineError::invalid(format!("cannot read {}: {e}", path.display())))?;
    if path.extension().and_then(|e| e.to_str()) == Some("npy") {
        return decode_npy_map(&bytes);
    }
    decode_segmentation_image(&bytes, palette)
}

/// decode_segmentation_base64 decodes a base-64 segmentation image.
pub fn decode_segmentation_base64(data: &str, palette: bool) -> Result<SegmentationMap> {
    decode_segmentation_image(&decode_base64(data)?, palette)
}

fn decode_segmentation_image(bytes: &[u8], palette: bool) -> Result<SegmentationMap> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| PipelineError::invalid(format!("cannot decode segmentation map: {e}")))?;
    if palette {
        Ok(palette_map_from_image(&img.to_rgb8()))
    } else {
        Ok(label_map_from_image(&img))
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let png = encode_png(&DynamicImage::ImageRgb8(image.clone()))?;
    Ok(STANDARD.encode(png))
}
