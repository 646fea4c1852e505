use std::collections::{BTreeMap, BTreeSet};

use image::{GrayImage, Luma};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::utils::coordinate::{ContourPoint, ImageShape};
use crate::utils::utils::{bounding_box, polygon_area, polygon_centroid, BoundingBox};

/// Per-pixel region labels, `labels[[row, col]]`, 0 meaning background.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMap {
    labels: Array2<u32>,
}

impl SegmentationMap {
    pub fn new(labels: Array2<u32>) -> Self {
        SegmentationMap { labels }
    }

    /// from_fn builds a map by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(shape: ImageShape, f: F) -> Self
    where
        F: Fn(u32, u32) -> u32,
    {
        let labels = Array2::from_shape_fn(
            (shape.height as usize, shape.width as usize),
            |(row, col)| f(col as u32, row as u32),
        );
        SegmentationMap { labels }
    }

    pub fn shape(&self) -> ImageShape {
        let (rows, cols) = self.labels.dim();
        ImageShape::new(rows as u32, cols as u32)
    }

    pub fn labels(&self) -> &Array2<u32> {
        &self.labels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        self.labels.get((y as usize, x as usize)).copied()
    }

    /// Distinct non-background ids in ascending order.
    pub fn region_ids(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().filter(|&id| id != 0).collect()
    }

    pub fn labeled_pixels(&self) -> usize {
        self.labels.iter().filter(|&&id| id != 0).count()
    }

    /// region_mask returns a binary mask (255 = member) of one region id.
    ///
    /// # Arguments
    /// * `region_id` - label to select
    ///
    /// # Returns
    /// * `GrayImage`
    pub fn region_mask(&self, region_id: u32) -> GrayImage {
        let shape = self.shape();
        GrayImage::from_fn(shape.width, shape.height, |x, y| {
            if self.labels[[y as usize, x as usize]] == region_id {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    /// resize_nearest rescales the map to `target` with nearest-neighbour sampling,
    /// so no new label values are ever invented.
    pub fn resize_nearest(&self, target: ImageShape) -> Self {
        let src = self.shape();
        if src == target || src.area() == 0 {
            return self.clone();
        }
        let sx = src.width as f64 / target.width as f64;
        let sy = src.height as f64 / target.height as f64;
        let labels = Array2::from_shape_fn(
            (target.height as usize, target.width as usize),
            |(row, col)| {
                let src_row = ((row as f64 * sy).floor() as usize).min(src.height as usize - 1);
                let src_col = ((col as f64 * sx).floor() as usize).min(src.width as usize - 1);
                self.labels[[src_row, src_col]]
            },
        );
        SegmentationMap { labels }
    }
}

/// Closed outer boundary of one region, at least three vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionContour {
    points: Vec<ContourPoint>,
}

impl RegionContour {
    /// new returns `None` for fewer than three points.
    pub fn new(points: Vec<ContourPoint>) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        Some(RegionContour { points })
    }

    pub fn points(&self) -> &[ContourPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.points)
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        polygon_centroid(&self.points)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        bounding_box(&self.points)
    }
}

/// Region id to contour, iterated in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaskContours(BTreeMap<u32, RegionContour>);

impl MaskContours {
    pub fn new() -> Self {
        MaskContours(BTreeMap::new())
    }

    pub fn insert(&mut self, region_id: u32, contour: RegionContour) -> Option<RegionContour> {
        self.0.insert(region_id, contour)
    }

    pub fn get(&self, region_id: u32) -> Option<&RegionContour> {
        self.0.get(&region_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &RegionContour)> {
        self.0.iter().map(|(id, c)| (*id, c))
    }

    pub fn region_ids(&self) -> Vec<u32> {
        self.0.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_points(&self) -> usize {
        self.0.values().map(RegionContour::len).sum()
    }
}

impl FromIterator<(u32, RegionContour)> for MaskContours {
    fn from_iter<T: IntoIterator<Item = (u32, RegionContour)>>(iter: T) -> Self {
        MaskContours(iter.into_iter().collect())
    }
}
