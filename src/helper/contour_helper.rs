use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};
use nalgebra::{distance, Point2, Vector2};
use tracing::debug;

use crate::config::config::ExtractorConfig;
use crate::error::{PipelineError, Result};
use crate::helper::segmentation::{MaskContours, RegionContour, SegmentationMap};
use crate::utils::coordinate::{ContourPoint, ImageShape, LandmarkPoint};

/// Turns a segmentation map plus landmarks into one outer contour per region id.
///
/// Extraction is pure: identical inputs always give identical output.
#[derive(Debug, Clone)]
pub struct ContourExtractor {
    config: ExtractorConfig,
}

/// Pixel statistics of one connected component.
#[derive(Debug, Clone, Copy, Default)]
struct Component {
    count: u64,
    sum_x: f64,
    sum_y: f64,
}

impl Component {
    fn centroid(&self) -> Point2<f64> {
        Point2::new(self.sum_x / self.count as f64, self.sum_y / self.count as f64)
    }
}

/// Landmark bounding box, used to reject implausible regions.
#[derive(Debug, Clone, Copy)]
struct LandmarkBox {
    min: Point2<f64>,
    max: Point2<f64>,
}

impl LandmarkBox {
    fn of(landmarks: &[LandmarkPoint]) -> Option<Self> {
        let first = landmarks.first()?.to_point();
        let (min, max) = landmarks.iter().fold((first, first), |(lo, hi), l| {
            let p = l.to_point();
            (
                Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        });
        Some(LandmarkBox { min, max })
    }

    fn extent(&self) -> f64 {
        (self.max.x - self.min.x).max(self.max.y - self.min.y)
    }

    fn contains_expanded(&self, margin: f64, x: f64, y: f64) -> bool {
        let pad = margin * self.extent();
        x >= self.min.x - pad && x <= self.max.x + pad && y >= self.min.y - pad && y <= self.max.y + pad
    }
}

impl ContourExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        ContourExtractor { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// validate runs the checks that need no contour tracing.
    ///
    /// # Arguments
    /// * `segmentation` - per-pixel labels
    /// * `landmarks` - facial landmarks in image coordinates
    /// * `shape` - source image shape
    ///
    /// # Returns
    /// * `Result<()>`
    pub fn validate(
        &self,
        segmentation: &SegmentationMap,
        landmarks: &[LandmarkPoint],
        shape: ImageShape,
    ) -> Result<()> {
        if landmarks.is_empty() {
            return Err(PipelineError::NoFaceDetected("no landmarks supplied".to_string()));
        }
        if shape.area() == 0 {
            return Err(PipelineError::invalid(format!("image {shape} has no pixels")));
        }
        if segmentation.shape() != shape && !self.config.resize_segmentation {
            return Err(PipelineError::invalid(format!(
                "segmentation map is {} but image is {shape}",
                segmentation.shape()
            )));
        }
        if let Some((idx, point)) = landmarks
            .iter()
            .enumerate()
            .find(|(_, p)| !shape.contains_landmark(p))
        {
            return Err(PipelineError::invalid(format!(
                "landmark {idx} at ({}, {}) lies outside image {shape}",
                point.x, point.y
            )));
        }
        if segmentation.labeled_pixels() == 0 {
            return Err(PipelineError::invalid("segmentation map has no labeled pixels"));
        }
        Ok(())
    }

    /// extract traces the outer boundary of every region id, in ascending id order.
    ///
    /// # Arguments
    /// * `segmentation` - per-pixel labels, 0 = background
    /// * `landmarks` - facial landmarks in image coordinates
    /// * `shape` - source image shape
    ///
    /// # Returns
    /// * `Result<MaskContours>`
    pub fn extract(
        &self,
        segmentation: &SegmentationMap,
        landmarks: &[LandmarkPoint],
        shape: ImageShape,
    ) -> Result<MaskContours> {
        self.validate(segmentation, landmarks, shape)?;

        let resized;
        let segmentation = if segmentation.shape() != shape {
            debug!(from = %segmentation.shape(), to = %shape, "resizing segmentation map");
            resized = segmentation.resize_nearest(shape);
            &resized
        } else {
            segmentation
        };

        let anchor = landmark_centroid(landmarks);
        let bbox = LandmarkBox::of(landmarks).filter(|b| b.extent() >= 1.0);
        let margin = self.config.plausibility_margin as f64;

        let mut contours = MaskContours::new();
        for region_id in segmentation.region_ids() {
            let Some((contour, area)) = self.trace_region(segmentation, region_id, anchor) else {
                debug!(region_id, "region yields fewer than 3 boundary points, dropped");
                continue;
            };
            if area < self.config.min_region_area as u64 {
                debug!(region_id, area, "region below minimum area, dropped");
                continue;
            }
            if let (Some(bbox), Some((cx, cy))) = (bbox, contour.centroid()) {
                if !bbox.contains_expanded(margin, cx, cy) {
                    debug!(region_id, cx, cy, "region centroid far from landmarks, dropped");
                    continue;
                }
            }
            contours.insert(region_id, contour);
        }

        if contours.is_empty() {
            return Err(PipelineError::invalid("segmentation map yields no valid regions"));
        }
        Ok(contours)
    }

    /// Contour of the chosen component of one region and that component's pixel count.
    fn trace_region(
        &self,
        segmentation: &SegmentationMap,
        region_id: u32,
        anchor: Point2<f64>,
    ) -> Option<(RegionContour, u64)> {
        let mut mask = segmentation.region_mask(region_id);
        if self.config.morphology_radius > 0 {
            let r = self.config.morphology_radius;
            mask = open(&close(&mask, Norm::LInf, r), Norm::LInf, r);
        }

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let mut components: BTreeMap<u32, Component> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            if label[0] == 0 {
                continue;
            }
            let c = components.entry(label[0]).or_default();
            c.count += 1;
            c.sum_x += x as f64;
            c.sum_y += y as f64;
        }

        let (label, component) = pick_component(&components, anchor)?;
        let single = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            if labels.get_pixel(x, y)[0] == label {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });

        let outer = find_contours::<i32>(&single)
            .into_iter()
            .find(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())?;
        let points = outer.points.iter().map(|p| ContourPoint::new(p.x, p.y)).collect();
        let contour = RegionContour::new(simplify_chain(points))?;
        Some((contour, component.count))
    }
}

fn landmark_centroid(landmarks: &[LandmarkPoint]) -> Point2<f64> {
    let sum: Vector2<f64> = landmarks.iter().map(|l| l.to_point().coords).sum();
    Point2::from(sum / landmarks.len().max(1) as f64)
}

/// Largest component wins; equal sizes go to the one nearest the landmarks, then the lowest label.
fn pick_component(components: &BTreeMap<u32, Component>, anchor: Point2<f64>) -> Option<(u32, Component)> {
    let mut best: Option<(u32, Component, f64)> = None;
    for (&label, &component) in components {
        let d = distance(&component.centroid(), &anchor);
        let better = match &best {
            None => true,
            Some((_, b, bd)) => component.count > b.count || (component.count == b.count && d < *bd),
        };
        if better {
            best = Some((label, component, d));
        }
    }
    best.map(|(label, component, _)| (label, component))
}

/// simplify_chain drops repeated vertices and the interior points of straight runs,
/// keeping only the corners of a traced boundary.
///
/// # Arguments
/// * `points` - closed boundary, last point implicitly joined to the first
///
/// # Returns
/// * `Vec<ContourPoint>`
pub fn simplify_chain(mut points: Vec<ContourPoint>) -> Vec<ContourPoint> {
    points.dedup();
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    let n = points.len();
    if n < 3 {
        return points;
    }

    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let cur = points[i];
            let next = points[(i + 1) % n];
            let (ax, ay) = ((cur.x - prev.x) as i64, (cur.y - prev.y) as i64);
            let (bx, by) = ((next.x - cur.x) as i64, (next.y - cur.y) as i64);
            let cross = ax * by - ay * bx;
            let dot = ax * bx + ay * by;
            !(cross == 0 && dot > 0)
        })
        .map(|i| points[i])
        .collect()
}
