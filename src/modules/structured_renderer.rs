use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::helper::segmentation::{MaskContours, RegionContour};
use crate::modules::renderer::{Artifact, ArtifactKind, RenderInput, Renderer};
use crate::utils::coordinate::{ContourPoint, ImageShape};
use crate::utils::utils::BoundingBox;

/// Anatomical name of a region id; unknown ids are named `region_<id>`.
pub fn region_name(region_id: u32) -> Cow<'static, str> {
    match region_id {
        1 => Cow::Borrowed("forehead"),
        2 => Cow::Borrowed("left_eye"),
        3 => Cow::Borrowed("right_eye"),
        4 => Cow::Borrowed("nose"),
        5 => Cow::Borrowed("left_cheek"),
        6 => Cow::Borrowed("right_cheek"),
        7 => Cow::Borrowed("mouth"),
        other => Cow::Owned(format!("region_{other}")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    pub metadata: Metadata,
    pub regions: Vec<RegionRecord>,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub image_width: u32,
    pub image_height: u32,
    pub total_regions: usize,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub id: u32,
    pub name: String,
    pub contour_points: Vec<[i32; 2]>,
    pub centroid: Option<Centroid>,
    pub area: f64,
    pub point_count: usize,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_contour_points: usize,
    pub total_region_area: f64,
    pub image_area: u64,
    pub coverage_percentage: f64,
    pub average_points_per_region: f64,
}

/// Unstyled JSON coordinates for programmatic consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructuredRenderer;

impl StructuredRenderer {
    pub fn document(shape: ImageShape, contours: &MaskContours) -> StructuredDocument {
        let regions: Vec<RegionRecord> = contours
            .iter()
            .map(|(id, contour)| RegionRecord {
                id,
                name: region_name(id).into_owned(),
                contour_points: contour.points().iter().map(|p| [p.x, p.y]).collect(),
                centroid: contour
                    .centroid()
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .map(|(x, y)| Centroid { x, y }),
                area: contour.area(),
                point_count: contour.len(),
                bounding_box: contour.bounding_box(),
            })
            .collect();

        let total_points = contours.total_points();
        let total_area: f64 = regions.iter().map(|r| r.area).sum();
        let image_area = shape.area();
        let statistics = Statistics {
            total_contour_points: total_points,
            total_region_area: total_area,
            image_area,
            coverage_percentage: if image_area > 0 {
                total_area / image_area as f64 * 100.0
            } else {
                0.0
            },
            average_points_per_region: if regions.is_empty() {
                0.0
            } else {
                total_points as f64 / regions.len() as f64
            },
        };

        StructuredDocument {
            metadata: Metadata {
                image_width: shape.width,
                image_height: shape.height,
                total_regions: regions.len(),
                format: "json".to_string(),
            },
            regions,
            statistics,
        }
    }

    /// parse reads a structured artifact back into the shape and contours it was rendered from.
    ///
    /// # Arguments
    /// * `artifact` - output of this renderer
    ///
    /// # Returns
    /// * `Result<(ImageShape, MaskContours)>`
    pub fn parse(artifact: &Artifact) -> Result<(ImageShape, MaskContours)> {
        if artifact.kind != ArtifactKind::Structured {
            return Err(PipelineError::invalid(format!(
                "expected a structured artifact, got {}",
                artifact.kind
            )));
        }
        let doc: StructuredDocument = serde_json::from_slice(&artifact.payload)
            .map_err(|e| PipelineError::invalid(format!("malformed structured artifact: {e}")))?;

        let mut contours = MaskContours::new();
        for region in doc.regions {
            let points = region
                .contour_points
                .iter()
                .map(|[x, y]| ContourPoint::new(*x, *y))
                .collect();
            let contour = RegionContour::new(points).ok_or_else(|| {
                PipelineError::invalid(format!("region {} has fewer than 3 points", region.id))
            })?;
            if contours.insert(region.id, contour).is_some() {
                return Err(PipelineError::invalid(format!("region {} listed twice", region.id)));
            }
        }
        let shape = ImageShape::new(doc.metadata.image_height, doc.metadata.image_width);
        Ok((shape, contours))
    }
}

impl Renderer for StructuredRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Structured
    }

    fn render(&self, input: &RenderInput<'_>) -> Result<Artifact> {
        let doc = Self::document(input.shape, input.contours);
        let payload = serde_json::to_vec_pretty(&doc)
            .map_err(|e| PipelineError::processing(format!("failed to encode structured output: {e}")))?;
        Ok(Artifact::new(ArtifactKind::Structured, payload))
    }
}
