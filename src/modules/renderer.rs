use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, Result};
use crate::helper::segmentation::MaskContours;
use crate::modules::raster_renderer::RasterRenderer;
use crate::modules::structured_renderer::StructuredRenderer;
use crate::modules::style_catalog::StyleCatalog;
use crate::modules::svg_renderer::SvgRenderer;
use crate::utils::coordinate::ImageShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// SVG outline document.
    #[default]
    Vector,
    /// PNG overlay.
    Raster,
    /// JSON coordinates.
    Structured,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Vector => "vector",
            ArtifactKind::Raster => "raster",
            ArtifactKind::Structured => "structured",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ArtifactKind::Vector => "image/svg+xml",
            ArtifactKind::Raster => "image/png",
            ArtifactKind::Structured => "application/json",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ArtifactKind::Vector => "svg",
            ArtifactKind::Raster => "png",
            ArtifactKind::Structured => "json",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "svg" => Ok(ArtifactKind::Vector),
            "raster" | "png" => Ok(ArtifactKind::Raster),
            "structured" | "json" => Ok(ArtifactKind::Structured),
            other => Err(PipelineError::invalid(format!(
                "unsupported artifact kind {other:?}, expected vector, raster or structured"
            ))),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rendered output: its kind plus the encoded bytes.
///
/// Serialises with a base-64 payload so artifacts can live in JSON stores.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    #[serde(serialize_with = "payload_to_base64", deserialize_with = "payload_from_base64")]
    pub payload: Vec<u8>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, payload: Vec<u8>) -> Self {
        Artifact { kind, payload }
    }

    pub fn media_type(&self) -> &'static str {
        self.kind.media_type()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.payload)
    }

    /// Payload as text, for the SVG and JSON kinds.
    pub fn as_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| PipelineError::processing(format!("{} artifact is not UTF-8: {e}", self.kind)))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

fn payload_to_base64<S: Serializer>(payload: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(payload))
}

fn payload_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

/// Everything a renderer needs for one job.
#[derive(Debug, Clone, Copy)]
pub struct RenderInput<'a> {
    pub shape: ImageShape,
    pub contours: &'a MaskContours,
    pub styles: &'a StyleCatalog,
    pub background: Option<&'a RgbImage>,
}

pub trait Renderer {
    fn kind(&self) -> ArtifactKind;

    /// render serialises contours into an artifact. Must not keep state between calls.
    fn render(&self, input: &RenderInput<'_>) -> Result<Artifact>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRenderer {
    Vector(SvgRenderer),
    Raster(RasterRenderer),
    Structured(StructuredRenderer),
}

impl OutputRenderer {
    pub fn for_kind(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Vector => OutputRenderer::Vector(SvgRenderer),
            ArtifactKind::Raster => OutputRenderer::Raster(RasterRenderer),
            ArtifactKind::Structured => OutputRenderer::Structured(StructuredRenderer),
        }
    }

    /// render dispatches to the renderer of this variant.
    ///
    /// # Arguments
    /// * `shape` - source image shape
    /// * `contours` - extracted regions
    /// * `styles` - palette used by the styled variants
    /// * `background` - optional image drawn beneath the regions
    ///
    /// # Returns
    /// * `Result<Artifact>`
    pub fn render(
        &self,
        shape: ImageShape,
        contours: &MaskContours,
        styles: &StyleCatalog,
        background: Option<&RgbImage>,
    ) -> Result<Artifact> {
        if let Some(bg) = background {
            if bg.dimensions() != (shape.width, shape.height) {
                return Err(PipelineError::invalid(format!(
                    "background is {}x{} but image shape is {shape}",
                    bg.width(),
                    bg.height()
                )));
            }
        }
        let input = RenderInput { shape, contours, styles, background };
        match self {
            OutputRenderer::Vector(r) => r.render(&input),
            OutputRenderer::Raster(r) => r.render(&input),
            OutputRenderer::Structured(r) => r.render(&input),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            OutputRenderer::Vector(r) => r.kind(),
            OutputRenderer::Raster(r) => r.kind(),
            OutputRenderer::Structured(r) => r.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::segmentation::RegionContour;
    use crate::utils::coordinate::ContourPoint;

    fn contours() -> MaskContours {
        let square = RegionContour::new(vec![
            ContourPoint::new(2, 2),
            ContourPoint::new(12, 2),
            ContourPoint::new(12, 12),
            ContourPoint::new(2, 12),
        ])
        .unwrap();
        [(3, square)].into_iter().collect()
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!("svg".parse::<ArtifactKind>().unwrap(), ArtifactKind::Vector);
        assert_eq!("PNG".parse::<ArtifactKind>().unwrap(), ArtifactKind::Raster);
        assert_eq!("json".parse::<ArtifactKind>().unwrap(), ArtifactKind::Structured);
        assert!("gif".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn test_every_variant_reports_its_kind() {
        let shape = ImageShape::new(16, 16);
        for kind in [ArtifactKind::Vector, ArtifactKind::Raster, ArtifactKind::Structured] {
            let renderer = OutputRenderer::for_kind(kind);
            assert_eq!(renderer.kind(), kind);
            let artifact = renderer
                .render(shape, &contours(), &StyleCatalog::Default, None)
                .unwrap();
            assert_eq!(artifact.kind, kind);
            assert!(!artifact.payload.is_empty());
        }
    }

    #[test]
    fn test_rendering_is_repeatable() {
        let shape = ImageShape::new(16, 16);
        for kind in [ArtifactKind::Vector, ArtifactKind::Raster, ArtifactKind::Structured] {
            let renderer = OutputRenderer::for_kind(kind);
            let a = renderer.render(shape, &contours(), &StyleCatalog::Colorful, None).unwrap();
            let b = renderer.render(shape, &contours(), &StyleCatalog::Colorful, None).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_background_must_match_shape() {
        let bg = RgbImage::new(8, 8);
        let err = OutputRenderer::for_kind(ArtifactKind::Vector)
            .render(ImageShape::new(16, 16), &contours(), &StyleCatalog::Default, Some(&bg))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_artifact_json_uses_base64_payload() {
        let artifact = Artifact::new(ArtifactKind::Structured, b"{}".to_vec());
        let json = serde_json::to_string(&artifact).unwrap();
        assert_eq!(json, r#"{"kind":"structured","payload":"e30="}"#);
        let back: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }
}
