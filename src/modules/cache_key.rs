use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::config::config::ExtractorConfig;
use crate::error::PipelineError;
use crate::helper::segmentation::SegmentationMap;
use crate::modules::fingerprint::Fingerprint;
use crate::modules::renderer::ArtifactKind;
use crate::modules::style_catalog::StyleCatalog;
use crate::utils::coordinate::LandmarkPoint;

/// Everything besides the image that changes a rendered artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub extractor: ExtractorConfig,
    pub kind: ArtifactKind,
    pub style: StyleCatalog,
    pub embed_background: bool,
}

/// Truncated SHA-256 of a segmentation map, its landmarks and the render settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderKey(pub u128);

impl RenderKey {
    /// new digests the non-image inputs of a job.
    ///
    /// # Arguments
    /// * `segmentation` - label map, hashed with its shape
    /// * `landmarks` - facial landmarks, hashed bit-exact and in order
    /// * `settings` - extractor and renderer settings of the coordinator
    ///
    /// # Returns
    /// * `RenderKey`
    pub fn new(segmentation: &SegmentationMap, landmarks: &[LandmarkPoint], settings: &RenderSettings) -> Self {
        let mut hasher = Sha256::new();

        let shape = segmentation.shape();
        hasher.update(b"map");
        hasher.update(shape.height.to_le_bytes());
        hasher.update(shape.width.to_le_bytes());
        for label in segmentation.labels().iter() {
            hasher.update(label.to_le_bytes());
        }

        hasher.update(b"landmarks");
        hasher.update((landmarks.len() as u64).to_le_bytes());
        for point in landmarks {
            hasher.update(point.x.to_bits().to_le_bytes());
            hasher.update(point.y.to_bits().to_le_bytes());
        }

        let ExtractorConfig { min_region_area, morphology_radius, plausibility_margin, resize_segmentation } =
            &settings.extractor;
        hasher.update(b"extractor");
        hasher.update(min_region_area.to_le_bytes());
        hasher.update([*morphology_radius, u8::from(*resize_segmentation)]);
        hasher.update(plausibility_margin.to_bits().to_le_bytes());

        hasher.update(b"render");
        hasher.update(settings.kind.name().as_bytes());
        hasher.update([0]);
        hasher.update(settings.style.name().as_bytes());
        hasher.update([u8::from(settings.embed_background)]);

        let digest = hasher.finalize();
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        RenderKey(u128::from_be_bytes(head))
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for RenderKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(PipelineError::invalid(format!("render key {s:?} is not 32 hex digits")));
        }
        u128::from_str_radix(s, 16)
            .map(RenderKey)
            .map_err(|e| PipelineError::invalid(format!("render key {s:?}: {e}")))
    }
}

impl Serialize for RenderKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RenderKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Cache store key. Entries are only comparable within one render key; the
/// fingerprint is then matched by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub render: RenderKey,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(render: RenderKey, fingerprint: Fingerprint) -> Self {
        CacheKey { render, fingerprint }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.render, self.fingerprint)
    }
}

impl FromStr for CacheKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (render, fingerprint) = s
            .split_once('-')
            .ok_or_else(|| PipelineError::invalid(format!("cache key {s:?} has no separator")))?;
        Ok(CacheKey { render: render.parse()?, fingerprint: fingerprint.parse()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::coordinate::ImageShape;

    fn settings() -> RenderSettings {
        RenderSettings {
            extractor: ExtractorConfig::new(),
            kind: ArtifactKind::Structured,
            style: StyleCatalog::Default,
            embed_background: true,
        }
    }

    fn map(id: u32) -> SegmentationMap {
        SegmentationMap::from_fn(ImageShape::new(16, 16), |x, y| match (x, y) {
            (4..=11, 4..=11) => id,
            _ => 0,
        })
    }

    fn landmarks() -> Vec<LandmarkPoint> {
        vec![LandmarkPoint::new(4.0, 4.0), LandmarkPoint::new(12.0, 12.0)]
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = RenderKey::new(&map(1), &landmarks(), &settings());
        let b = RenderKey::new(&map(1), &landmarks(), &settings());
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_input_changes_the_key() {
        let base = RenderKey::new(&map(1), &landmarks(), &settings());
        assert_ne!(base, RenderKey::new(&map(5), &landmarks(), &settings()));

        let mut moved = landmarks();
        moved[0].x += 0.5;
        assert_ne!(base, RenderKey::new(&map(1), &moved, &settings()));

        let mut vector = settings();
        vector.kind = ArtifactKind::Vector;
        assert_ne!(base, RenderKey::new(&map(1), &landmarks(), &vector));

        let mut minimal = settings();
        minimal.style = StyleCatalog::Minimal;
        assert_ne!(base, RenderKey::new(&map(1), &landmarks(), &minimal));

        let mut bare = settings();
        bare.embed_background = false;
        assert_ne!(base, RenderKey::new(&map(1), &landmarks(), &bare));

        let mut cleaned = settings();
        cleaned.extractor.morphology_radius = 2;
        assert_ne!(base, RenderKey::new(&map(1), &landmarks(), &cleaned));
    }

    #[test]
    fn test_cache_key_text_form() {
        let key = CacheKey::new(RenderKey(0xabc), Fingerprint(0x1f));
        let text = key.to_string();
        assert_eq!(text, "00000000000000000000000000000abc-000000000000001f");
        assert_eq!(text.parse::<CacheKey>().unwrap(), key);
        assert!("nodash".parse::<CacheKey>().is_err());
    }
}
