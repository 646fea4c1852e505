use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::modules::renderer::ArtifactKind;
use crate::modules::style_catalog::StyleCatalog;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Regions with fewer labeled pixels than this are dropped.
    pub min_region_area: u32,
    /// L-infinity radius of the close/open pass on each region mask; 0 disables it.
    pub morphology_radius: u8,
    /// Expansion of the landmark box, as a fraction of its larger side.
    pub plausibility_margin: f32,
    /// Resize a segmentation map of the wrong size instead of rejecting it.
    pub resize_segmentation: bool,
}

impl ExtractorConfig {
    pub fn new() -> Self {
        ExtractorConfig {
            min_region_area: 1,
            morphology_radius: 0,
            plausibility_margin: 0.75,
            resize_segmentation: false,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Largest Hamming distance (of 64 bits) still treated as the same image.
    pub hamming_threshold: u32,
}

impl CacheConfig {
    pub fn new() -> Self {
        CacheConfig { hamming_threshold: 8 }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub workers: usize,
    pub artifact_kind: ArtifactKind,
    pub style: StyleCatalog,
    /// Embed the source image beneath the rendered regions.
    pub embed_background: bool,
    pub poll_interval_ms: u64,
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        CoordinatorConfig {
            workers: 2,
            artifact_kind: ArtifactKind::Vector,
            style: StyleCatalog::Default,
            embed_background: true,
            poll_interval_ms: 20,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub extractor: ExtractorConfig,
    pub cache: CacheConfig,
    pub coordinator: CoordinatorConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        PipelineConfig::default()
    }

    /// from_json_file loads a config file; missing fields keep their defaults.
    ///
    /// # Arguments
    /// * `path` - JSON document path
    ///
    /// # Returns
    /// * `Result<PipelineConfig>`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::invalid(format!("cannot read config {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::invalid(format!("malformed config {}: {e}", path.display())))
    }

    /// with_env_overrides applies `FACEMAP_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FACEMAP_WORKERS") {
            self.coordinator.workers = parse_var("FACEMAP_WORKERS", &v)?;
        }
        if let Some(v) = lookup("FACEMAP_HAMMING_THRESHOLD") {
            self.cache.hamming_threshold = parse_var("FACEMAP_HAMMING_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FACEMAP_MIN_REGION_AREA") {
            self.extractor.min_region_area = parse_var("FACEMAP_MIN_REGION_AREA", &v)?;
        }
        if let Some(v) = lookup("FACEMAP_ARTIFACT_KIND") {
            self.coordinator.artifact_kind = ArtifactKind::from_str(&v)?;
        }
        if let Some(v) = lookup("FACEMAP_STYLE") {
            self.coordinator.style = StyleCatalog::from_str(&v)?;
        }
        Ok(self)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| PipelineError::invalid(format!("{key} has unparsable value {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"cache":{"hamming_threshold":4},"coordinator":{"style":"minimal"}}"#)
                .unwrap();
        assert_eq!(cfg.cache.hamming_threshold, 4);
        assert_eq!(cfg.coordinator.style, StyleCatalog::Minimal);
        assert_eq!(cfg.coordinator.workers, 2);
        assert_eq!(cfg.extractor, ExtractorConfig::new());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("FACEMAP_WORKERS", "4"),
            ("FACEMAP_ARTIFACT_KIND", "json"),
            ("FACEMAP_STYLE", "Colorful"),
        ]);
        let cfg = PipelineConfig::new()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.coordinator.workers, 4);
        assert_eq!(cfg.coordinator.artifact_kind, ArtifactKind::Structured);
        assert_eq!(cfg.coordinator.style, StyleCatalog::Colorful);
    }

    #[test]
    fn test_bad_env_value_is_invalid_input() {
        let err = PipelineConfig::new()
            .with_overrides(|k| (k == "FACEMAP_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }
}
