pub mod config;
pub mod error;
pub mod helper;
pub mod modules;
pub mod pipeline;
pub mod store;
pub mod utils;

pub use config::config::PipelineConfig;
pub use error::{ErrorKind, PipelineError, Result};
pub use helper::contour_helper::ContourExtractor;
pub use helper::segmentation::{MaskContours, RegionContour, SegmentationMap};
pub use modules::cache_key::{CacheKey, RenderKey};
pub use modules::fingerprint::Fingerprint;
pub use modules::perceptual_cache::{CacheLookup, PerceptualCache, StoreOutcome};
pub use modules::renderer::{Artifact, ArtifactKind, OutputRenderer};
pub use modules::style_catalog::StyleCatalog;
pub use pipeline::events::{ChannelSink, EventKind, EventSink, PipelineEvent, TracingSink};
pub use pipeline::job::{JobId, JobState, JobStatus};
pub use pipeline::pipeline::{FaceInput, JobCoordinator, SubmitError};
pub use utils::coordinate::{ContourPoint, ImageShape, LandmarkPoint};
