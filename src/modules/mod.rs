pub mod cache_key;
pub mod fingerprint;
pub mod perceptual_cache;
pub mod raster_renderer;
pub mod renderer;
pub mod structured_renderer;
pub mod style_catalog;
pub mod svg_renderer;
