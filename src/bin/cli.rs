//! facemap CLI: outline the facial regions of one image.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use rs_facemap_pipeline::modules::cache_key::CacheKey;
use rs_facemap_pipeline::modules::perceptual_cache::CacheEntry;
use rs_facemap_pipeline::store::json_store::JsonDirStore;
use rs_facemap_pipeline::utils::image::load_segmentation_file;
use rs_facemap_pipeline::{
    ArtifactKind, FaceInput, JobCoordinator, JobState, JobStatus, LandmarkPoint, PerceptualCache,
    PipelineConfig, StyleCatalog,
};

#[derive(Parser, Debug)]
#[command(name = "facemap")]
#[command(about = "Trace facial region contours and render them as SVG, PNG or JSON")]
#[command(version)]
struct Cli {
    /// Source face image.
    #[arg(long)]
    image: PathBuf,

    /// Segmentation map: grayscale label image, colour-coded image (with --palette) or .npy array.
    #[arg(long)]
    segmentation: PathBuf,

    /// JSON array of {"x": .., "y": ..} landmarks.
    #[arg(long)]
    landmarks: PathBuf,

    /// Output kind: vector|svg, raster|png, structured|json.
    #[arg(long)]
    kind: Option<ArtifactKind>,

    /// Style catalog: default, colorful or minimal.
    #[arg(long)]
    style: Option<StyleCatalog>,

    /// Pipeline config file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory that persists the perceptual cache between runs.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Where to write the artifact. Defaults to facemap.<ext> in the working directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Treat the segmentation image as colour-coded.
    #[arg(long)]
    palette: bool,

    /// Do not draw the source image beneath the regions.
    #[arg(long)]
    no_background: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::new(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(kind) = cli.kind {
        config.coordinator.artifact_kind = kind;
    }
    if let Some(style) = cli.style {
        config.coordinator.style = style;
    }
    if cli.no_background {
        config.coordinator.embed_background = false;
    }

    let image = image::open(&cli.image)
        .with_context(|| format!("reading image {}", cli.image.display()))?
        .to_rgb8();
    let segmentation = load_segmentation_file(&cli.segmentation, cli.palette)
        .with_context(|| format!("reading segmentation map {}", cli.segmentation.display()))?;
    let raw_landmarks = std::fs::read_to_string(&cli.landmarks)
        .with_context(|| format!("reading landmarks {}", cli.landmarks.display()))?;
    let landmarks: Vec<LandmarkPoint> =
        serde_json::from_str(&raw_landmarks).context("landmarks must be a JSON array of {x, y}")?;

    let mut builder = JobCoordinator::builder(config.clone());
    if let Some(dir) = &cli.cache_dir {
        let store: JsonDirStore<CacheKey, CacheEntry> =
            JsonDirStore::open(dir).with_context(|| format!("opening cache dir {}", dir.display()))?;
        builder = builder.cache(PerceptualCache::new(Arc::new(store), &config.cache));
    }
    let coordinator = builder.build();
    coordinator.start();

    let job_id = match coordinator.submit(FaceInput::new(image, segmentation, landmarks)) {
        Ok(id) => id,
        Err(rejected) => {
            print_status(coordinator.get_status(rejected.job_id)?)?;
            return Err(rejected.into());
        }
    };
    info!(job_id = %job_id, "submitted");

    let mut status = coordinator
        .wait_for_terminal(job_id, coordinator.poll_interval())
        .await?;

    if status.state == JobState::Failed {
        print_status(status.clone())?;
        let message = status.error.map(|e| e.message).unwrap_or_default();
        bail!("job {job_id} failed: {message}");
    }

    let artifact = status.artifact.take().context("completed job carries no artifact")?;
    let output = cli
        .output
        .unwrap_or_else(|| PathBuf::from(format!("facemap.{}", artifact.kind.file_extension())));
    std::fs::write(&output, &artifact.payload).with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), kind = %artifact.kind, bytes = artifact.payload.len(), "artifact written");

    print_status(status)
}

fn print_status(mut status: JobStatus) -> anyhow::Result<()> {
    status.artifact = None;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
