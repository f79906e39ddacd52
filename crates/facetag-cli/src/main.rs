mod config;
mod sink;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use config::Config;
use facetag_core::enroll::normalize_name;
use facetag_core::matcher::quality_score;
use facetag_core::types::{MAX_TOLERANCE, MIN_TOLERANCE};
use facetag_core::{
    enroll, recognize, Detection, DuplicatePolicy, EncodingStore, EnrollOptions, FrameSource, LabelFont, NearestNeighbor,
    OnnxFaceEncoder, Session, SessionOptions, SessionSummary, StopToken,
};
use facetag_hw::{Camera, ImageSequence, VideoFile};
use serde::Serialize;
use sink::WatchSink;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facetag", version, about = "Enroll faces and recognize them in photos, video and camera frames")]
struct Cli {
    /// Config file (default: $FACETAG_CONFIG or <data dir>/facetag.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Encoding store and enrollment photo directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in a photo under a name
    Enroll {
        /// Person's name
        #[arg(short, long)]
        name: String,
        /// Photo containing exactly one face
        image: PathBuf,
        /// What to do if the name is already enrolled: append, replace or reject
        #[arg(long)]
        policy: Option<DuplicatePolicy>,
        /// Reject tiny, dark or washed-out photos before detection
        #[arg(long)]
        strict: bool,
    },
    /// List enrolled names
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove every embedding and the photo for a name
    Remove {
        name: String,
    },
    /// Recognize the faces in one image
    Identify {
        image: PathBuf,
        /// Maximum embedding distance for a match (0.1-1.0)
        #[arg(long, value_parser = parse_tolerance)]
        tolerance: Option<f32>,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Continuously recognize faces from a camera, video file or image frames
    #[command(group(ArgGroup::new("source").required(true).args(["camera", "video", "frames"])))]
    Watch {
        /// V4L2 camera (default: camera_device from config)
        #[arg(long, value_name = "DEVICE")]
        camera: Option<Option<String>>,
        /// Video file (needs the `video` build feature)
        #[arg(long, value_name = "FILE")]
        video: Option<PathBuf>,
        /// Image file or directory of images, read in name order
        #[arg(long, value_name = "PATH")]
        frames: Option<PathBuf>,
        #[arg(long, value_parser = parse_tolerance)]
        tolerance: Option<f32>,
        /// Do not mirror camera frames
        #[arg(long)]
        no_mirror: bool,
        /// Pause after each frame
        #[arg(long)]
        throttle_ms: Option<u64>,
        /// Warn when a frame takes longer than this
        #[arg(long)]
        budget_ms: Option<u64>,
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Save every annotated frame into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

fn parse_tolerance(raw: &str) -> Result<f32, String> {
    let value: f32 = raw.trim().parse().map_err(|_| format!("{raw:?} is not a number"))?;
    if (MIN_TOLERANCE..=MAX_TOLERANCE).contains(&value) {
        Ok(value)
    } else {
        Err(format!("tolerance must be between {MIN_TOLERANCE} and {MAX_TOLERANCE}"))
    }
}

enum SourceSpec {
    Camera(String),
    Video(PathBuf),
    Frames(PathBuf),
}

impl SourceSpec {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(match self {
            SourceSpec::Camera(device) => Box::new(Camera::open(device).with_context(|| format!("camera {device}"))?),
            SourceSpec::Video(path) => Box::new(VideoFile::open(path)?),
            SourceSpec::Frames(path) => Box::new(ImageSequence::open(path)?),
        })
    }
}

#[derive(Serialize)]
struct ListedName<'a> {
    name: &'a str,
    encodings: usize,
    photo: Option<PathBuf>,
}

#[derive(Serialize)]
struct IdentifiedFace<'a> {
    name: &'a str,
    known: bool,
    distance: Option<f32>,
    quality: f32,
    #[serde(flatten)]
    bbox: &'a facetag_core::BoundingBox,
}

fn identified_faces(detections: &[Detection]) -> Vec<IdentifiedFace<'_>> {
    detections
        .iter()
        .map(|d| IdentifiedFace {
            name: d.label(),
            known: d.is_known(),
            distance: d.distance,
            quality: quality_score(d.distance),
            bbox: &d.bbox,
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Enroll {
            name,
            image,
            policy,
            strict,
        } => cmd_enroll(&config, &name, &image, policy, strict),
        Commands::List { json } => cmd_list(&config, json),
        Commands::Remove { name } => cmd_remove(&config, &name),
        Commands::Identify {
            image,
            tolerance,
            output,
            json,
        } => cmd_identify(&config, &image, tolerance, output.as_deref(), json),
        Commands::Watch {
            camera,
            video,
            frames,
            tolerance,
            no_mirror,
            throttle_ms,
            budget_ms,
            max_frames,
            output_dir,
        } => {
            let source = match (camera, video, frames) {
                (Some(device), _, _) => SourceSpec::Camera(device.unwrap_or_else(|| config.camera_device.clone())),
                (None, Some(path), _) => SourceSpec::Video(path),
                (None, None, Some(path)) => SourceSpec::Frames(path),
                (None, None, None) => bail!("choose a source: --camera, --video or --frames"),
            };
            let options = SessionOptions {
                tolerance: tolerance.unwrap_or(config.tolerance),
                throttle: resolve_throttle(&source, throttle_ms, &config),
                frame_budget: budget_ms.map(Duration::from_millis).or(config.frame_budget()),
                max_frames,
                mirror: no_mirror.then_some(false),
                equalize: config.equalize,
            };
            cmd_watch(config, source, options, output_dir).await
        }
        Commands::Devices => cmd_devices(),
    }
}

/// An explicit `--throttle-ms` applies to any source; the configured default
/// only paces cameras. Recorded sources run as fast as they decode.
fn resolve_throttle(source: &SourceSpec, flag_ms: Option<u64>, config: &Config) -> Option<Duration> {
    match (flag_ms, source) {
        (Some(0), _) => None,
        (Some(ms), _) => Some(Duration::from_millis(ms)),
        (None, SourceSpec::Camera(_)) => config.throttle(),
        (None, SourceSpec::Video(_) | SourceSpec::Frames(_)) => None,
    }
}

fn open_store(config: &Config) -> Result<EncodingStore> {
    EncodingStore::open(&config.data_dir).with_context(|| format!("cannot open data dir {}", config.data_dir.display()))
}

fn load_encoder(config: &Config) -> Result<OnnxFaceEncoder> {
    OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("failed to load face models from {}", config.model_dir.display()))
}

fn load_image(path: &Path) -> Result<image::RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("cannot read image {}", path.display()))?
        .to_rgb8())
}

/// Configured font if it loads, otherwise the first system font found.
fn load_font(config: &Config) -> Option<LabelFont> {
    if let Some(path) = &config.font {
        match LabelFont::load(path) {
            Ok(font) => return Some(font),
            Err(e) => tracing::warn!(error = %e, "configured font unusable; probing system fonts"),
        }
    }
    LabelFont::discover()
}

fn cmd_enroll(config: &Config, name: &str, image: &Path, policy: Option<DuplicatePolicy>, strict: bool) -> Result<()> {
    let store = open_store(config)?;
    let photo = load_image(image)?;
    let mut encoder = load_encoder(config)?;

    let options = EnrollOptions {
        policy: policy.unwrap_or(config.duplicate_policy),
        validate: strict || config.strict_validation,
    };
    let enrolled = enroll(&store, &mut encoder, &photo, name, &options)?;
    println!("{}", enrolled.message());
    Ok(())
}

fn cmd_list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let known = store.load()?;

    let listed: Vec<ListedName> = known
        .distinct_names()
        .into_iter()
        .map(|name| {
            let photo = store.photo_path(name);
            ListedName {
                name,
                encodings: known.count(name),
                photo: photo.exists().then_some(photo),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    println!("Total registered faces: {}", known.len());
    for entry in &listed {
        let photo = if entry.photo.is_some() { "" } else { " (no photo)" };
        println!("  {} [{} encoding(s)]{photo}", entry.name, entry.encodings);
    }
    Ok(())
}

fn cmd_remove(config: &Config, name: &str) -> Result<()> {
    let name = normalize_name(name)?;
    let name = name.as_str();
    let store = open_store(config)?;
    let mut known = store.load()?;

    let removed = known.remove(name);
    if removed > 0 {
        store.save(&known)?;
    }
    let photo_removed = store.remove_photo(name)?;

    if removed == 0 && !photo_removed {
        bail!("{name} is not enrolled");
    }
    println!("Removed {name} ({removed} encoding(s))");
    Ok(())
}

fn cmd_identify(config: &Config, image: &Path, tolerance: Option<f32>, output: Option<&Path>, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let known = store.load()?;
    if known.is_empty() {
        tracing::warn!("no faces enrolled; every face will be reported as unknown");
    }

    let mut frame = load_image(image)?;
    let mut encoder = load_encoder(config)?;
    let tolerance = tolerance.unwrap_or(config.tolerance);
    let detections = recognize(&mut encoder, &NearestNeighbor, &frame, &known, tolerance);

    if json {
        println!("{}", serde_json::to_string_pretty(&identified_faces(&detections))?);
    } else {
        println!("{}", facetag_core::render::status_line(&detections));
        for d in &detections {
            let rect = d.bbox.to_rect(frame.width(), frame.height());
            let distance = d
                .distance
                .map(|v| format!(" distance {v:.3} quality {:.3}", quality_score(Some(v))))
                .unwrap_or_default();
            println!(
                "  {} at ({}, {}) {}x{}{distance}",
                d.label(),
                rect.left,
                rect.top,
                rect.width(),
                rect.height()
            );
        }
    }

    if let Some(path) = output {
        let font = load_font(config);
        facetag_core::render::draw(&mut frame, &detections, font.as_ref());
        frame
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote annotated image");
    }
    Ok(())
}

async fn cmd_watch(
    config: Config,
    source: SourceSpec,
    options: SessionOptions,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let known = open_store(&config)?.load()?;
    if known.is_empty() {
        bail!("no faces enrolled; run `facetag enroll` first");
    }

    let stop = StopToken::new();
    let worker_stop = stop.clone();

    // ONNX sessions and capture handles stay on the blocking thread.
    let mut task = tokio::task::spawn_blocking(move || -> Result<SessionSummary> {
        let mut encoder = load_encoder(&config)?;
        let mut source = source.open()?;
        let mut sink = WatchSink::new(output_dir)?;
        let font = load_font(&config);

        let summary = Session::new(&mut encoder, &known, options)
            .with_font(font.as_ref())
            .run(&mut source, &mut sink, &worker_stop)?;
        Ok(summary)
    });

    let summary = tokio::select! {
        joined = &mut task => joined.context("recognition task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping after the current frame");
            stop.stop();
            task.await.context("recognition task panicked")??
        }
    };

    println!(
        "Processed {} frame(s): {} face(s), {} frame(s) with a known face, slowest {:.0} ms ({:?})",
        summary.frames,
        summary.faces,
        summary.known_frames,
        summary.slowest.as_secs_f64() * 1000.0,
        summary.stop_reason,
    );
    if summary.over_budget > 0 {
        println!("{} frame(s) exceeded the frame budget", summary.over_budget);
    }
    Ok(())
}

fn cmd_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}
