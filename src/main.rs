//! Face landmark and head pose tracker with optional VMC output.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use face_pose_tracker::{
    app::App,
    config::{Config, EXAMPLE_CONFIG},
    filters::FilterKind,
    mark_detection::ModelVariant,
    scheduler::TargetFps,
};
use log::info;
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum VariantArg {
    Fast,
    Balanced,
    AccurateA,
    AccurateB,
}

impl From<VariantArg> for ModelVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Fast => Self::Fast,
            VariantArg::Balanced => Self::Balanced,
            VariantArg::AccurateA => Self::AccurateA,
            VariantArg::AccurateB => Self::AccurateB,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum FilterArg {
    OneEuro,
    LowPass,
    CriticallyDamped,
    None,
}

impl From<FilterArg> for FilterKind {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::OneEuro => Self::OneEuro,
            FilterArg::LowPass => Self::LowPass,
            FilterArg::CriticallyDamped => Self::CriticallyDamped,
            FilterArg::None => Self::None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Camera index to use
    #[arg(short = 'c', long)]
    camera: Option<i32>,

    /// Capture width
    #[arg(short = 'W', long)]
    width: Option<i32>,

    /// Capture height
    #[arg(short = 'H', long)]
    height: Option<i32>,

    /// Target processing rate (15, 30 or 60)
    #[arg(short = 'F', long)]
    fps: Option<u32>,

    /// Flip the camera image horizontally
    #[arg(short = 'M', long)]
    mirror: bool,

    /// Landmark model variant
    #[arg(long, value_enum)]
    model: Option<VariantArg>,

    /// Directory holding the ONNX models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Minimum landmark confidence to keep tracking
    #[arg(short = 't', long)]
    threshold: Option<f32>,

    /// Minimum face detection score
    #[arg(short = 'd', long)]
    detection_threshold: Option<f32>,

    /// Inference threads per model
    #[arg(short = 'm', long)]
    threads: Option<i16>,

    /// Landmark smoothing filter
    #[arg(short = 'f', long, value_enum)]
    filter: Option<FilterArg>,

    /// Send tracking data over the VMC protocol
    #[arg(long)]
    vmc: bool,

    /// VMC receiver address
    #[arg(long)]
    vmc_ip: Option<String>,

    /// VMC receiver port
    #[arg(long)]
    vmc_port: Option<u16>,

    /// Print the example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug output
    #[arg(short = 'D', long)]
    debug: bool,
}

impl Args {
    /// Command line values win over the file
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(camera) = self.camera {
            config.capture.camera_index = camera;
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(fps) = self.fps {
            config.pipeline.target_fps = TargetFps::try_from(fps).map_err(anyhow::Error::msg)?;
        }
        if self.mirror {
            config.capture.mirror = true;
        }
        if let Some(model) = self.model {
            config.model.variant = model.into();
        }
        if let Some(dir) = &self.model_dir {
            config.model.model_dir = dir.clone();
        }
        if let Some(threshold) = self.threshold {
            config.tracking.min_confidence = threshold;
        }
        if let Some(threshold) = self.detection_threshold {
            config.model.detection_threshold = threshold;
        }
        if let Some(threads) = self.threads {
            config.model.threads = threads;
        }
        if let Some(filter) = self.filter {
            config.filter.kind = filter.into();
        }
        if self.vmc {
            config.vmc.enabled = true;
        }
        if let Some(ip) = &self.vmc_ip {
            config.vmc.ip = ip.clone();
        }
        if let Some(port) = self.vmc_port {
            config.vmc.port = port;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    info!("Face Pose Tracker");

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Config::from_file(path).with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => Config::default(),
    };
    args.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Camera {} at {}x{}, {}, model {}",
        config.capture.camera_index,
        config.capture.width,
        config.capture.height,
        config.pipeline.target_fps,
        config.model.variant
    );

    let app = App::new(config)?;
    let stats = app.run()?;
    info!(
        "Processed {} frames ({} dropped), final state {:?}",
        stats.processed, stats.dropped, stats.final_state
    );

    Ok(())
}
