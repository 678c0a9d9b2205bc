//! Configuration management for the face pose tracker

use crate::{
    constants::{
        DEFAULT_BETA, DEFAULT_CROP_MARGIN, DEFAULT_D_CUTOFF, DEFAULT_HALFLIFE, DEFAULT_LOW_PASS_ALPHA,
        DEFAULT_MAX_LOW_CONFIDENCE_FRAMES, DEFAULT_MIN_CONFIDENCE, DEFAULT_MIN_CONFIDENT_POINTS,
        DEFAULT_MIN_CROP_SIZE, DEFAULT_MIN_CUTOFF, DEFAULT_MIN_POINT_CONFIDENCE, DEFAULT_VMC_PORT, PNP_MIN_POINTS,
    },
    filters::FilterKind,
    mark_detection::ModelVariant,
    scheduler::TargetFps,
    tracker::ConfidenceAggregation,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera configuration
    pub capture: CaptureConfig,

    /// Frame cadence and fault recovery
    pub pipeline: PipelineConfig,

    /// Model selection and file locations
    pub model: ModelConfig,

    /// Track acquisition and loss policy
    pub tracking: TrackingConfig,

    /// Landmark smoothing
    pub filter: FilterConfig,

    /// Head pose solver
    pub pose: PoseConfig,

    /// VMC protocol output
    pub vmc: VmcConfig,
}

/// Camera parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index
    pub camera_index: i32,

    /// Requested frame width
    pub width: i32,

    /// Requested frame height
    pub height: i32,

    /// Process a horizontally flipped image
    pub mirror: bool,

    /// Driver-side frame buffer length
    pub buffer_size: i32,
}

/// Scheduling parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Processing rate (15, 30 or 60)
    pub target_fps: TargetFps,

    /// Reconnect attempts after a capture fault before giving up
    pub reconnect_attempts: u32,

    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
}

/// Model selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Landmark model variant
    pub variant: ModelVariant,

    /// Directory holding the `.onnx` files
    pub model_dir: PathBuf,

    /// Intra-op threads for inference
    pub threads: i16,

    /// Face detector file, relative to `model_dir` unless absolute
    pub face_detector: PathBuf,

    /// Minimum face detection score (0.0-1.0)
    pub detection_threshold: f32,

    /// IOU threshold for non-maximum suppression (0.0-1.0)
    pub nms_threshold: f32,
}

/// Tracking policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum aggregate landmark confidence for a frame to count (0.0-1.0)
    pub min_confidence: f32,

    /// Consecutive low-confidence frames tolerated before the track is lost
    pub max_low_confidence_frames: u32,

    /// How per-point confidences are combined
    pub aggregation: ConfidenceAggregation,

    /// Crop side as a multiple of the landmark extent
    pub crop_margin: f32,

    /// Smallest usable crop side in pixels
    pub min_crop_size: f32,

    /// Rotate the crop so the eye line is horizontal
    pub rotate_crop: bool,
}

/// Filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Filter type
    pub kind: FilterKind,

    /// One-euro minimum cutoff frequency in Hz
    pub min_cutoff: f64,

    /// One-euro speed coefficient
    pub beta: f64,

    /// One-euro derivative cutoff frequency in Hz
    pub d_cutoff: f64,

    /// Low pass filter alpha
    pub alpha: f64,

    /// Critically damped spring halflife in seconds
    pub halflife: f64,
}

/// Pose solver parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Focal length in pixels, frame width when unset
    pub focal_length: Option<f64>,

    /// Fewest confident landmarks for a solve
    pub min_confident_points: usize,

    /// Per-point confidence needed to take part in the solve
    pub min_point_confidence: f32,

    /// 3D face model file, built-in mean face when unset
    pub face_model: Option<PathBuf>,
}

/// VMC output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmcConfig {
    /// Send tracking data over VMC
    pub enabled: bool,

    /// Receiver address
    pub ip: String,

    /// Receiver port
    pub port: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 640,
            height: 480,
            mirror: false,
            buffer_size: 1,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: TargetFps::Fps30,
            reconnect_attempts: 3,
            reconnect_delay_ms: 500,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::default(),
            model_dir: PathBuf::from("models"),
            threads: 1,
            face_detector: PathBuf::from("face_detector.onnx"),
            detection_threshold: 0.6,
            nms_threshold: 0.4,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_low_confidence_frames: DEFAULT_MAX_LOW_CONFIDENCE_FRAMES,
            aggregation: ConfidenceAggregation::default(),
            crop_margin: DEFAULT_CROP_MARGIN,
            min_crop_size: DEFAULT_MIN_CROP_SIZE,
            rotate_crop: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::default(),
            min_cutoff: DEFAULT_MIN_CUTOFF,
            beta: DEFAULT_BETA,
            d_cutoff: DEFAULT_D_CUTOFF,
            alpha: DEFAULT_LOW_PASS_ALPHA,
            halflife: DEFAULT_HALFLIFE,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            focal_length: None,
            min_confident_points: DEFAULT_MIN_CONFIDENT_POINTS,
            min_point_confidence: DEFAULT_MIN_POINT_CONFIDENCE,
            face_model: None,
        }
    }
}

impl Default for VmcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ip: "127.0.0.1".to_string(),
            port: DEFAULT_VMC_PORT,
        }
    }
}

impl ModelConfig {
    /// Path of the landmark model for the configured variant
    #[must_use]
    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir.join(self.variant.file_name())
    }

    /// Path of the face detector model
    #[must_use]
    pub fn face_detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.face_detector)
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the text is not a valid configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Check value ranges and that the model files exist
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        self.validate_ranges()?;
        self.check_model_files()
    }

    /// Check value ranges only
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first out-of-range value
    pub fn validate_ranges(&self) -> Result<()> {
        if self.capture.camera_index < 0 {
            return Err(Error::ConfigError("Camera index must not be negative".to_string()));
        }
        if self.capture.width <= 0 || self.capture.height <= 0 {
            return Err(Error::ConfigError("Capture size must be positive".to_string()));
        }

        if !(0.0..=1.0).contains(&self.model.detection_threshold) {
            return Err(Error::ConfigError(
                "Detection threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.nms_threshold) {
            return Err(Error::ConfigError("NMS threshold must be between 0.0 and 1.0".to_string()));
        }
        if self.model.threads < 1 {
            return Err(Error::ConfigError("Inference threads must be at least 1".to_string()));
        }

        if !(0.0..=1.0).contains(&self.tracking.min_confidence) {
            return Err(Error::ConfigError(
                "Minimum confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.tracking.crop_margin < 1.0 {
            return Err(Error::ConfigError("Crop margin must be at least 1.0".to_string()));
        }
        if self.tracking.min_crop_size <= 0.0 {
            return Err(Error::ConfigError("Minimum crop size must be positive".to_string()));
        }

        if self.filter.min_cutoff <= 0.0 || self.filter.d_cutoff <= 0.0 {
            return Err(Error::ConfigError("Filter cutoff frequencies must be positive".to_string()));
        }
        if self.filter.beta < 0.0 {
            return Err(Error::ConfigError("Filter beta must not be negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.filter.alpha) || self.filter.alpha == 0.0 {
            return Err(Error::ConfigError("Low pass alpha must be in (0.0, 1.0]".to_string()));
        }
        if self.filter.halflife <= 0.0 {
            return Err(Error::ConfigError("Filter halflife must be positive".to_string()));
        }

        if self.pose.min_confident_points < PNP_MIN_POINTS {
            return Err(Error::ConfigError(format!(
                "Pose solver needs at least {PNP_MIN_POINTS} confident points"
            )));
        }
        if !(0.0..=1.0).contains(&self.pose.min_point_confidence) {
            return Err(Error::ConfigError(
                "Point confidence must be between 0.0 and 1.0".to_string(),
            ));
        }
        if matches!(self.pose.focal_length, Some(f) if f <= 0.0) {
            return Err(Error::ConfigError("Focal length must be positive".to_string()));
        }

        if self.vmc.enabled && self.vmc.port == 0 {
            return Err(Error::ConfigError("VMC port must not be 0".to_string()));
        }

        Ok(())
    }

    /// Check that every model file this configuration needs exists
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] naming the missing file
    pub fn check_model_files(&self) -> Result<()> {
        let landmarks = self.model.landmark_model_path();
        if !landmarks.exists() {
            return Err(Error::ConfigError(format!(
                "Landmark model not found: {}",
                landmarks.display()
            )));
        }
        let detector = self.model.face_detector_path();
        if !detector.exists() {
            return Err(Error::ConfigError(format!(
                "Face detector model not found: {}",
                detector.display()
            )));
        }
        if let Some(face_model) = &self.pose.face_model {
            if !face_model.exists() {
                return Err(Error::ConfigError(format!(
                    "3D face model not found: {}",
                    face_model.display()
                )));
            }
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Face Pose Tracker Configuration

# Camera
capture:
  camera_index: 0
  width: 640
  height: 480
  mirror: false
  buffer_size: 1

# Cadence and capture fault recovery
pipeline:
  target_fps: 30
  reconnect_attempts: 3
  reconnect_delay_ms: 500

# Models
model:
  variant: balanced          # fast | balanced | accurate_a | accurate_b
  model_dir: "models"
  threads: 1
  face_detector: "face_detector.onnx"
  detection_threshold: 0.6
  nms_threshold: 0.4

# Tracking policy
tracking:
  min_confidence: 0.5
  max_low_confidence_frames: 5
  aggregation: mean          # mean | min | stable_subset_mean
  crop_margin: 1.2
  min_crop_size: 32.0
  rotate_crop: true

# Landmark smoothing
filter:
  kind: one_euro             # one_euro | low_pass | critically_damped | none
  min_cutoff: 1.0
  beta: 0.05
  d_cutoff: 1.0
  alpha: 0.5
  halflife: 0.05

# Head pose
pose:
  min_confident_points: 6
  min_point_confidence: 0.3

# VMC output (Warudo 39539, VMagicMirror 39540)
vmc:
  enabled: false
  ip: "127.0.0.1"
  port: 39539
"#;
