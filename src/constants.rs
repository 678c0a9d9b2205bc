//! Constants used throughout the pipeline

/// Number of facial landmarks produced by every model variant (iBUG 68-point layout)
pub const NUM_FACIAL_LANDMARKS: usize = 68;

/// Total number of 3D model coordinates (68 points × 3 dimensions)
pub const MODEL_POINTS_TOTAL_VALUES: usize = 204;

/// Image normalization constants for face detection
pub const IMAGE_NORMALIZATION_OFFSET: f32 = 127.5;
pub const IMAGE_NORMALIZATION_SCALE: f32 = 128.0;

/// Camera matrix center factor
pub const CAMERA_CENTER_FACTOR: f64 = 2.0;

/// Default frames per second assumption
pub const DEFAULT_FPS: f64 = 30.0;

/// Default tracking thresholds
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MAX_LOW_CONFIDENCE_FRAMES: u32 = 5;
pub const DEFAULT_CROP_MARGIN: f32 = 1.2;
pub const DEFAULT_MIN_CROP_SIZE: f32 = 32.0;

/// Default adaptive filter parameters
pub const DEFAULT_MIN_CUTOFF: f64 = 1.0;
pub const DEFAULT_BETA: f64 = 0.05;
pub const DEFAULT_D_CUTOFF: f64 = 1.0;
pub const DEFAULT_LOW_PASS_ALPHA: f64 = 0.5;
pub const DEFAULT_HALFLIFE: f64 = 0.05;

/// Pose solver defaults
pub const DEFAULT_MIN_CONFIDENT_POINTS: usize = 6;
pub const DEFAULT_MIN_POINT_CONFIDENCE: f32 = 0.3;
/// `solvePnP` needs at least this many correspondences
pub const PNP_MIN_POINTS: usize = 4;

/// Default VMC receiver port (Warudo)
pub const DEFAULT_VMC_PORT: u16 = 39539;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;

/// Semantic landmark indices in the 68-point layout.
///
/// Every model variant must emit points in this order.
pub mod landmark_index {
    use std::ops::Range;

    pub const RIGHT_BROW: Range<usize> = 17..22;
    pub const LEFT_BROW: Range<usize> = 22..27;
    pub const RIGHT_EYE: Range<usize> = 36..42;
    pub const LEFT_EYE: Range<usize> = 42..48;
    pub const OUTER_LIP: Range<usize> = 48..60;
    pub const INNER_LIP: Range<usize> = 60..68;

    pub const NOSE_TIP: usize = 30;
    pub const CHIN: usize = 8;

    /// Rigid points that move little with expression
    pub const STABLE_SUBSET: [usize; 12] = [27, 28, 29, 30, 31, 33, 35, 36, 39, 42, 45, 8];
}
