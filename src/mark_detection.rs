//! Landmark regression on face crops.
//!
//! Every model variant answers in the same convention: 68 points in iBUG order,
//! coordinates normalized to `[0, 1]` over the crop with the origin at its
//! top-left corner, x to the right and y down.

use crate::{
    config::ModelConfig,
    constants::{
        landmark_index::{INNER_LIP, OUTER_LIP},
        NUM_FACIAL_LANDMARKS,
    },
    error::InferenceError,
    utils::{
        image_conversion::{mat_shape, mat_to_tensor, Normalization, TensorLayout},
        BoundingBox,
    },
    Error, Result,
};
use ndarray::{Array4, CowArray};
use opencv::core::Mat;
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::path::Path;
use std::sync::Arc;

/// Slack around the crop within which a coordinate-only output is trusted
const IN_CROP_TOLERANCE: f32 = 0.1;

/// Points produced by the heatmap networks, iBUG order without inner mouth corners
pub const HEATMAP_LANDMARKS: usize = 66;

/// Divisor of the logit-encoded heatmap offsets
const OFFSET_LOGIT_FACTOR: f32 = 16.0;

/// One facial point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Landmark {
    #[must_use]
    pub const fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

/// Ordered landmarks of one face, index `i` always names the same facial point
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    #[must_use]
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.points.iter()
    }

    /// `(x, y)` of every point
    #[must_use]
    pub fn positions(&self) -> Vec<(f32, f32)> {
        self.points.iter().map(|p| (p.x, p.y)).collect()
    }

    /// Mean confidence over all points, 0 when empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_confidence(&self) -> f32 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| p.confidence).sum::<f32>() / self.points.len() as f32
    }

    /// Lowest point confidence, 0 when empty
    #[must_use]
    pub fn min_confidence(&self) -> f32 {
        self.points
            .iter()
            .map(|p| p.confidence)
            .reduce(f32::min)
            .unwrap_or(0.0)
    }

    /// Mean confidence over the given indices, ignoring out-of-range ones
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_confidence_of(&self, indices: &[usize]) -> f32 {
        let (sum, count) = indices
            .iter()
            .filter_map(|&i| self.points.get(i))
            .fold((0.0, 0usize), |(s, c), p| (s + p.confidence, c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    /// Tight box around all finite points
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.points.iter().map(|p| (p.x, p.y)))
    }

    /// Apply a coordinate transform to every point, keeping confidences
    #[must_use]
    pub fn map_positions<F>(&self, mut f: F) -> Self
    where
        F: FnMut(f32, f32) -> (f32, f32),
    {
        Self::new(
            self.points
                .iter()
                .map(|p| {
                    let (x, y) = f(p.x, p.y);
                    Landmark::new(x, y, p.confidence)
                })
                .collect(),
        )
    }
}

impl Index<usize> for LandmarkSet {
    type Output = Landmark;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a LandmarkSet {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Output tensor layout of a landmark network
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputLayout {
    /// Flat `[x, y]` or `[x, y, confidence]` per landmark, coordinates divided by `scale`
    Coordinates { scale: f32 },
    /// `(1, 3N, H, W)` with `N = landmarks`: heatmaps, then row offsets, then column offsets
    Heatmap { landmarks: usize },
}

/// Selectable landmark network, trading speed for accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    Fast,
    #[default]
    Balanced,
    AccurateA,
    AccurateB,
}

impl ModelVariant {
    pub const ALL: [Self; 4] = [Self::Fast, Self::Balanced, Self::AccurateA, Self::AccurateB];

    /// ONNX file name inside the model directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Fast => "face_landmarks.onnx",
            Self::Balanced => "lm_model1_opt.onnx",
            Self::AccurateA => "lm_model2_opt.onnx",
            Self::AccurateB => "lm_model3_opt.onnx",
        }
    }

    /// Square input side in pixels
    #[must_use]
    pub const fn input_size(self) -> i32 {
        match self {
            Self::Fast => 128,
            Self::Balanced | Self::AccurateA | Self::AccurateB => 224,
        }
    }

    #[must_use]
    pub const fn layout(self) -> OutputLayout {
        match self {
            Self::Fast => OutputLayout::Coordinates { scale: 128.0 },
            Self::Balanced | Self::AccurateA | Self::AccurateB => OutputLayout::Heatmap {
                landmarks: HEATMAP_LANDMARKS,
            },
        }
    }

    /// Memory order the network expects its input in
    #[must_use]
    pub const fn input_layout(self) -> TensorLayout {
        match self {
            Self::Fast => TensorLayout::Nhwc,
            Self::Balanced | Self::AccurateA | Self::AccurateB => TensorLayout::Nchw,
        }
    }

    #[must_use]
    pub const fn normalization(self) -> Normalization {
        match self {
            Self::Fast => Normalization::UNIT_RGB,
            Self::Balanced | Self::AccurateA | Self::AccurateB => Normalization::IMAGENET_RGB,
        }
    }

    /// Build the network input for a BGR crop
    ///
    /// # Errors
    ///
    /// Returns an error if the crop is not an 8-bit 3-channel image
    pub fn input_tensor(self, crop: &Mat) -> Result<Array4<f32>> {
        mat_to_tensor(crop, self.normalization(), self.input_layout())
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::AccurateA => "accurate_a",
            Self::AccurateB => "accurate_b",
        };
        f.write_str(name)
    }
}

/// A network mapping a square crop to a [`LandmarkSet`].
///
/// Implementations hold no per-call state, the same crop always yields the
/// same landmarks.
pub trait LandmarkModel: Send {
    fn name(&self) -> &str;

    /// Number of landmarks every successful call returns
    fn landmark_count(&self) -> usize;

    /// Side of the square crop the model accepts
    fn input_size(&self) -> i32;

    /// Run the network on a crop of exactly `input_size × input_size` BGR pixels
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] on a wrong crop shape, an engine fault or
    /// a landmark count other than [`LandmarkModel::landmark_count`]
    fn infer(&self, crop: &Mat) -> std::result::Result<LandmarkSet, InferenceError>;
}

/// Reject crops that do not match the model's input shape
///
/// # Errors
///
/// Returns [`InferenceError::ShapeMismatch`] when the crop is not `size × size × 3`
pub fn check_crop_shape(crop: &Mat, size: i32) -> std::result::Result<(), InferenceError> {
    let actual = mat_shape(crop);
    let expected = (size, size, 3);
    if actual == expected {
        Ok(())
    } else {
        Err(InferenceError::ShapeMismatch { expected, actual })
    }
}

/// Landmark network running on `ONNX` Runtime
pub struct OnnxLandmarkModel {
    session: Session,
    variant: ModelVariant,
    name: String,
}

impl OnnxLandmarkModel {
    /// Load a landmark model from an `ONNX` file
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime environment cannot be created or the
    /// file is not a loadable model
    pub fn new<P: AsRef<Path>>(model_path: P, variant: ModelVariant, threads: i16) -> Result<Self> {
        log::info!(
            "Loading {} landmark model from {}",
            variant,
            model_path.as_ref().display()
        );
        let environment = Arc::new(
            Environment::builder()
                .with_name("landmarks")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads.max(1))?
            .with_model_from_file(model_path)?;

        if session.outputs.is_empty() {
            return Err(Error::ModelOutputError("Landmark model has no outputs".to_string()));
        }

        Ok(Self {
            session,
            variant,
            name: format!("onnx-{variant}"),
        })
    }

    #[must_use]
    pub const fn variant(&self) -> ModelVariant {
        self.variant
    }

    /// Run the session and return the first output with its shape
    fn forward(&self, crop: &Mat) -> std::result::Result<(Vec<f32>, Vec<usize>), InferenceError> {
        let tensor = self
            .variant
            .input_tensor(crop)
            .map_err(|e| InferenceError::Engine(e.to_string()))?;
        let cow_array = CowArray::from(tensor.into_dyn());
        let input = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input])?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::Engine("No output from model".to_string()))?;

        let extracted = output.try_extract::<f32>()?;
        let view = extracted.view();
        Ok((view.iter().copied().collect(), view.shape().to_vec()))
    }
}

impl LandmarkModel for OnnxLandmarkModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn landmark_count(&self) -> usize {
        NUM_FACIAL_LANDMARKS
    }

    fn input_size(&self) -> i32 {
        self.variant.input_size()
    }

    fn infer(&self, crop: &Mat) -> std::result::Result<LandmarkSet, InferenceError> {
        check_crop_shape(crop, self.input_size())?;
        let (values, shape) = self.forward(crop)?;
        let points = match self.variant.layout() {
            OutputLayout::Coordinates { scale } => decode_coordinates(&values, NUM_FACIAL_LANDMARKS, scale)?,
            OutputLayout::Heatmap { landmarks } => to_ibug68(decode_heatmaps(&values, &shape, landmarks)?)?,
        };
        Ok(LandmarkSet::new(points))
    }
}

/// Decode a flat coordinate vector.
///
/// Two values per landmark carry no confidence, so a point is trusted fully
/// when it lies within the crop (plus a small slack) and not at all otherwise.
///
/// # Errors
///
/// Returns [`InferenceError::Cardinality`] when the vector length is neither
/// `2n` nor `3n`
pub fn decode_coordinates(values: &[f32], n: usize, scale: f32) -> std::result::Result<Vec<Landmark>, InferenceError> {
    let stride = match values.len() {
        len if len == n * 2 => 2,
        len if len == n * 3 => 3,
        len => {
            return Err(InferenceError::Cardinality {
                expected: n,
                actual: len / 2,
            })
        }
    };
    let scale = if scale > 0.0 { scale } else { 1.0 };

    Ok(values
        .chunks_exact(stride)
        .map(|c| {
            let x = c[0] / scale;
            let y = c[1] / scale;
            let confidence = if stride == 3 {
                c[2].clamp(0.0, 1.0)
            } else if in_crop(x) && in_crop(y) {
                1.0
            } else {
                0.0
            };
            Landmark::new(x, y, confidence)
        })
        .collect())
}

fn in_crop(v: f32) -> bool {
    v.is_finite() && (-IN_CROP_TOLERANCE..=1.0 + IN_CROP_TOLERANCE).contains(&v)
}

/// Decode `(1, 3n, H, W)` heatmaps with per-cell sub-pixel offsets.
///
/// The peak of heatmap `i` gives the cell and the confidence. Channel `n + i`
/// holds the row offset and channel `2n + i` the column offset at that cell,
/// both logit-encoded as a fraction of the crop.
///
/// # Errors
///
/// Returns [`InferenceError::Cardinality`] when the channel count is not `3n`
/// and [`InferenceError::Engine`] for a malformed tensor
#[allow(clippy::cast_precision_loss)]
pub fn decode_heatmaps(values: &[f32], shape: &[usize], n: usize) -> std::result::Result<Vec<Landmark>, InferenceError> {
    let [_, channels, h, w] = *shape else {
        return Err(InferenceError::Engine(format!("Expected 4D heatmap output, got shape {shape:?}")));
    };
    if channels != 3 * n {
        return Err(InferenceError::Cardinality {
            expected: n,
            actual: channels / 3,
        });
    }
    let plane = h * w;
    if plane == 0 || values.len() < channels * plane {
        return Err(InferenceError::Engine(format!(
            "Heatmap tensor holds {} values, shape {shape:?}",
            values.len()
        )));
    }

    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        let heatmap = &values[i * plane..(i + 1) * plane];
        let (peak, confidence) = heatmap
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (idx, v)| if v > best.1 { (idx, v) } else { best });
        let (row, col) = (peak / w, peak % w);
        let dy = offset_logit(values[(n + i) * plane + peak]);
        let dx = offset_logit(values[(2 * n + i) * plane + peak]);
        let x = col as f32 / w as f32 + dx;
        let y = row as f32 / h as f32 + dy;
        points.push(Landmark::new(x, y, confidence.clamp(0.0, 1.0)));
    }
    Ok(points)
}

fn offset_logit(p: f32) -> f32 {
    let p = p.clamp(1e-7, 1.0 - 1e-7);
    (p / (1.0 - p)).ln() / OFFSET_LOGIT_FACTOR
}

/// Bring a decoded set into the 68-point iBUG order.
///
/// 66-point sets lack the inner mouth corners 60 and 64. Each is placed
/// halfway between the outer corner on its side and the middle of the two
/// inner lip points next to it, with the lowest confidence among the three.
///
/// # Errors
///
/// Returns [`InferenceError::Cardinality`] for any count other than 66 or 68
pub fn to_ibug68(points: Vec<Landmark>) -> std::result::Result<Vec<Landmark>, InferenceError> {
    match points.len() {
        NUM_FACIAL_LANDMARKS => Ok(points),
        HEATMAP_LANDMARKS => {
            let right = INNER_LIP.start;
            let left = INNER_LIP.start + 4;
            let mut out = points;
            out.insert(right, Landmark::default());
            out.insert(left, Landmark::default());
            let right_corner = inner_corner(&out[OUTER_LIP.start], &out[right + 1], &out[INNER_LIP.end - 1]);
            let left_corner = inner_corner(&out[OUTER_LIP.start + 6], &out[left - 1], &out[left + 1]);
            out[right] = right_corner;
            out[left] = left_corner;
            Ok(out)
        }
        actual => Err(InferenceError::Cardinality {
            expected: NUM_FACIAL_LANDMARKS,
            actual,
        }),
    }
}

fn inner_corner(outer: &Landmark, upper: &Landmark, lower: &Landmark) -> Landmark {
    let mid_x = (upper.x + lower.x) / 2.0;
    let mid_y = (upper.y + lower.y) / 2.0;
    Landmark::new(
        (outer.x + mid_x) / 2.0,
        (outer.y + mid_y) / 2.0,
        outer.confidence.min(upper.confidence).min(lower.confidence),
    )
}

/// Resolve the configured variant into a loaded model
///
/// # Errors
///
/// Returns [`Error::ModelLoad`] if the model file is missing, or the runtime
/// error if it cannot be loaded
pub fn load_landmark_model(config: &ModelConfig) -> Result<Box<dyn LandmarkModel>> {
    let path = config.landmark_model_path();
    if !path.exists() {
        return Err(Error::ModelLoad(format!(
            "Landmark model for variant {} not found: {}",
            config.variant,
            path.display()
        )));
    }
    let model = OnnxLandmarkModel::new(&path, config.variant, config.threads)?;
    Ok(Box::new(model))
}
