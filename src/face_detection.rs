//! Full-frame face location for track acquisition.

use crate::{
    config::ModelConfig,
    constants::{IMAGE_NORMALIZATION_OFFSET, IMAGE_NORMALIZATION_SCALE},
    frame_source::Frame,
    utils::{
        image_conversion::{mat_to_nchw, Normalization},
        BoundingBox,
    },
    Error, Result,
};
use ndarray::CowArray;
use opencv::core::{self, Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc::{self, INTER_LINEAR};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// SCRFD input side when the model does not declare one
const DEFAULT_INPUT_SIZE: i32 = 640;

/// Located face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Face box in frame pixels
    pub bbox: BoundingBox,
    /// Detector score in `[0, 1]`
    pub score: f32,
}

/// Finds the most prominent face in a whole frame
pub trait FaceLocator: Send {
    /// Highest-scoring face above the locator's threshold, or `None`.
    ///
    /// Identical pixels give identical answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying detector fails
    fn locate(&mut self, frame: &Frame) -> Result<Option<Detection>>;
}

/// SCRFD Face Detector using ONNX Runtime
pub struct ScrfdLocator {
    session: Session,
    input_size: (i32, i32),
    conf_threshold: f32,
    nms_threshold: f32,
    num_anchors: usize,
    strides: Vec<i32>,
    offset: usize,
}

impl ScrfdLocator {
    /// Load an SCRFD model
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime environment or session cannot be created
    pub fn new<P: AsRef<Path>>(model_path: P, conf_threshold: f32, nms_threshold: f32, threads: i16) -> Result<Self> {
        log::info!("Loading face detector from {}", model_path.as_ref().display());
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .with_log_level(ort::LoggingLevel::Warning)
                .build()?,
        );

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads.max(1))?
            .with_model_from_file(model_path)?;

        let input_meta = session
            .inputs
            .first()
            .ok_or_else(|| Error::ModelLoad("Face detector has no inputs".to_string()))?;

        // [batch, channels, height, width]; dynamic axes fall back to the default size
        let dim = |i: usize| {
            input_meta
                .dimensions
                .get(i)
                .copied()
                .flatten()
                .and_then(|d| i32::try_from(d).ok())
                .filter(|&d| d > 0)
                .unwrap_or(DEFAULT_INPUT_SIZE)
        };
        let input_size = (dim(3), dim(2));

        let (offset, strides, num_anchors) = match session.outputs.len() {
            6 | 9 => (3, vec![8, 16, 32], 2),
            10 | 15 => (5, vec![8, 16, 32, 64, 128], 1),
            n => {
                return Err(Error::ModelLoad(format!(
                    "Unsupported face detector with {n} outputs"
                )))
            }
        };

        Ok(Self {
            session,
            input_size,
            conf_threshold,
            nms_threshold,
            num_anchors,
            strides,
            offset,
        })
    }

    /// Load the detector named by the model configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if the file is missing, or the runtime error
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let path = config.face_detector_path();
        if !path.exists() {
            return Err(Error::ModelLoad(format!("Face detector not found: {}", path.display())));
        }
        Self::new(path, config.detection_threshold, config.nms_threshold, config.threads)
    }

    /// Detect all faces above the threshold, best first
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or inference fails
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn detect(&self, image: &Mat) -> Result<Vec<Detection>> {
        let (img_width, img_height) = (image.cols(), image.rows());
        if img_width <= 0 || img_height <= 0 {
            return Ok(Vec::new());
        }

        // Letterbox into the model input, anchored top-left
        let (input_width, input_height) = self.input_size;
        let ratio_img = img_height as f32 / img_width as f32;
        let ratio_model = input_height as f32 / input_width as f32;
        let (new_width, new_height) = if ratio_img > ratio_model {
            (((input_height as f32 / ratio_img) as i32).max(1), input_height)
        } else {
            (input_width, ((input_width as f32 * ratio_img) as i32).max(1))
        };
        let det_scale = new_height as f32 / img_height as f32;

        let mut resized = Mat::default();
        imgproc::resize(image, &mut resized, Size::new(new_width, new_height), 0.0, 0.0, INTER_LINEAR)?;
        let mut det_img = Mat::default();
        core::copy_make_border(
            &resized,
            &mut det_img,
            0,
            input_height - new_height,
            0,
            input_width - new_width,
            BORDER_CONSTANT,
            Scalar::all(0.0),
        )?;

        let tensor = mat_to_nchw(
            &det_img,
            Normalization::uniform(IMAGE_NORMALIZATION_OFFSET, IMAGE_NORMALIZATION_SCALE, true),
        )?;
        let cow_array = CowArray::from(tensor.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut candidates = Vec::new();
        for (idx, &stride) in self.strides.iter().enumerate() {
            let score_output = outputs
                .get(idx)
                .ok_or_else(|| Error::ModelOutputError(format!("Missing score output {idx}")))?
                .try_extract::<f32>()?;
            let bbox_output = outputs
                .get(idx + self.offset)
                .ok_or_else(|| Error::ModelOutputError(format!("Missing bbox output {idx}")))?
                .try_extract::<f32>()?;
            let scores: Vec<f32> = score_output.view().iter().copied().collect();
            let distances: Vec<f32> = bbox_output.view().iter().copied().collect();

            let centers = anchor_centers(input_height / stride, input_width / stride, stride, self.num_anchors);
            candidates.extend(decode_stride(&scores, &distances, &centers, stride, self.conf_threshold)?);
        }

        // Back to frame pixels
        for det in &mut candidates {
            det.bbox = BoundingBox::new(
                det.bbox.x / det_scale,
                det.bbox.y / det_scale,
                det.bbox.width / det_scale,
                det.bbox.height / det_scale,
            );
        }

        Ok(nms(candidates, self.nms_threshold))
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        let detections = self.detect(frame.image())?;
        Ok(detections
            .into_iter()
            .next()
            .map(|d| Detection {
                bbox: d.bbox.clamp_to(frame.width(), frame.height()),
                ..d
            })
            .filter(|d| d.bbox.area() > 0.0))
    }
}

/// Anchor centres of one stride level, `num_anchors` copies per grid cell
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn anchor_centers(height: i32, width: i32, stride: i32, num_anchors: usize) -> Vec<(f32, f32)> {
    let mut centers = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let c = ((x * stride) as f32, (y * stride) as f32);
            centers.extend(std::iter::repeat(c).take(num_anchors.max(1)));
        }
    }
    centers
}

/// Decode scores and `(left, top, right, bottom)` distances of one stride level
///
/// # Errors
///
/// Returns [`Error::ModelOutputError`] when the tensors disagree with the anchor count
#[allow(clippy::cast_precision_loss)]
pub fn decode_stride(
    scores: &[f32],
    distances: &[f32],
    centers: &[(f32, f32)],
    stride: i32,
    threshold: f32,
) -> Result<Vec<Detection>> {
    if scores.len() != centers.len() || distances.len() != centers.len() * 4 {
        return Err(Error::ModelOutputError(format!(
            "Stride {stride}: {} scores and {} distances for {} anchors",
            scores.len(),
            distances.len(),
            centers.len()
        )));
    }
    let s = stride as f32;
    Ok(scores
        .iter()
        .zip(distances.chunks_exact(4))
        .zip(centers)
        .filter(|((&score, _), _)| score >= threshold)
        .map(|((&score, d), &(cx, cy))| {
            let x1 = cx - d[0] * s;
            let y1 = cy - d[1] * s;
            let x2 = cx + d[2] * s;
            let y2 = cy + d[3] * s;
            Detection {
                bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
                score,
            }
        })
        .collect())
}

/// Non-Maximum Suppression; returns survivors sorted by descending score
#[must_use]
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_centers() {
        let centers = anchor_centers(2, 3, 8, 2);
        assert_eq!(centers.len(), 12);
        assert_eq!(centers[0], (0.0, 0.0));
        assert_eq!(centers[1], (0.0, 0.0));
        assert_eq!(centers[2], (8.0, 0.0));
        assert_eq!(centers[11], (16.0, 8.0));
    }

    #[test]
    fn test_decode_stride() {
        let centers = vec![(100.0, 100.0), (200.0, 200.0)];
        let distances = vec![
            1.0, 1.0, 2.0, 2.0, // First box
            1.5, 1.5, 2.5, 2.5, // Second box
        ];
        let scores = vec![0.9, 0.3];
        let dets = decode_stride(&scores, &distances, &centers, 10, 0.5).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(90.0, 90.0, 30.0, 30.0));
        assert_eq!(dets[0].score, 0.9);
    }

    #[test]
    fn test_decode_stride_shape_mismatch() {
        assert!(decode_stride(&[0.9], &[1.0, 1.0], &[(0.0, 0.0)], 8, 0.5).is_err());
    }

    #[test]
    fn test_nms_keeps_best() {
        let dets = vec![
            Detection {
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                score: 0.7,
            },
            Detection {
                bbox: BoundingBox::new(1.0, 1.0, 10.0, 10.0),
                score: 0.9,
            },
            Detection {
                bbox: BoundingBox::new(50.0, 50.0, 10.0, 10.0),
                score: 0.8,
            },
        ];
        let kept = nms(dets, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.8);
    }
}
