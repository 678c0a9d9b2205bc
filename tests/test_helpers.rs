//! Helper functions and utilities for tests
#![allow(dead_code)]

use face_pose_tracker::{
    config::{FilterConfig, PoseConfig, TrackingConfig},
    constants::NUM_FACIAL_LANDMARKS,
    error::{CaptureError, InferenceError},
    face_detection::{Detection, FaceLocator},
    face_model::CanonicalFaceModel,
    frame_source::{Frame, FrameSource},
    mark_detection::{check_crop_shape, Landmark, LandmarkModel, LandmarkSet},
    output::PipelineEvent,
    pose_estimation::PoseEstimator,
    tracker::Tracker,
    utils::BoundingBox,
    Result,
};
use opencv::{
    core::{Mat, Rect, Scalar, Vec3b, CV_8UC3},
    imgproc,
    prelude::*,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const FRAME_WIDTH: i32 = 320;
pub const FRAME_HEIGHT: i32 = 240;
/// Bright square standing in for a face
pub const FACE_RECT: (i32, i32, i32, i32) = (110, 70, 100, 100);

const BRIGHT: u8 = 128;

/// Create a test image with specified dimensions and type
pub fn create_test_image(height: i32, width: i32, cv_type: i32) -> Result<Mat> {
    Mat::zeros(height, width, cv_type)?.to_mat().map_err(Into::into)
}

/// Black frame with a white square at `rect`
pub fn face_image(rect: (i32, i32, i32, i32)) -> Result<Mat> {
    let mut image = Mat::new_rows_cols_with_default(FRAME_HEIGHT, FRAME_WIDTH, CV_8UC3, Scalar::all(0.0))?;
    let (x, y, w, h) = rect;
    imgproc::rectangle(
        &mut image,
        Rect::new(x, y, w, h),
        Scalar::all(255.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    Ok(image)
}

/// Frame numbered `sequence` with a synthetic 30 fps timestamp
pub fn face_frame(sequence: u64) -> Result<Frame> {
    Ok(Frame::new(
        face_image(FACE_RECT)?,
        sequence,
        Duration::from_millis(sequence * 33),
    ))
}

pub fn blank_frame(sequence: u64) -> Result<Frame> {
    Ok(Frame::new(
        create_test_image(FRAME_HEIGHT, FRAME_WIDTH, CV_8UC3)?,
        sequence,
        Duration::from_millis(sequence * 33),
    ))
}

/// Bounding box `(min_col, min_row, max_col, max_row)` of bright pixels
fn bright_extent(image: &Mat) -> Option<(i32, i32, i32, i32)> {
    let mut extent: Option<(i32, i32, i32, i32)> = None;
    for row in 0..image.rows() {
        for col in 0..image.cols() {
            let px = image.at_2d::<Vec3b>(row, col).ok()?;
            if px[0] >= BRIGHT && px[1] >= BRIGHT && px[2] >= BRIGHT {
                extent = Some(match extent {
                    None => (col, row, col, row),
                    Some((x0, y0, x1, y1)) => (x0.min(col), y0.min(row), x1.max(col), y1.max(row)),
                });
            }
        }
    }
    extent
}

/// Locator returning the extent of the bright square
pub struct ThresholdLocator;

impl FaceLocator for ThresholdLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Option<Detection>> {
        #[allow(clippy::cast_precision_loss)]
        Ok(bright_extent(frame.image()).map(|(x0, y0, x1, y1)| Detection {
            bbox: BoundingBox::new(x0 as f32, y0 as f32, (x1 - x0 + 1) as f32, (y1 - y0 + 1) as f32),
            score: 0.99,
        }))
    }
}

/// Landmark model that fits the frontal template into the bright square of the crop.
///
/// Confidences come from a script, one value per call; `None` fails the call.
/// A crop without bright pixels gets zero confidence.
pub struct RectFaceModel {
    input_size: i32,
    script: Arc<Mutex<VecDeque<Option<f32>>>>,
    template: Vec<(f32, f32)>,
}

impl RectFaceModel {
    pub fn new(input_size: i32) -> Self {
        Self::scripted(input_size, &[])
    }

    pub fn scripted(input_size: i32, script: &[Option<f32>]) -> Self {
        Self {
            input_size,
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            template: CanonicalFaceModel::default().frontal_template(),
        }
    }
}

impl LandmarkModel for RectFaceModel {
    fn name(&self) -> &str {
        "rect"
    }

    fn landmark_count(&self) -> usize {
        NUM_FACIAL_LANDMARKS
    }

    fn input_size(&self) -> i32 {
        self.input_size
    }

    #[allow(clippy::cast_precision_loss)]
    fn infer(&self, crop: &Mat) -> std::result::Result<LandmarkSet, InferenceError> {
        check_crop_shape(crop, self.input_size)?;
        let scripted = self.script.lock().unwrap().pop_front().unwrap_or(Some(0.95));
        let Some(confidence) = scripted else {
            return Err(InferenceError::Engine("scripted failure".to_string()));
        };

        let size = self.input_size as f32;
        let (x0, y0, x1, y1, confidence) = match bright_extent(crop) {
            Some((c0, r0, c1, r1)) => (
                c0 as f32 / size,
                r0 as f32 / size,
                (c1 + 1) as f32 / size,
                (r1 + 1) as f32 / size,
                confidence,
            ),
            None => (0.25, 0.25, 0.75, 0.75, 0.0),
        };
        Ok(LandmarkSet::new(
            self.template
                .iter()
                .map(|&(tx, ty)| Landmark::new(x0 + tx * (x1 - x0), y0 + ty * (y1 - y0), confidence))
                .collect(),
        ))
    }
}

pub fn pose_estimator() -> PoseEstimator {
    PoseEstimator::new(CanonicalFaceModel::default(), &PoseConfig::default(), FRAME_WIDTH, FRAME_HEIGHT).unwrap()
}

pub fn tracker_with(model: RectFaceModel, tracking: TrackingConfig) -> Tracker {
    Tracker::new(
        Box::new(ThresholdLocator),
        Box::new(model),
        pose_estimator(),
        tracking,
        FilterConfig::default(),
    )
    .unwrap()
}

/// Upright crops keep the synthetic square axis-aligned
pub fn tracking_config() -> TrackingConfig {
    TrackingConfig {
        rotate_crop: false,
        ..TrackingConfig::default()
    }
}

pub fn tracker() -> Tracker {
    tracker_with(RectFaceModel::new(128), tracking_config())
}

/// One scripted read
pub enum Step {
    Face,
    Blank,
    Fail(CaptureError),
}

/// Frame source replaying a script at a fixed pace.
///
/// Reads past the end of the script report a disconnect. Open results are
/// taken from `opens`, defaulting to success.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    opens: VecDeque<std::result::Result<(), CaptureError>>,
    pace: Duration,
    sequence: u64,
    open_calls: Arc<Mutex<u32>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            opens: VecDeque::new(),
            pace: Duration::from_millis(50),
            sequence: 0,
            open_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn faces(count: usize) -> Self {
        Self::new((0..count).map(|_| Step::Face).collect())
    }

    #[must_use]
    pub fn with_opens(mut self, opens: Vec<std::result::Result<(), CaptureError>>) -> Self {
        self.opens = opens.into();
        self
    }

    /// Shared counter of `open` calls
    pub fn open_calls(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.open_calls)
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self, _camera_index: i32) -> std::result::Result<(), CaptureError> {
        *self.open_calls.lock().unwrap() += 1;
        self.opens.pop_front().unwrap_or(Ok(()))
    }

    fn read(&mut self) -> std::result::Result<Frame, CaptureError> {
        thread::sleep(self.pace);
        match self.steps.pop_front() {
            Some(Step::Face) => {
                self.sequence += 1;
                face_frame(self.sequence).map_err(|e| CaptureError::Backend(e.to_string()))
            }
            Some(Step::Blank) => {
                self.sequence += 1;
                blank_frame(self.sequence).map_err(|e| CaptureError::Backend(e.to_string()))
            }
            Some(Step::Fail(e)) => Err(e),
            None => Err(CaptureError::Disconnected),
        }
    }

    fn close(&mut self) {}
}

/// Split drained events into results, faults and the stop marker count
pub fn split_events(
    events: impl IntoIterator<Item = PipelineEvent>,
) -> (Vec<face_pose_tracker::tracker::TrackingResult>, Vec<CaptureError>, usize) {
    let mut results = Vec::new();
    let mut faults = Vec::new();
    let mut stops = 0;
    for event in events {
        match event {
            PipelineEvent::Result(r) => results.push(r),
            PipelineEvent::Fault(f) => faults.push(f),
            PipelineEvent::Stopped => stops += 1,
        }
    }
    (results, faults, stops)
}

/// Largest per-point distance between two sets of equal length
pub fn max_point_distance(a: &LandmarkSet, b: &LandmarkSet) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p.x - q.x).hypot(p.y - q.y))
        .fold(0.0, f32::max)
}
