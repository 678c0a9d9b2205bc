//! Per-frame face tracking: acquisition, crop following and loss hysteresis.
//!
//! The processing loop owns the `Option<TrackState>` and lends it to
//! [`Tracker::advance`] every frame. A new acquisition always replaces the
//! whole state, so filter history never leaks from one track into the next.

use crate::{
    config::{FilterConfig, TrackingConfig},
    constants::landmark_index::STABLE_SUBSET,
    crop::{Crop, CropRegion},
    error::InferenceError,
    face_detection::FaceLocator,
    features::FacialFeatures,
    filters::{create_filter, LandmarkFilter},
    frame_source::Frame,
    mark_detection::{LandmarkModel, LandmarkSet},
    pose_estimation::{Pose, PoseEstimator},
    Result,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How per-landmark confidences are combined into one track confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceAggregation {
    /// Mean over all landmarks
    #[default]
    Mean,
    /// Weakest landmark
    Min,
    /// Mean over rigid nose, eye corner and chin points
    StableSubsetMean,
}

impl ConfidenceAggregation {
    #[must_use]
    pub fn aggregate(self, landmarks: &LandmarkSet) -> f32 {
        match self {
            Self::Mean => landmarks.mean_confidence(),
            Self::Min => landmarks.min_confidence(),
            Self::StableSubsetMean => landmarks.mean_confidence_of(&STABLE_SUBSET),
        }
    }
}

/// Track status published with every result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Confident landmarks this frame
    Tracking,
    /// Low confidence this frame, track held within the hysteresis window
    Reacquiring,
    /// No track
    Lost,
}

/// Continuity of one face across frames
pub struct TrackState {
    raw: LandmarkSet,
    smoothed: LandmarkSet,
    filter: Box<dyn LandmarkFilter>,
    low_confidence_frames: u32,
    age: u64,
    last_update: Duration,
    last_pose: Pose,
}

impl TrackState {
    /// Last landmarks straight from the model, in frame pixels
    #[must_use]
    pub fn raw(&self) -> &LandmarkSet {
        &self.raw
    }

    /// Last filtered landmarks, in frame pixels
    #[must_use]
    pub fn smoothed(&self) -> &LandmarkSet {
        &self.smoothed
    }

    /// Consecutive low-confidence frames so far
    #[must_use]
    pub const fn low_confidence_frames(&self) -> u32 {
        self.low_confidence_frames
    }

    /// Frames since acquisition, counting the acquisition frame
    #[must_use]
    pub const fn age(&self) -> u64 {
        self.age
    }

    #[must_use]
    pub const fn last_pose(&self) -> &Pose {
        &self.last_pose
    }

    #[must_use]
    pub fn filter_name(&self) -> &str {
        self.filter.name()
    }
}

/// Outcome of one processed frame
#[derive(Debug, Clone)]
pub struct TrackingResult {
    pub timestamp: Duration,
    pub sequence: u64,
    pub status: TrackStatus,
    /// Model output this frame (empty when none)
    pub raw: LandmarkSet,
    /// Smoothed landmarks (empty when lost)
    pub filtered: LandmarkSet,
    pub pose: Pose,
    /// Aggregate landmark confidence this frame
    pub confidence: f32,
    pub track_age: u64,
    pub features: Option<FacialFeatures>,
}

impl TrackingResult {
    /// Result for a frame without a track
    #[must_use]
    pub fn lost(frame: &Frame) -> Self {
        Self {
            timestamp: frame.timestamp(),
            sequence: frame.sequence(),
            status: TrackStatus::Lost,
            raw: LandmarkSet::default(),
            filtered: LandmarkSet::default(),
            pose: Pose::invalid(),
            confidence: 0.0,
            track_age: 0,
            features: None,
        }
    }

    fn with_state(frame: &Frame, status: TrackStatus, raw: LandmarkSet, confidence: f32, state: &TrackState) -> Self {
        Self {
            timestamp: frame.timestamp(),
            sequence: frame.sequence(),
            status,
            raw,
            filtered: state.smoothed.clone(),
            pose: state.last_pose,
            confidence,
            track_age: state.age,
            features: FacialFeatures::from_landmarks(&state.smoothed),
        }
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.status == TrackStatus::Tracking
    }
}

/// Drives locator, landmark model, filter and pose solver for one face slot
pub struct Tracker {
    locator: Box<dyn FaceLocator>,
    model: Box<dyn LandmarkModel>,
    pose: PoseEstimator,
    tracking: TrackingConfig,
    filter: FilterConfig,
}

impl Tracker {
    /// Create a tracker
    ///
    /// # Errors
    ///
    /// Returns an error if the filter configuration is invalid
    pub fn new(
        locator: Box<dyn FaceLocator>,
        model: Box<dyn LandmarkModel>,
        pose: PoseEstimator,
        tracking: TrackingConfig,
        filter: FilterConfig,
    ) -> Result<Self> {
        // Fail here rather than on the first acquisition
        create_filter(&filter)?;
        info!(
            "Tracker ready: model {} ({}px), filter {:?}, min confidence {:.2}, hysteresis {} frames",
            model.name(),
            model.input_size(),
            filter.kind,
            tracking.min_confidence,
            tracking.max_low_confidence_frames
        );
        Ok(Self {
            locator,
            model,
            pose,
            tracking,
            filter,
        })
    }

    #[must_use]
    pub fn model(&self) -> &dyn LandmarkModel {
        self.model.as_ref()
    }

    /// Swap the landmark model; callers must drop any active track
    pub fn set_model(&mut self, model: Box<dyn LandmarkModel>) {
        info!("Switching landmark model {} -> {}", self.model.name(), model.name());
        self.model = model;
    }

    #[must_use]
    pub const fn pose_estimator(&self) -> &PoseEstimator {
        &self.pose
    }

    /// Process one frame, creating, updating or clearing the track
    pub fn advance(&mut self, frame: &Frame, track: &mut Option<TrackState>) -> TrackingResult {
        if let Err(e) = self.pose.set_frame_size(frame.width(), frame.height()) {
            warn!("Failed to update camera intrinsics: {}", e);
        }

        match track.take() {
            None => {
                let (result, state) = self.acquire(frame);
                *track = state;
                result
            }
            Some(state) => {
                let (result, state) = self.follow(frame, state);
                *track = state;
                result
            }
        }
    }

    fn acquire(&mut self, frame: &Frame) -> (TrackingResult, Option<TrackState>) {
        let detection = match self.locator.locate(frame) {
            Ok(Some(detection)) => detection,
            Ok(None) => {
                debug!("Frame {}: no face found", frame.sequence());
                return (TrackingResult::lost(frame), None);
            }
            Err(e) => {
                warn!("Frame {}: face locator failed: {}", frame.sequence(), e);
                return (TrackingResult::lost(frame), None);
            }
        };

        let region = CropRegion::around_box(&detection.bbox, self.tracking.crop_margin);
        let clamped = region.clamp_to(frame.width(), frame.height());
        if clamped.visible_side < self.tracking.min_crop_size {
            debug!(
                "Frame {}: face too small to track ({:.0}px)",
                frame.sequence(),
                clamped.visible_side
            );
            return (TrackingResult::lost(frame), None);
        }

        let raw = match self.run_model(frame, &clamped.region) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Frame {}: inference failed during acquisition: {}", frame.sequence(), e);
                return (TrackingResult::lost(frame), None);
            }
        };

        let confidence = self.tracking.aggregation.aggregate(&raw);
        if confidence < self.tracking.min_confidence {
            debug!(
                "Frame {}: acquisition rejected, confidence {:.2}",
                frame.sequence(),
                confidence
            );
            return (
                TrackingResult {
                    confidence,
                    raw,
                    ..TrackingResult::lost(frame)
                },
                None,
            );
        }

        let mut filter = match create_filter(&self.filter) {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Cannot create landmark filter: {}", e);
                return (TrackingResult::lost(frame), None);
            }
        };
        let smoothed = filter.update(&raw, 0.0);
        let pose = self.pose.solve(&smoothed);

        info!(
            "Face acquired at frame {} (score {:.2}, confidence {:.2})",
            frame.sequence(),
            detection.score,
            confidence
        );
        let state = TrackState {
            raw: raw.clone(),
            smoothed,
            filter,
            low_confidence_frames: 0,
            age: 1,
            last_update: frame.timestamp(),
            last_pose: pose,
        };
        let result = TrackingResult::with_state(frame, TrackStatus::Tracking, raw, confidence, &state);
        (result, Some(state))
    }

    fn follow(&mut self, frame: &Frame, mut state: TrackState) -> (TrackingResult, Option<TrackState>) {
        let Some(region) =
            CropRegion::around_landmarks(&state.smoothed, self.tracking.crop_margin, self.tracking.rotate_crop)
        else {
            info!("Track lost at frame {}: no usable landmarks", frame.sequence());
            return (TrackingResult::lost(frame), None);
        };
        let clamped = region.clamp_to(frame.width(), frame.height());
        if clamped.visible_side < self.tracking.min_crop_size {
            info!(
                "Track lost at frame {}: crop {:.0}px below minimum",
                frame.sequence(),
                clamped.visible_side
            );
            return (TrackingResult::lost(frame), None);
        }

        state.age += 1;
        let (raw, confidence) = match self.run_model(frame, &clamped.region) {
            Ok(raw) => {
                let confidence = self.tracking.aggregation.aggregate(&raw);
                if confidence >= self.tracking.min_confidence {
                    let dt = frame.timestamp().saturating_sub(state.last_update).as_secs_f64();
                    state.smoothed = state.filter.update(&raw, dt);
                    state.last_pose = self.pose.solve_with_guess(&state.smoothed, Some(&state.last_pose));
                    state.raw = raw.clone();
                    state.low_confidence_frames = 0;
                    state.last_update = frame.timestamp();
                    let result = TrackingResult::with_state(frame, TrackStatus::Tracking, raw, confidence, &state);
                    return (result, Some(state));
                }
                (raw, confidence)
            }
            Err(e) => {
                warn!("Frame {}: inference failed: {}", frame.sequence(), e);
                (LandmarkSet::default(), 0.0)
            }
        };

        state.low_confidence_frames += 1;
        if state.low_confidence_frames > self.tracking.max_low_confidence_frames {
            info!(
                "Track lost at frame {} after {} low-confidence frames",
                frame.sequence(),
                state.low_confidence_frames
            );
            return (
                TrackingResult {
                    confidence,
                    ..TrackingResult::lost(frame)
                },
                None,
            );
        }

        debug!(
            "Frame {}: low confidence {:.2} ({}/{})",
            frame.sequence(),
            confidence,
            state.low_confidence_frames,
            self.tracking.max_low_confidence_frames
        );
        let result = TrackingResult::with_state(frame, TrackStatus::Reacquiring, raw, confidence, &state);
        (result, Some(state))
    }

    /// Crop, infer and map the landmarks back to frame pixels
    fn run_model(&self, frame: &Frame, region: &CropRegion) -> std::result::Result<LandmarkSet, InferenceError> {
        let crop = Crop::extract(frame.image(), region, self.model.input_size())
            .map_err(|e| InferenceError::Engine(format!("crop extraction failed: {e}")))?;
        let normalized = self.model.infer(crop.image())?;
        if normalized.len() != self.model.landmark_count() {
            return Err(InferenceError::Cardinality {
                expected: self.model.landmark_count(),
                actual: normalized.len(),
            });
        }
        Ok(crop.to_frame(&normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PoseConfig,
        constants::NUM_FACIAL_LANDMARKS,
        face_detection::Detection,
        face_model::CanonicalFaceModel,
        mark_detection::{check_crop_shape, Landmark},
        utils::BoundingBox,
    };
    use opencv::core::{Mat, Scalar, CV_8UC3};
    use opencv::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FixedLocator(Option<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _frame: &Frame) -> Result<Option<Detection>> {
            Ok(self.0.map(|bbox| Detection { bbox, score: 0.9 }))
        }
    }

    /// Frontal template with scripted confidences, one per call
    struct ScriptedModel {
        confidences: Mutex<VecDeque<Option<f32>>>,
    }

    impl ScriptedModel {
        fn new(script: &[Option<f32>]) -> Self {
            Self {
                confidences: Mutex::new(script.iter().copied().collect()),
            }
        }
    }

    impl LandmarkModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn landmark_count(&self) -> usize {
            NUM_FACIAL_LANDMARKS
        }

        fn input_size(&self) -> i32 {
            64
        }

        fn infer(&self, crop: &Mat) -> std::result::Result<LandmarkSet, InferenceError> {
            check_crop_shape(crop, 64)?;
            let next = self.confidences.lock().unwrap().pop_front().unwrap_or(Some(1.0));
            let Some(confidence) = next else {
                return Err(InferenceError::Engine("scripted failure".to_string()));
            };
            let template = CanonicalFaceModel::default().frontal_template();
            Ok(LandmarkSet::new(
                template
                    .into_iter()
                    .map(|(x, y)| Landmark::new(0.1 + 0.8 * x, 0.1 + 0.8 * y, confidence))
                    .collect(),
            ))
        }
    }

    fn tracker(script: &[Option<f32>]) -> Tracker {
        let pose = PoseEstimator::new(CanonicalFaceModel::default(), &PoseConfig::default(), 640, 480).unwrap();
        Tracker::new(
            Box::new(FixedLocator(Some(BoundingBox::new(270.0, 190.0, 100.0, 100.0)))),
            Box::new(ScriptedModel::new(script)),
            pose,
            TrackingConfig::default(),
            FilterConfig::default(),
        )
        .unwrap()
    }

    fn frame(sequence: u64) -> Frame {
        let image = Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(0.0)).unwrap();
        Frame::new(image, sequence, Duration::from_millis(33 * sequence))
    }

    #[test]
    fn test_aggregation() {
        let mut points = vec![Landmark::new(0.0, 0.0, 1.0); NUM_FACIAL_LANDMARKS];
        points[0].confidence = 0.0;
        let set = LandmarkSet::new(points);
        assert!(ConfidenceAggregation::Mean.aggregate(&set) < 1.0);
        assert_eq!(ConfidenceAggregation::Min.aggregate(&set), 0.0);
        assert_eq!(ConfidenceAggregation::StableSubsetMean.aggregate(&set), 1.0);
    }

    #[test]
    fn test_acquisition_creates_track() {
        let mut tracker = tracker(&[]);
        let mut track = None;
        let result = tracker.advance(&frame(1), &mut track);
        assert_eq!(result.status, TrackStatus::Tracking);
        assert_eq!(result.filtered, result.raw);
        assert_eq!(result.track_age, 1);
        let state = track.as_ref().unwrap();
        assert_eq!(state.age(), 1);
        assert_eq!(state.low_confidence_frames(), 0);
        assert_eq!(state.filter_name(), "OneEuroFilter");
    }

    #[test]
    fn test_no_face_is_lost() {
        let pose = PoseEstimator::new(CanonicalFaceModel::default(), &PoseConfig::default(), 640, 480).unwrap();
        let mut tracker = Tracker::new(
            Box::new(FixedLocator(None)),
            Box::new(ScriptedModel::new(&[])),
            pose,
            TrackingConfig::default(),
            FilterConfig::default(),
        )
        .unwrap();
        let mut track = None;
        let result = tracker.advance(&frame(1), &mut track);
        assert_eq!(result.status, TrackStatus::Lost);
        assert!(track.is_none());
        assert!(!result.pose.valid);
    }

    #[test]
    fn test_low_confidence_acquisition_creates_no_track() {
        let mut tracker = tracker(&[Some(0.1)]);
        let mut track = None;
        let result = tracker.advance(&frame(1), &mut track);
        assert_eq!(result.status, TrackStatus::Lost);
        assert!(track.is_none());
        assert_eq!(result.raw.len(), NUM_FACIAL_LANDMARKS);
    }

    #[test]
    fn test_low_frames_hold_track() {
        let mut tracker = tracker(&[Some(1.0), Some(0.1), None]);
        let mut track = None;
        let first = tracker.advance(&frame(1), &mut track);

        let second = tracker.advance(&frame(2), &mut track);
        assert_eq!(second.status, TrackStatus::Reacquiring);
        assert_eq!(second.filtered, first.filtered);

        // Inference error counts the same as low confidence
        let third = tracker.advance(&frame(3), &mut track);
        assert_eq!(third.status, TrackStatus::Reacquiring);
        assert_eq!(track.as_ref().unwrap().low_confidence_frames(), 2);

        let fourth = tracker.advance(&frame(4), &mut track);
        assert_eq!(fourth.status, TrackStatus::Tracking);
        assert_eq!(track.as_ref().unwrap().low_confidence_frames(), 0);
        assert_eq!(fourth.track_age, 4);
    }

    #[test]
    fn test_failed_inference_reports_no_raw_points() {
        let mut tracker = tracker(&[Some(1.0), None]);
        let mut track = None;
        let first = tracker.advance(&frame(1), &mut track);
        assert_eq!(first.raw.len(), NUM_FACIAL_LANDMARKS);

        let second = tracker.advance(&frame(2), &mut track);
        assert_eq!(second.status, TrackStatus::Reacquiring);
        assert!(second.raw.is_empty());
        assert_eq!(second.confidence, 0.0);
        // The smoothed set and the held raw set survive for the next crop
        assert_eq!(second.filtered, first.filtered);
        assert_eq!(track.as_ref().unwrap().raw(), &first.raw);
    }

    #[test]
    fn test_tiny_crop_is_lost() {
        let pose = PoseEstimator::new(CanonicalFaceModel::default(), &PoseConfig::default(), 640, 480).unwrap();
        let mut tracker = Tracker::new(
            Box::new(FixedLocator(Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0)))),
            Box::new(ScriptedModel::new(&[])),
            pose,
            TrackingConfig::default(),
            FilterConfig::default(),
        )
        .unwrap();
        let mut track = None;
        assert_eq!(tracker.advance(&frame(1), &mut track).status, TrackStatus::Lost);
        assert!(track.is_none());
    }
}
