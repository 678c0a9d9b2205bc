//! Expression values derived from landmark geometry.
//!
//! Openness values live in `[0, 1]`. Signed values live in `[-1, 1]`, are 0 on
//! the canonical neutral face and are measured in an eye-aligned frame scaled
//! by the distance between the eye centres, so head roll and distance to the
//! camera cancel out.

use crate::{
    constants::{
        landmark_index::{INNER_LIP, LEFT_BROW, LEFT_EYE, OUTER_LIP, RIGHT_BROW, RIGHT_EYE},
        NUM_FACIAL_LANDMARKS,
    },
    mark_detection::{Landmark, LandmarkSet},
};
use std::ops::Range;

/// Eye aspect ratio of a fully closed eye
const EAR_CLOSED: f32 = 0.12;
/// Eye aspect ratio of a relaxed open eye
const EAR_OPEN: f32 = 0.28;
/// Inner lip gap over mouth width at a wide open mouth
const MOUTH_RATIO_OPEN: f32 = 0.6;

/// Mouth width over eye distance on the neutral face, and the change mapped to ±1
const MOUTH_WIDTH_NEUTRAL: f32 = 0.88;
const MOUTH_WIDTH_RANGE: f32 = 0.15;
/// Corner height above the lip centre over eye distance mapped to ±1
const MOUTH_CORNER_RANGE: f32 = 0.08;
/// Brow height above the eye centre over eye distance on the neutral face
const BROW_NEUTRAL: f32 = 0.295;
const BROW_RANGE: f32 = 0.08;

// Subject's right is image left, matching RIGHT_EYE
const MOUTH_RIGHT_CORNER: usize = OUTER_LIP.start;
const MOUTH_LEFT_CORNER: usize = OUTER_LIP.start + 6;
const INNER_LIP_TOP: usize = INNER_LIP.start + 2;
const INNER_LIP_BOTTOM: usize = INNER_LIP.start + 6;

/// Expression state of one face
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FacialFeatures {
    /// 1 fully open, 0 closed
    pub eye_open_left: f32,
    pub eye_open_right: f32,
    pub mouth_open: f32,
    /// Positive when the mouth is wider than neutral (smile), negative when narrower
    pub mouth_wide: f32,
    /// Positive when the corner is raised
    pub mouth_corner_left: f32,
    pub mouth_corner_right: f32,
    /// Positive when the brow is raised
    pub brow_left: f32,
    pub brow_right: f32,
}

impl FacialFeatures {
    /// Compute features from a frame-space 68-point set
    #[must_use]
    pub fn from_landmarks(landmarks: &LandmarkSet) -> Option<Self> {
        if landmarks.len() != NUM_FACIAL_LANDMARKS {
            return None;
        }
        let points = landmarks.points();
        let mut features = Self {
            eye_open_left: normalize(eye_aspect_ratio(&points[LEFT_EYE]), EAR_CLOSED, EAR_OPEN),
            eye_open_right: normalize(eye_aspect_ratio(&points[RIGHT_EYE]), EAR_CLOSED, EAR_OPEN),
            mouth_open: normalize(mouth_ratio(points), 0.0, MOUTH_RATIO_OPEN),
            ..Self::default()
        };

        if let Some(frame) = EyeFrame::new(points) {
            let lip_centre = (frame.height(&points[INNER_LIP_TOP]) + frame.height(&points[INNER_LIP_BOTTOM])) / 2.0;
            let width = distance(&points[MOUTH_LEFT_CORNER], &points[MOUTH_RIGHT_CORNER]) / frame.scale;

            features.mouth_wide = signed(width - MOUTH_WIDTH_NEUTRAL, MOUTH_WIDTH_RANGE);
            features.mouth_corner_left = signed(
                frame.height(&points[MOUTH_LEFT_CORNER]) - lip_centre,
                MOUTH_CORNER_RANGE,
            );
            features.mouth_corner_right = signed(
                frame.height(&points[MOUTH_RIGHT_CORNER]) - lip_centre,
                MOUTH_CORNER_RANGE,
            );
            features.brow_left = signed(
                frame.height_of(points, LEFT_BROW) - frame.height_of(points, LEFT_EYE) - BROW_NEUTRAL,
                BROW_RANGE,
            );
            features.brow_right = signed(
                frame.height_of(points, RIGHT_BROW) - frame.height_of(points, RIGHT_EYE) - BROW_NEUTRAL,
                BROW_RANGE,
            );
        }
        Some(features)
    }
}

/// Face-aligned "up" axis through the eye centres, in eye-distance units
struct EyeFrame {
    up: (f32, f32),
    scale: f32,
}

impl EyeFrame {
    fn new(points: &[Landmark]) -> Option<Self> {
        let (rx, ry) = centroid(points, RIGHT_EYE);
        let (lx, ly) = centroid(points, LEFT_EYE);
        let (ax, ay) = (lx - rx, ly - ry);
        let scale = ax.hypot(ay);
        if !scale.is_finite() || scale <= f32::EPSILON {
            return None;
        }
        // Perpendicular to the eye line, pointing up in an upright face
        Some(Self {
            up: (ay / scale, -ax / scale),
            scale,
        })
    }

    fn height(&self, p: &Landmark) -> f32 {
        (p.x * self.up.0 + p.y * self.up.1) / self.scale
    }

    fn height_of(&self, points: &[Landmark], range: Range<usize>) -> f32 {
        let (x, y) = centroid(points, range);
        self.height(&Landmark::new(x, y, 1.0))
    }
}

#[allow(clippy::cast_precision_loss)]
fn centroid(points: &[Landmark], range: Range<usize>) -> (f32, f32) {
    let n = range.len() as f32;
    let (sx, sy) = points[range].iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    (sx / n, sy / n)
}

fn distance(a: &Landmark, b: &Landmark) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn normalize(value: f32, low: f32, high: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}

fn signed(delta: f32, range: f32) -> f32 {
    if !delta.is_finite() {
        return 0.0;
    }
    (delta / range).clamp(-1.0, 1.0)
}

/// Eye aspect ratio over six eye contour points: vertical gaps over twice the width
#[must_use]
pub fn eye_aspect_ratio(eye: &[Landmark]) -> f32 {
    let [p1, p2, p3, p4, p5, p6] = eye else {
        return 0.0;
    };
    let width = distance(p1, p4);
    if width <= f32::EPSILON {
        return 0.0;
    }
    (distance(p2, p6) + distance(p3, p5)) / (2.0 * width)
}

fn mouth_ratio(points: &[Landmark]) -> f32 {
    let width = distance(&points[MOUTH_LEFT_CORNER], &points[MOUTH_RIGHT_CORNER]);
    if width <= f32::EPSILON {
        return 0.0;
    }
    distance(&points[INNER_LIP_TOP], &points[INNER_LIP_BOTTOM]) / width
}
