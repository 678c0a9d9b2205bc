//! Square, optionally rotated face crops and their mapping back to the frame.

use crate::{
    constants::landmark_index::{LEFT_EYE, RIGHT_EYE},
    mark_detection::LandmarkSet,
    utils::BoundingBox,
    Error, Result,
};
use nalgebra::{Matrix3, Vector3};
use opencv::{
    core::{Mat, Scalar, Size, BORDER_CONSTANT},
    imgproc::{self, INTER_LINEAR},
};

/// Square region of the frame to feed to the landmark model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    /// Centre in frame pixels
    pub center: (f32, f32),
    /// Side length in frame pixels
    pub side: f32,
    /// In-plane rotation in radians; the crop is rotated by `-angle` to level the face
    pub angle: f32,
}

/// Region after intersecting with the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampedRegion {
    pub region: CropRegion,
    /// Shorter side of the part of the region inside the frame
    pub visible_side: f32,
}

impl CropRegion {
    /// Upright square around a detection, grown by `margin`
    #[must_use]
    pub fn around_box(bbox: &BoundingBox, margin: f32) -> Self {
        Self {
            center: bbox.center(),
            side: bbox.width.max(bbox.height) * margin,
            angle: 0.0,
        }
    }

    /// Square around the extent of a landmark set, grown by `margin`.
    ///
    /// With `rotate` the region carries the eye-line angle so the extracted
    /// crop shows a level face.
    #[must_use]
    pub fn around_landmarks(landmarks: &LandmarkSet, margin: f32, rotate: bool) -> Option<Self> {
        let bbox = landmarks.bounding_box()?;
        let angle = if rotate { eye_line_angle(landmarks).unwrap_or(0.0) } else { 0.0 };
        Some(Self {
            angle,
            ..Self::around_box(&bbox, margin)
        })
    }

    /// Axis-aligned square covered by the region, ignoring rotation
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_center(self.center.0, self.center.1, self.side, self.side)
    }

    /// Intersect with a `width × height` frame and re-square around the visible part
    #[must_use]
    pub fn clamp_to(&self, width: i32, height: i32) -> ClampedRegion {
        let visible = self.bounds().clamp_to(width, height);
        ClampedRegion {
            region: Self {
                center: visible.center(),
                side: visible.width.max(visible.height),
                angle: self.angle,
            },
            visible_side: visible.width.min(visible.height),
        }
    }
}

/// Roll of the line from the right eye centre to the left eye centre, radians
#[must_use]
pub fn eye_line_angle(landmarks: &LandmarkSet) -> Option<f32> {
    if landmarks.len() < LEFT_EYE.end {
        return None;
    }
    let centroid = |range: std::ops::Range<usize>| {
        #[allow(clippy::cast_precision_loss)]
        let n = range.len() as f32;
        let (sx, sy) = landmarks.points()[range]
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        (sx / n, sy / n)
    };
    let (rx, ry) = centroid(RIGHT_EYE);
    let (lx, ly) = centroid(LEFT_EYE);
    let angle = (ly - ry).atan2(lx - rx);
    angle.is_finite().then_some(angle)
}

/// Extracted model input together with its crop→frame transform
#[derive(Debug, Clone)]
pub struct Crop {
    image: Mat,
    region: CropRegion,
    size: i32,
    to_frame: Matrix3<f64>,
}

impl Crop {
    /// Warp `region` of `frame` into a `size × size` image.
    ///
    /// Parts of the region outside the frame are filled with black.
    ///
    /// # Errors
    ///
    /// Returns an error for a degenerate region or if `OpenCV` fails to warp
    pub fn extract(frame: &Mat, region: &CropRegion, size: i32) -> Result<Self> {
        if !(region.side.is_finite() && region.side > 0.0) || size <= 0 {
            return Err(Error::InvalidInput(format!(
                "Cannot extract crop of side {} into {size}px",
                region.side
            )));
        }

        let from_frame = frame_to_crop(region, size);
        let to_frame = from_frame
            .try_inverse()
            .ok_or_else(|| Error::InvalidInput("Crop transform is not invertible".to_string()))?;

        let affine = Mat::from_slice_2d(&[
            [from_frame[(0, 0)], from_frame[(0, 1)], from_frame[(0, 2)]],
            [from_frame[(1, 0)], from_frame[(1, 1)], from_frame[(1, 2)]],
        ])?;
        let mut image = Mat::default();
        imgproc::warp_affine(
            frame,
            &mut image,
            &affine,
            Size::new(size, size),
            INTER_LINEAR,
            BORDER_CONSTANT,
            Scalar::all(0.0),
        )?;

        Ok(Self {
            image,
            region: *region,
            size,
            to_frame,
        })
    }

    #[must_use]
    pub fn image(&self) -> &Mat {
        &self.image
    }

    #[must_use]
    pub const fn region(&self) -> &CropRegion {
        &self.region
    }

    #[must_use]
    pub const fn size(&self) -> i32 {
        self.size
    }

    /// Map a normalized `[0, 1]` crop coordinate to frame pixels
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_frame_point(&self, u: f32, v: f32) -> (f32, f32) {
        let s = f64::from(self.size);
        let p = self.to_frame * Vector3::new(f64::from(u) * s, f64::from(v) * s, 1.0);
        (p.x as f32, p.y as f32)
    }

    /// Map a whole set from normalized crop coordinates to frame pixels
    #[must_use]
    pub fn to_frame(&self, landmarks: &LandmarkSet) -> LandmarkSet {
        landmarks.map_positions(|u, v| self.to_frame_point(u, v))
    }
}

/// Homogeneous frame→crop transform: translate to the region centre, rotate by
/// `-angle`, scale to `size`, re-centre
fn frame_to_crop(region: &CropRegion, size: i32) -> Matrix3<f64> {
    let s = f64::from(size) / f64::from(region.side);
    let (sin, cos) = (-f64::from(region.angle)).sin_cos();
    let (cx, cy) = (f64::from(region.center.0), f64::from(region.center.1));
    let half = f64::from(size) / 2.0;

    let to_origin = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let rotate_scale = Matrix3::new(s * cos, -s * sin, 0.0, s * sin, s * cos, 0.0, 0.0, 0.0, 1.0);
    let to_crop = Matrix3::new(1.0, 0.0, half, 0.0, 1.0, half, 0.0, 0.0, 1.0);
    to_crop * rotate_scale * to_origin
}
