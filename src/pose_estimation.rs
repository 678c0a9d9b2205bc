use crate::{
    config::PoseConfig,
    constants::{CAMERA_CENTER_FACTOR, EPSILON, PNP_MIN_POINTS},
    face_model::CanonicalFaceModel,
    mark_detection::LandmarkSet,
    Error, Result,
};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use opencv::{
    calib3d,
    core::{Mat, Point2f, Point3f, Vector},
    prelude::*,
};

/// Head rotation as Euler angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Head pose in camera coordinates (x right, y down, z forward, millimetres)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Unit rotation from the face model frame to the camera frame
    pub rotation: UnitQuaternion<f64>,
    /// Translation of the face model origin
    pub translation: Vector3<f64>,
    /// Whether the solve succeeded
    pub valid: bool,
    /// Mean pixel distance between projected model points and the landmarks used
    pub reprojection_error: f64,
}

impl Pose {
    /// Failed solve: identity rotation, zero translation
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            valid: false,
            reprojection_error: f64::INFINITY,
        }
    }

    /// Orthonormal 3×3 rotation matrix
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Rodrigues rotation vector
    #[must_use]
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    #[must_use]
    pub fn euler_degrees(&self) -> EulerAngles {
        rotation_matrix_to_euler(&self.rotation_matrix())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Convert rotation matrix to Euler angles in degrees
#[must_use]
pub fn rotation_matrix_to_euler(r: &Matrix3<f64>) -> EulerAngles {
    let pitch = (-r[(1, 2)]).clamp(-1.0, 1.0).asin();
    let yaw = r[(0, 2)].atan2(r[(2, 2)]);
    let roll = r[(1, 0)].atan2(r[(1, 1)]);

    EulerAngles {
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
        roll: roll.to_degrees(),
    }
}

/// Closest rotation to `m` in the Frobenius sense
///
/// # Errors
///
/// Returns an error if the SVD does not converge
pub fn orthonormalize(m: &Matrix3<f64>) -> Result<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let (mut u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(Error::InvalidInput("SVD of rotation matrix failed".to_string())),
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // Reflection; flip the axis of the smallest singular value
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Ok(r)
}

/// Head pose estimator using `PnP` algorithm
pub struct PoseEstimator {
    model: CanonicalFaceModel,
    camera_matrix: Mat,
    dist_coeffs: Mat,
    focal_length: Option<f64>,
    frame_size: (i32, i32),
    min_confident_points: usize,
    min_point_confidence: f32,
}

impl PoseEstimator {
    /// Create a pose estimator for a `width × height` camera
    ///
    /// # Errors
    ///
    /// Returns an error if the camera matrices cannot be built
    pub fn new(model: CanonicalFaceModel, config: &PoseConfig, width: i32, height: i32) -> Result<Self> {
        let dist_coeffs = Mat::zeros(4, 1, opencv::core::CV_64F)?.to_mat()?;
        let mut estimator = Self {
            model,
            camera_matrix: Mat::default(),
            dist_coeffs,
            focal_length: config.focal_length,
            frame_size: (0, 0),
            min_confident_points: config.min_confident_points.max(PNP_MIN_POINTS),
            min_point_confidence: config.min_point_confidence,
        };
        estimator.set_frame_size(width, height)?;
        Ok(estimator)
    }

    /// Create a pose estimator, loading the 3D face model file if one is configured
    ///
    /// # Errors
    ///
    /// Returns an error if the face model file is unreadable or malformed
    pub fn from_config(config: &PoseConfig, width: i32, height: i32) -> Result<Self> {
        let model = match &config.face_model {
            Some(path) => CanonicalFaceModel::from_file(path)?,
            None => CanonicalFaceModel::default(),
        };
        Self::new(model, config, width, height)
    }

    /// Rebuild the intrinsics for a new frame size
    ///
    /// # Errors
    ///
    /// Returns an error if the camera matrix cannot be built
    pub fn set_frame_size(&mut self, width: i32, height: i32) -> Result<()> {
        if self.frame_size == (width, height) {
            return Ok(());
        }
        let focal = self.focal_length.unwrap_or_else(|| f64::from(width));
        let center = (
            f64::from(width) / CAMERA_CENTER_FACTOR,
            f64::from(height) / CAMERA_CENTER_FACTOR,
        );
        self.camera_matrix = Mat::from_slice_2d(&[
            [focal, 0.0, center.0],
            [0.0, focal, center.1],
            [0.0, 0.0, 1.0],
        ])?;
        self.frame_size = (width, height);
        log::debug!("Camera intrinsics set for {}x{} (focal {:.1})", width, height, focal);
        Ok(())
    }

    #[must_use]
    pub const fn frame_size(&self) -> (i32, i32) {
        self.frame_size
    }

    #[must_use]
    pub fn camera_matrix(&self) -> &Mat {
        &self.camera_matrix
    }

    #[must_use]
    pub fn model(&self) -> &CanonicalFaceModel {
        &self.model
    }

    /// Estimate the head pose from frame-space landmarks
    #[must_use]
    pub fn solve(&self, landmarks: &LandmarkSet) -> Pose {
        self.solve_with_guess(landmarks, None)
    }

    /// Estimate the head pose, starting the iterative solver from `previous` when it is valid
    #[must_use]
    pub fn solve_with_guess(&self, landmarks: &LandmarkSet, previous: Option<&Pose>) -> Pose {
        match self.try_solve(landmarks, previous.filter(|p| p.valid)) {
            Ok(Some(pose)) => pose,
            Ok(None) => Pose::invalid(),
            Err(e) => {
                log::debug!("Pose solve failed: {}", e);
                Pose::invalid()
            }
        }
    }

    fn try_solve(&self, landmarks: &LandmarkSet, guess: Option<&Pose>) -> Result<Option<Pose>> {
        if landmarks.len() != self.model.len() {
            log::debug!(
                "Landmark count {} does not match face model ({})",
                landmarks.len(),
                self.model.len()
            );
            return Ok(None);
        }

        let (object, image): (Vec<Point3f>, Vec<Point2f>) = landmarks
            .iter()
            .zip(self.model.points())
            .filter(|(lm, _)| lm.confidence >= self.min_point_confidence && lm.x.is_finite() && lm.y.is_finite())
            .map(|(lm, p)| (*p, Point2f::new(lm.x, lm.y)))
            .unzip();
        if object.len() < self.min_confident_points {
            return Ok(None);
        }
        let object: Vector<Point3f> = object.into_iter().collect();
        let image: Vector<Point2f> = image.into_iter().collect();

        let (mut rvec, mut tvec, use_guess) = match guess {
            Some(pose) => {
                let r = pose.rotation_vector();
                let t = pose.translation;
                (
                    Mat::from_slice_2d(&[[r.x], [r.y], [r.z]])?,
                    Mat::from_slice_2d(&[[t.x], [t.y], [t.z]])?,
                    true,
                )
            }
            None => (Mat::default(), Mat::default(), false),
        };

        let solved = calib3d::solve_pnp(
            &object,
            &image,
            &self.camera_matrix,
            &self.dist_coeffs,
            &mut rvec,
            &mut tvec,
            use_guess,
            calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if !solved {
            return Ok(None);
        }

        // Convert rotation vector to rotation matrix
        let mut rotation_mat = Mat::default();
        calib3d::rodrigues(&rvec, &mut rotation_mat, &mut Mat::default())?;
        let mut raw = Matrix3::zeros();
        for i in 0..3 {
            for j in 0..3 {
                raw[(i, j)] = *rotation_mat.at_2d::<f64>(i as i32, j as i32)?;
            }
        }
        let translation = Vector3::new(
            *tvec.at_2d::<f64>(0, 0)?,
            *tvec.at_2d::<f64>(1, 0)?,
            *tvec.at_2d::<f64>(2, 0)?,
        );

        if raw.iter().any(|v| !v.is_finite()) || translation.iter().any(|v| !v.is_finite()) {
            return Ok(None);
        }
        if translation.z <= EPSILON {
            // Face behind the camera
            return Ok(None);
        }

        let rotation_matrix = orthonormalize(&raw)?;
        let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));
        let rotation = UnitQuaternion::new_normalize(q.into_inner());

        let mut projected = Vector::<Point2f>::new();
        calib3d::project_points(
            &object,
            &rvec,
            &tvec,
            &self.camera_matrix,
            &self.dist_coeffs,
            &mut projected,
            &mut Mat::default(),
            0.0,
        )?;
        let reprojection_error = mean_distance(&projected, &image);

        Ok(Some(Pose {
            rotation,
            translation,
            valid: true,
            reprojection_error,
        }))
    }

    /// Project 3D points in the face model frame into the image for a pose
    ///
    /// # Errors
    ///
    /// Returns an error if `OpenCV` projection fails
    pub fn project(&self, pose: &Pose, points: &[Point3f]) -> Result<Vec<Point2f>> {
        let r = pose.rotation_vector();
        let t = pose.translation;
        let rvec = Mat::from_slice_2d(&[[r.x], [r.y], [r.z]])?;
        let tvec = Mat::from_slice_2d(&[[t.x], [t.y], [t.z]])?;
        let object: Vector<Point3f> = points.iter().copied().collect();
        let mut projected = Vector::<Point2f>::new();
        calib3d::project_points(
            &object,
            &rvec,
            &tvec,
            &self.camera_matrix,
            &self.dist_coeffs,
            &mut projected,
            &mut Mat::default(),
            0.0,
        )?;
        Ok(projected.to_vec())
    }
}

fn mean_distance(a: &Vector<Point2f>, b: &Vector<Point2f>) -> f64 {
    if a.is_empty() {
        return f64::INFINITY;
    }
    let total: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(p, q)| f64::from((p.x - q.x).hypot(p.y - q.y)))
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let n = a.len() as f64;
    total / n
}
