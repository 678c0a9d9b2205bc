//! Pose solver properties on synthetic projections of the canonical face

use face_pose_tracker::{
    config::PoseConfig,
    face_model::CanonicalFaceModel,
    mark_detection::{Landmark, LandmarkSet},
    pose_estimation::{Pose, PoseEstimator},
};
use nalgebra::{UnitQuaternion, Vector3};
use proptest::prelude::*;

const WIDTH: i32 = 640;
const HEIGHT: i32 = 480;

fn estimator() -> PoseEstimator {
    PoseEstimator::new(CanonicalFaceModel::default(), &PoseConfig::default(), WIDTH, HEIGHT).unwrap()
}

fn pose(pitch: f64, yaw: f64, roll: f64, z: f64) -> Pose {
    Pose {
        rotation: UnitQuaternion::from_euler_angles(pitch.to_radians(), yaw.to_radians(), roll.to_radians()),
        translation: Vector3::new(0.0, 0.0, z),
        valid: true,
        reprojection_error: 0.0,
    }
}

fn project(estimator: &PoseEstimator, pose: &Pose, noise: &[(f32, f32)]) -> LandmarkSet {
    let points = estimator.project(pose, estimator.model().points()).unwrap();
    LandmarkSet::new(
        points
            .iter()
            .zip(noise.iter().cycle())
            .map(|(p, (nx, ny))| Landmark::new(p.x + nx, p.y + ny, 1.0))
            .collect(),
    )
}

fn assert_rotation_well_formed(pose: &Pose) {
    let q = pose.rotation.quaternion();
    assert!((q.norm() - 1.0).abs() < 1e-9, "norm {}", q.norm());
    let r = pose.rotation_matrix();
    assert!((r.transpose() * r - nalgebra::Matrix3::identity()).norm() < 1e-9);
    assert!((r.determinant() - 1.0).abs() < 1e-9);
}

#[test]
fn test_recovers_projected_pose() {
    let estimator = estimator();
    let truth = pose(10.0, -20.0, 5.0, 900.0);
    let landmarks = project(&estimator, &truth, &[(0.0, 0.0)]);
    let solved = estimator.solve(&landmarks);

    assert!(solved.valid);
    assert!(solved.reprojection_error < 0.5);
    assert!(solved.rotation.angle_to(&truth.rotation).to_degrees() < 1.0);
    assert!((solved.translation - truth.translation).norm() < 20.0);
    assert_rotation_well_formed(&solved);
}

#[test]
fn test_guess_from_previous_pose() {
    let estimator = estimator();
    let truth = pose(-5.0, 15.0, 0.0, 700.0);
    let landmarks = project(&estimator, &truth, &[(0.3, -0.2), (-0.4, 0.1)]);
    let first = estimator.solve(&landmarks);
    let second = estimator.solve_with_guess(&landmarks, Some(&first));
    assert!(second.valid);
    assert!(second.rotation.angle_to(&first.rotation).to_degrees() < 0.5);
}

#[test]
fn test_too_few_confident_points() {
    let estimator = estimator();
    let landmarks = project(&estimator, &pose(0.0, 0.0, 0.0, 800.0), &[(0.0, 0.0)]);
    let sparse = LandmarkSet::new(
        landmarks
            .iter()
            .enumerate()
            .map(|(i, p)| Landmark::new(p.x, p.y, if i < 3 { 1.0 } else { 0.0 }))
            .collect(),
    );
    let solved = estimator.solve(&sparse);
    assert!(!solved.valid);
    assert_rotation_well_formed(&solved);
}

#[test]
fn test_wrong_cardinality_is_invalid() {
    let estimator = estimator();
    let landmarks = LandmarkSet::new(vec![Landmark::new(320.0, 240.0, 1.0); 10]);
    assert!(!estimator.solve(&landmarks).valid);
}

#[test]
fn test_frame_size_change_moves_principal_point() {
    let mut estimator = estimator();
    estimator.set_frame_size(1280, 720).unwrap();
    assert_eq!(estimator.frame_size(), (1280, 720));
    let truth = pose(0.0, 0.0, 0.0, 800.0);
    let landmarks = project(&estimator, &truth, &[(0.0, 0.0)]);
    let nose = landmarks[30];
    assert!((nose.x - 640.0).abs() < 40.0);
    assert!((nose.y - 360.0).abs() < 100.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_rotation_unit_norm_under_noise(
        pitch in -30.0f64..30.0,
        yaw in -40.0f64..40.0,
        roll in -20.0f64..20.0,
        z in 500.0f64..1500.0,
        noise in prop::collection::vec((-3.0f32..3.0, -3.0f32..3.0), 68),
    ) {
        let estimator = estimator();
        let landmarks = project(&estimator, &pose(pitch, yaw, roll, z), &noise);
        let solved = estimator.solve(&landmarks);
        let q = solved.rotation.quaternion();
        prop_assert!((q.norm() - 1.0).abs() < 1e-9);
        let r = solved.rotation_matrix();
        prop_assert!((r.transpose() * r - nalgebra::Matrix3::identity()).norm() < 1e-6);
        if solved.valid {
            prop_assert!(solved.translation.z > 0.0);
            prop_assert!(solved.reprojection_error.is_finite());
        }
    }
}
