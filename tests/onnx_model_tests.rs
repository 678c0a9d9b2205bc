//! Tests against the real ONNX models in `models/`

mod test_helpers;

use face_pose_tracker::{
    config::ModelConfig,
    face_detection::{FaceLocator, ScrfdLocator},
    frame_source::Frame,
    mark_detection::{load_landmark_model, ModelVariant},
    Result,
};
use opencv::{
    core::{Mat, Scalar, CV_8UC3},
    prelude::*,
};
use std::time::Duration;
use test_helpers::create_test_image;

fn config(variant: ModelVariant) -> ModelConfig {
    ModelConfig {
        variant,
        ..ModelConfig::default()
    }
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_load_every_landmark_variant() -> Result<()> {
    for variant in ModelVariant::ALL {
        let model = load_landmark_model(&config(variant))?;
        assert_eq!(model.landmark_count(), 68, "{variant}");
        assert!(model.input_size() > 0);
    }
    Ok(())
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_landmark_inference_shape() -> Result<()> {
    for variant in ModelVariant::ALL {
        let model = load_landmark_model(&config(variant))?;
        let size = model.input_size();
        let crop = Mat::new_rows_cols_with_default(size, size, CV_8UC3, Scalar::all(128.0))?;
        let landmarks = model.infer(&crop)?;
        assert_eq!(landmarks.len(), 68, "{variant}");
        assert!(landmarks
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite() && (0.0..=1.0).contains(&p.confidence)));
    }
    Ok(())
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_wrong_crop_size_is_rejected() -> Result<()> {
    let model = load_landmark_model(&config(ModelVariant::Fast))?;
    let crop = Mat::new_rows_cols_with_default(10, 10, CV_8UC3, Scalar::all(0.0))?;
    assert!(model.infer(&crop).is_err());
    Ok(())
}

#[test]
#[ignore = "Requires ONNX models"]
fn test_detector_on_blank_frame() -> Result<()> {
    let mut locator = ScrfdLocator::from_config(&ModelConfig::default())?;
    let frame = Frame::new(create_test_image(480, 640, CV_8UC3)?, 1, Duration::ZERO);
    assert!(locator.locate(&frame)?.is_none());
    Ok(())
}
