//! Error types for the face tracking pipeline.
//!
//! Only capture faults and model load failures stop the pipeline. Per-frame
//! problems ([`InferenceError`], acquisition misses, pose solve failures) are
//! folded into the published [`crate::tracker::TrackingResult`] instead.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// `ONNX` Runtime failed while building a session
    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::OrtError),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame capture failed
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Landmark inference failed for one frame
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model loading failed
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Model output processing error
    #[error("Model output error: {0}")]
    ModelOutputError(String),

    /// Model validation error (wrong number of points, etc.)
    #[error("Model validation error: {0}")]
    ModelValidationError(String),

    /// Filter initialization error
    #[error("Filter error: {0}")]
    FilterError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Output sink failed to deliver a result
    #[error("Output error: {0}")]
    Output(String),
}

impl Error {
    /// Whether the pipeline must stop because of this error
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Capture(_) | Self::ModelLoad(_) | Self::OnnxRuntime(_) | Self::ConfigError(_)
        )
    }
}

/// Camera / frame source failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The capture device could not be opened
    #[error("failed to open capture device {index}")]
    OpenFailed {
        /// Device index that was requested
        index: i32,
    },

    /// The device was disconnected or the stream ended
    #[error("capture device disconnected")]
    Disconnected,

    /// The device returned an empty image
    #[error("capture device returned an empty frame")]
    EmptyFrame,

    /// The capture backend reported an error
    #[error("capture backend error: {0}")]
    Backend(String),
}

impl From<opencv::Error> for CaptureError {
    fn from(e: opencv::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Single-frame landmark model failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Crop dimensions do not match the model input shape
    #[error("crop shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        /// (width, height, channels) the model requires
        expected: (i32, i32, i32),
        /// (width, height, channels) that was supplied
        actual: (i32, i32, i32),
    },

    /// The model produced a different landmark count than it declares
    #[error("model produced {actual} landmarks, expected {expected}")]
    Cardinality {
        /// Declared landmark count
        expected: usize,
        /// Produced landmark count
        actual: usize,
    },

    /// The inference engine reported an internal fault
    #[error("inference engine fault: {0}")]
    Engine(String),
}

impl From<ort::OrtError> for InferenceError {
    fn from(e: ort::OrtError) -> Self {
        Self::Engine(e.to_string())
    }
}

impl From<opencv::Error> for InferenceError {
    fn from(e: opencv::Error) -> Self {
        Self::Engine(e.to_string())
    }
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Capture(CaptureError::Disconnected).is_fatal());
        assert!(Error::ModelLoad("missing".to_string()).is_fatal());
        assert!(!Error::Inference(InferenceError::Engine("boom".to_string())).is_fatal());
        assert!(!Error::InvalidInput("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = InferenceError::ShapeMismatch {
            expected: (112, 112, 3),
            actual: (64, 64, 3),
        };
        assert!(err.to_string().contains("(64, 64, 3)"));

        let err = Error::from(CaptureError::OpenFailed { index: 2 });
        assert_eq!(err.to_string(), "Capture error: failed to open capture device 2");
    }
}
