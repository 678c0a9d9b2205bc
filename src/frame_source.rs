//! Camera frames and the capture device boundary.

use crate::{config::CaptureConfig, error::CaptureError};
use log::{debug, info};
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{self, VideoCapture, CAP_PROP_BUFFERSIZE, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use std::time::{Duration, Instant};

/// Immutable timestamped BGR image
#[derive(Debug, Clone)]
pub struct Frame {
    image: Mat,
    sequence: u64,
    timestamp: Duration,
}

impl Frame {
    #[must_use]
    pub fn new(image: Mat, sequence: u64, timestamp: Duration) -> Self {
        Self {
            image,
            sequence,
            timestamp,
        }
    }

    #[must_use]
    pub fn image(&self) -> &Mat {
        &self.image
    }

    #[must_use]
    pub fn width(&self) -> i32 {
        self.image.cols()
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        self.image.rows()
    }

    /// Capture sequence number, increasing by one per frame read from the device
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Capture time relative to when the source was opened
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Horizontally flipped copy of this frame
    ///
    /// # Errors
    ///
    /// Returns an error if `OpenCV` fails to flip the image
    pub fn mirrored(&self) -> opencv::Result<Self> {
        let mut flipped = Mat::default();
        core::flip(&self.image, &mut flipped, 1)?;
        Ok(Self::new(flipped, self.sequence, self.timestamp))
    }
}

/// A live feed of frames.
///
/// `open` acquires the device, `read` blocks for the next frame and `close`
/// releases it. Reconnecting is `close` followed by `open`.
pub trait FrameSource: Send {
    /// Open the capture device
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::OpenFailed`] if the device is unavailable
    fn open(&mut self, camera_index: i32) -> Result<(), CaptureError>;

    /// Read the next frame
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] if the device is gone or returns no image
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the device
    fn close(&mut self);
}

/// Webcam source backed by `OpenCV`'s `VideoCapture`
pub struct CameraSource {
    config: CaptureConfig,
    target_fps: f64,
    capture: Option<VideoCapture>,
    opened_at: Instant,
    sequence: u64,
}

impl CameraSource {
    #[must_use]
    pub fn new(config: CaptureConfig, target_fps: f64) -> Self {
        Self {
            config,
            target_fps,
            capture: None,
            opened_at: Instant::now(),
            sequence: 0,
        }
    }

    /// Whether the device is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.capture.is_some()
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self, camera_index: i32) -> Result<(), CaptureError> {
        info!("Opening camera {}", camera_index);
        let mut cap = VideoCapture::new(camera_index, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(CaptureError::OpenFailed { index: camera_index });
        }

        cap.set(CAP_PROP_FRAME_WIDTH, f64::from(self.config.width))?;
        cap.set(CAP_PROP_FRAME_HEIGHT, f64::from(self.config.height))?;
        cap.set(CAP_PROP_FPS, self.target_fps)?;
        // Small driver buffer keeps the newest frame close to real time
        cap.set(CAP_PROP_BUFFERSIZE, f64::from(self.config.buffer_size))?;

        info!(
            "Camera {} opened at {}x{}",
            camera_index,
            cap.get(CAP_PROP_FRAME_WIDTH)?,
            cap.get(CAP_PROP_FRAME_HEIGHT)?
        );

        self.capture = Some(cap);
        self.opened_at = Instant::now();
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        let cap = self.capture.as_mut().ok_or(CaptureError::Disconnected)?;
        let mut image = Mat::default();
        if !cap.read(&mut image)? {
            return Err(CaptureError::Disconnected);
        }
        if image.empty() {
            return Err(CaptureError::EmptyFrame);
        }

        self.sequence += 1;
        let frame = Frame::new(image, self.sequence, self.opened_at.elapsed());
        if self.config.mirror {
            return Ok(frame.mirrored()?);
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if let Some(mut cap) = self.capture.take() {
            debug!("Releasing camera");
            if let Err(e) = cap.release() {
                log::warn!("Failed to release camera: {}", e);
            }
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
