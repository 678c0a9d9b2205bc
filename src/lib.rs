//! Real-time face landmark tracking and head pose estimation.
//!
//! This library tracks a single face in a live video stream and produces, for
//! every processed frame, a smoothed set of 68 facial landmarks and a head
//! pose, using:
//! - ONNX Runtime for face detection and landmark regression
//! - `OpenCV` for capture, crop warping and `PnP` pose solving
//! - Adaptive temporal filters to remove landmark jitter without lag
//!
//! The per-frame pipeline consists of:
//! 1. Face location on the full frame when no track is active
//! 2. Crop extraction around the previous landmarks (rotated upright)
//! 3. Landmark regression on the crop, mapped back to frame pixels
//! 4. Temporal filtering of the landmarks
//! 5. Pose estimation using `PnP` against a canonical 3D face
//!
//! Capture and processing run on separate threads with a single-slot handoff,
//! so a slow frame drops stale frames instead of queueing them.
//!
//! # Examples
//!
//! ## Running the pipeline
//!
//! ```no_run
//! use face_pose_tracker::{
//!     config::Config,
//!     face_detection::ScrfdLocator,
//!     frame_source::CameraSource,
//!     mark_detection::load_landmark_model,
//!     output::{ChannelSink, PipelineEvent},
//!     pose_estimation::PoseEstimator,
//!     scheduler::Pipeline,
//!     tracker::Tracker,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let locator = ScrfdLocator::from_config(&config.model)?;
//! let model = load_landmark_model(&config.model)?;
//! let pose = PoseEstimator::from_config(&config.pose, config.capture.width, config.capture.height)?;
//! let tracker = Tracker::new(
//!     Box::new(locator),
//!     model,
//!     pose,
//!     config.tracking.clone(),
//!     config.filter.clone(),
//! )?;
//!
//! let source = CameraSource::new(config.capture.clone(), f64::from(config.pipeline.target_fps.fps()));
//! let (sink, events) = ChannelSink::new();
//! let handle = Pipeline::spawn(
//!     Box::new(source),
//!     config.capture.camera_index,
//!     tracker,
//!     Box::new(sink),
//!     &config.pipeline,
//! )?;
//!
//! for event in events.iter().take(300) {
//!     if let PipelineEvent::Result(result) = event {
//!         if result.pose.valid {
//!             let euler = result.pose.euler_degrees();
//!             println!("Pitch: {:.2}°, Yaw: {:.2}°", euler.pitch, euler.yaw);
//!         }
//!     }
//! }
//! let stats = handle.stop();
//! println!("{} frames processed, {} dropped", stats.processed, stats.dropped);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using Filters
//!
//! ```no_run
//! use face_pose_tracker::{config::FilterConfig, filters::create_filter, mark_detection::{Landmark, LandmarkSet}};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut filter = create_filter(&FilterConfig::default())?;
//!
//! let raw = LandmarkSet::new(vec![Landmark::new(120.0, 80.0, 0.9); 68]);
//! let smoothed = filter.update(&raw, 1.0 / 30.0);
//! println!("{} smoothed points from {}", smoothed.len(), filter.name());
//!
//! // Start over for a new track
//! filter.reset();
//! # Ok(())
//! # }
//! ```

/// Face detection module for locating faces in full frames
pub mod face_detection;

/// Facial landmark models producing 68 key points on a crop
pub mod mark_detection;

/// Head pose estimation module using `PnP` algorithm
pub mod pose_estimation;

/// Canonical 3D face used as the pose reference
pub mod face_model;

/// Temporal filters for smoothing landmarks
pub mod filters;

/// Crop regions and the crop-to-frame transform
pub mod crop;

/// Track acquisition, following and loss hysteresis
pub mod tracker;

/// Eye and mouth openness from landmarks
pub mod features;

/// Camera capture behind the frame source trait
pub mod frame_source;

/// Capture and processing threads
pub mod scheduler;

/// Result sinks, including the VMC sender
pub mod output;

/// Utility functions for image processing and coordinate transformations
pub mod utils;

/// Error types and result handling
pub mod error;

/// Main application module
pub mod app;

/// Constants used throughout the application
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
